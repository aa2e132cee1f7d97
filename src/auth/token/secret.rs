//! Redacting wrapper for upstream token values.

// self
use crate::_prelude::*;

const REDACTED: &str = "<redacted>";

/// Upstream token value that never prints itself.
///
/// Serde sees the bare string so persisted records stay plain JSON.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenSecret(Box<str>);
impl TokenSecret {
	/// Wraps `value`.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into().into_boxed_str())
	}

	/// Raw token value, for the wire only.
	pub fn expose(&self) -> &str {
		&self.0
	}

	/// `true` when the upstream handed back an empty value.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}
impl From<String> for TokenSecret {
	fn from(value: String) -> Self {
		Self::new(value)
	}
}
impl Debug for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "TokenSecret({REDACTED})")
	}
}
impl Display for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(REDACTED)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn only_serde_sees_the_value() {
		let secret = TokenSecret::from(String::from("upstream-access"));

		assert_eq!(format!("{secret:?}|{secret}"), "TokenSecret(<redacted>)|<redacted>");
		assert_eq!(
			serde_json::to_string(&secret).expect("Secret should serialize."),
			"\"upstream-access\""
		);
		assert!(TokenSecret::new("").is_empty());
	}
}
