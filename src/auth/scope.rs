//! Scope sets for upstream authorize requests, local grants and JWT claims.

// std
use std::collections::BTreeSet;
// self
use crate::_prelude::*;

/// Reasons a scope list is refused.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum ScopeValidationError {
	/// A scope entry was empty.
	#[error("Scope entries cannot be empty.")]
	Empty,
	/// A scope entry contained whitespace.
	#[error("Scope contains whitespace: {scope}.")]
	ContainsWhitespace {
		/// Offending entry.
		scope: String,
	},
}

/// Sorted, deduplicated OAuth scopes.
///
/// Serialized as a JSON array, the shape of the `scopes` claim. [`Display`] and
/// [`FromStr`] use the space-delimited form of the `scope` parameter.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct ScopeSet(Arc<[String]>);
impl ScopeSet {
	/// Validates and normalizes `scopes`.
	pub fn new<I, S>(scopes: I) -> Result<Self, ScopeValidationError>
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let mut sorted = BTreeSet::new();

		for scope in scopes {
			let scope = scope.into();

			if scope.is_empty() {
				return Err(ScopeValidationError::Empty);
			}
			if scope.chars().any(char::is_whitespace) {
				return Err(ScopeValidationError::ContainsWhitespace { scope });
			}

			sorted.insert(scope);
		}

		Ok(Self(sorted.into_iter().collect()))
	}

	/// Number of distinct scopes.
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Returns `true` for the empty set.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Membership test.
	pub fn contains(&self, scope: &str) -> bool {
		self.0.binary_search_by(|held| held.as_str().cmp(scope)).is_ok()
	}

	/// Returns `true` when `other` grants every scope in `self`.
	pub fn is_subset_of(&self, other: &ScopeSet) -> bool {
		self.iter().all(|scope| other.contains(scope))
	}

	/// Scopes in sorted order.
	pub fn iter(&self) -> impl Iterator<Item = &str> {
		self.0.iter().map(String::as_str)
	}

	/// Joins the scopes with `delimiter`.
	pub fn joined(&self, delimiter: char) -> String {
		let mut buf = String::new();

		for scope in self.iter() {
			if !buf.is_empty() {
				buf.push(delimiter);
			}

			buf.push_str(scope);
		}

		buf
	}

	/// Space-delimited form.
	pub fn normalized(&self) -> String {
		self.joined(' ')
	}

	/// Owned copy of the scopes.
	pub fn to_vec(&self) -> Vec<String> {
		self.0.to_vec()
	}
}
impl Debug for ScopeSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_set().entries(self.iter()).finish()
	}
}
impl Display for ScopeSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.normalized())
	}
}
impl FromStr for ScopeSet {
	type Err = ScopeValidationError;

	/// An empty string is the empty set; whitespace alone is refused.
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"" => Ok(Self::default()),
			_ if s.trim().is_empty() => Err(ScopeValidationError::Empty),
			_ => Self::new(s.split_whitespace()),
		}
	}
}
impl TryFrom<Vec<String>> for ScopeSet {
	type Error = ScopeValidationError;

	fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
		Self::new(value)
	}
}
impl From<ScopeSet> for Vec<String> {
	fn from(value: ScopeSet) -> Self {
		value.to_vec()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn scopes(raw: &str) -> ScopeSet {
		raw.parse().expect("Scope fixture should parse.")
	}

	#[test]
	fn wire_order_does_not_matter() {
		let lhs = ScopeSet::new(["vouchers", "invoices", "invoices"]).expect("Scopes should be valid.");

		assert_eq!(lhs, scopes("invoices  vouchers"));
		assert_eq!(lhs.len(), 2);
		assert_eq!(lhs.to_string(), "invoices vouchers");
		assert_eq!(lhs.joined(','), "invoices,vouchers");
		assert_eq!(format!("{lhs:?}"), r#"{"invoices", "vouchers"}"#);
	}

	#[test]
	fn malformed_entries_are_refused() {
		assert!(matches!(
			ScopeSet::new([" profile "]),
			Err(ScopeValidationError::ContainsWhitespace { .. })
		));
		assert_eq!(ScopeSet::new([""]), Err(ScopeValidationError::Empty));
		assert_eq!("   ".parse::<ScopeSet>(), Err(ScopeValidationError::Empty));
		assert!(scopes("").is_empty());
	}

	#[test]
	fn narrower_requests_are_subsets() {
		let granted = scopes("accounting:read accounting:write offline_access");

		assert!(scopes("accounting:read").is_subset_of(&granted));
		assert!(!scopes("accounting:read payroll:read").is_subset_of(&granted));
		assert!(ScopeSet::default().is_subset_of(&granted));
		assert!(granted.contains("offline_access"));
	}

	#[test]
	fn claims_use_arrays_and_reject_bad_entries() {
		let json = serde_json::to_string(&scopes("b a")).expect("Scopes should serialize.");

		assert_eq!(json, r#"["a","b"]"#);
		assert_eq!(serde_json::from_str::<ScopeSet>(&json).expect("Scopes should deserialize."), scopes("a b"));
		assert!(serde_json::from_str::<ScopeSet>(r#"["a b"]"#).is_err());
	}
}
