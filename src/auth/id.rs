//! Validated identifiers shared by the bridge and the broker.
//!
//! Every identifier is a non-empty string of at most [`MAX_IDENTIFIER_LEN`] bytes with no
//! whitespace. A zero-sized kind marker keeps principal, client and provider ids apart at
//! compile time.

// std
use std::{borrow::Borrow, cmp::Ordering, hash::Hasher, marker::PhantomData, ops::Deref};
// crates.io
use serde::{Deserializer, Serializer, de::Error as _};
// self
use crate::_prelude::*;

/// Longest accepted identifier, in bytes.
pub const MAX_IDENTIFIER_LEN: usize = 128;

/// Marker naming one identifier family.
pub trait IdKind: 'static {
	/// Label used in errors and `Debug` output.
	const LABEL: &'static str;
}

/// Marker for [`PrincipalId`].
#[derive(Clone, Copy, Debug)]
pub enum PrincipalKind {}
impl IdKind for PrincipalKind {
	const LABEL: &'static str = "Principal";
}

/// Marker for [`ClientId`].
#[derive(Clone, Copy, Debug)]
pub enum ClientKind {}
impl IdKind for ClientKind {
	const LABEL: &'static str = "Client";
}

/// Marker for [`ProviderId`].
#[derive(Clone, Copy, Debug)]
pub enum ProviderKind {}
impl IdKind for ProviderKind {
	const LABEL: &'static str = "Provider";
}

/// Identity on whose behalf upstream credentials are held.
pub type PrincipalId = Id<PrincipalKind>;
/// Identifier minted for a registered downstream client.
pub type ClientId = Id<ClientKind>;
/// Identifier of an upstream provider descriptor.
pub type ProviderId = Id<ProviderKind>;

/// Why an identifier was refused.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum IdentifierError {
	/// Nothing was supplied.
	#[error("{kind} identifier cannot be empty.")]
	Empty {
		/// Identifier family.
		kind: &'static str,
	},
	/// Whitespace appeared somewhere in the value.
	#[error("{kind} identifier contains whitespace.")]
	ContainsWhitespace {
		/// Identifier family.
		kind: &'static str,
	},
	/// The value was longer than [`MAX_IDENTIFIER_LEN`].
	#[error("{kind} identifier exceeds {max} characters.")]
	TooLong {
		/// Identifier family.
		kind: &'static str,
		/// Limit that was exceeded.
		max: usize,
	},
}

/// Validated identifier of family `K`.
pub struct Id<K> {
	value: String,
	kind: PhantomData<fn() -> K>,
}
impl<K> Id<K>
where
	K: IdKind,
{
	/// Validates `value` and wraps it.
	pub fn new(value: impl AsRef<str>) -> Result<Self, IdentifierError> {
		Self::try_from(value.as_ref().to_owned())
	}

	/// Wraps a value the crate generated from a safe alphabet.
	pub(crate) fn from_minted(value: String) -> Self {
		debug_assert!(check::<K>(&value).is_ok());

		Self { value, kind: PhantomData }
	}
}
impl<K> Id<K> {
	/// Borrowed string form.
	pub fn as_str(&self) -> &str {
		&self.value
	}
}
impl<K> Clone for Id<K> {
	fn clone(&self) -> Self {
		Self { value: self.value.clone(), kind: PhantomData }
	}
}
impl<K> PartialEq for Id<K> {
	fn eq(&self, other: &Self) -> bool {
		self.value == other.value
	}
}
impl<K> Eq for Id<K> {}
impl<K> PartialOrd for Id<K> {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}
impl<K> Ord for Id<K> {
	fn cmp(&self, other: &Self) -> Ordering {
		self.value.cmp(&other.value)
	}
}
impl<K> Hash for Id<K> {
	// Must agree with `str` hashing so `Borrow<str>` lookups work.
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.value.as_str().hash(state);
	}
}
impl<K> Deref for Id<K> {
	type Target = str;

	fn deref(&self) -> &str {
		&self.value
	}
}
impl<K> AsRef<str> for Id<K> {
	fn as_ref(&self) -> &str {
		&self.value
	}
}
impl<K> Borrow<str> for Id<K> {
	fn borrow(&self) -> &str {
		&self.value
	}
}
impl<K> From<Id<K>> for String {
	fn from(id: Id<K>) -> Self {
		id.value
	}
}
impl<K> TryFrom<String> for Id<K>
where
	K: IdKind,
{
	type Error = IdentifierError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		check::<K>(&value)?;

		Ok(Self { value, kind: PhantomData })
	}
}
impl<K> FromStr for Id<K>
where
	K: IdKind,
{
	type Err = IdentifierError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::new(s)
	}
}
impl<K> Debug for Id<K>
where
	K: IdKind,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "{}({})", K::LABEL, self.value)
	}
}
impl<K> Display for Id<K> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.value)
	}
}
impl<K> Serialize for Id<K> {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&self.value)
	}
}
impl<'de, K> Deserialize<'de> for Id<K>
where
	K: IdKind,
{
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		String::deserialize(deserializer)?.try_into().map_err(D::Error::custom)
	}
}

fn check<K>(value: &str) -> Result<(), IdentifierError>
where
	K: IdKind,
{
	let kind = K::LABEL;

	match value {
		"" => Err(IdentifierError::Empty { kind }),
		_ if value.contains(char::is_whitespace) =>
			Err(IdentifierError::ContainsWhitespace { kind }),
		_ if value.len() > MAX_IDENTIFIER_LEN =>
			Err(IdentifierError::TooLong { kind, max: MAX_IDENTIFIER_LEN }),
		_ => Ok(()),
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn minted_principals_are_accepted() {
		let principal = PrincipalId::new("client-abc:Xy12").expect("Minted principal should validate.");

		assert_eq!(principal.as_str(), "client-abc:Xy12");
		assert_eq!(format!("{principal:?}"), "Principal(client-abc:Xy12)");
		assert_eq!(
			"\t".parse::<ClientId>(),
			Err(IdentifierError::ContainsWhitespace { kind: "Client" })
		);
		assert_eq!(ProviderId::new(""), Err(IdentifierError::Empty { kind: "Provider" }));
	}

	#[test]
	fn deserialization_validates() {
		let client: ClientId = serde_json::from_str("\"client-9\"").expect("Client id should deserialize.");

		assert_eq!(serde_json::to_string(&client).expect("Client id should serialize."), "\"client-9\"");
		assert!(serde_json::from_str::<PrincipalId>("\"two words\"").is_err());
	}

	#[test]
	fn overlong_values_fail() {
		PrincipalId::new("p".repeat(MAX_IDENTIFIER_LEN)).expect("Limit itself is allowed.");

		assert_eq!(
			PrincipalId::new("p".repeat(MAX_IDENTIFIER_LEN + 1)),
			Err(IdentifierError::TooLong { kind: "Principal", max: MAX_IDENTIFIER_LEN })
		);
	}

	#[test]
	fn maps_can_be_probed_with_str() {
		let mut held = HashMap::new();

		held.insert(ClientId::new("client-1").expect("Client id should validate."), "alpha");

		assert_eq!(held.get("client-1"), Some(&"alpha"));
		assert_eq!(held.get("client-2"), None);
	}
}
