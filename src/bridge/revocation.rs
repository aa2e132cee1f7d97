//! Revoked local tokens, each kept only until its own expiry.

// self
use crate::_prelude::*;

/// Set of revoked tokens bounded by token lifetime.
#[derive(Debug, Default)]
pub struct RevocationList {
	entries: Mutex<HashMap<String, i64>>,
}
impl RevocationList {
	/// Records `token` (expiring at `exp` seconds) as revoked and prunes lapsed entries.
	///
	/// Returns `false` when the token was already revoked.
	pub fn revoke_at(&self, token: &str, exp: i64, now: OffsetDateTime) -> bool {
		let now = now.unix_timestamp();
		let mut entries = self.entries.lock();

		entries.retain(|_, expiry| *expiry > now);

		if entries.contains_key(token) {
			return false;
		}

		entries.insert(token.to_owned(), exp);

		true
	}

	/// Returns `true` when `token` has been revoked.
	pub fn contains(&self, token: &str) -> bool {
		self.entries.lock().contains_key(token)
	}

	/// Number of retained entries.
	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}

	/// Returns `true` when nothing is retained.
	pub fn is_empty(&self) -> bool {
		self.entries.lock().is_empty()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	#[test]
	fn revocation_is_idempotent_and_bounded_by_expiry() {
		let list = RevocationList::default();
		let now = macros::datetime!(2025-01-01 00:00 UTC);
		let ts = now.unix_timestamp();

		assert!(list.revoke_at("a", ts + 60, now));
		assert!(!list.revoke_at("a", ts + 60, now), "Second revocation reports a duplicate.");
		assert!(list.contains("a"));

		list.revoke_at("b", ts + 3_600, now + Duration::minutes(2));

		assert!(!list.contains("a"), "Entries past their expiry are pruned on insert.");
		assert!(list.contains("b"));
		assert_eq!(list.len(), 1);
	}
}
