//! Thread-safe in-memory [`CredentialStore`] for single-instance deployments and tests.

// self
use crate::{
	_prelude::*,
	auth::{PrincipalId, StoredTokenInfo, TokenInfo},
	store::{CredentialStore, StoreFuture},
};

type StoreMap = Arc<RwLock<HashMap<PrincipalId, StoredTokenInfo>>>;

/// Process-lifetime store; credentials vanish on restart.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(StoreMap);
impl MemoryStore {
	/// Number of principals currently holding a credential.
	pub fn len(&self) -> usize {
		self.0.read().len()
	}

	/// Returns `true` if no credentials are stored.
	pub fn is_empty(&self) -> bool {
		self.0.read().is_empty()
	}

	fn set_now(map: StoreMap, principal: PrincipalId, token: TokenInfo) -> StoredTokenInfo {
		let mut guard = map.write();
		let stored = StoredTokenInfo::stamp(token, guard.get(&principal), OffsetDateTime::now_utc());

		guard.insert(principal, stored.clone());

		stored
	}
}
impl CredentialStore for MemoryStore {
	fn get<'a>(
		&'a self,
		principal: &'a PrincipalId,
	) -> StoreFuture<'a, Option<StoredTokenInfo>> {
		let map = self.0.clone();

		Box::pin(async move { Ok(map.read().get(principal).cloned()) })
	}

	fn set<'a>(
		&'a self,
		principal: &'a PrincipalId,
		token: TokenInfo,
	) -> StoreFuture<'a, StoredTokenInfo> {
		let map = self.0.clone();
		let principal = principal.to_owned();

		Box::pin(async move { Ok(Self::set_now(map, principal, token)) })
	}

	fn delete<'a>(&'a self, principal: &'a PrincipalId) -> StoreFuture<'a, bool> {
		let map = self.0.clone();

		Box::pin(async move { Ok(map.write().remove(principal).is_some()) })
	}

	fn exists<'a>(&'a self, principal: &'a PrincipalId) -> StoreFuture<'a, bool> {
		let map = self.0.clone();

		Box::pin(async move { Ok(map.read().contains_key(principal)) })
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn token(access: &str) -> TokenInfo {
		TokenInfo::builder()
			.access_token(access)
			.refresh_token("refresh")
			.expires_in(Duration::hours(1))
			.build()
			.expect("Token fixture should build.")
	}

	#[tokio::test]
	async fn set_get_delete_cycle() {
		let store = MemoryStore::default();
		let principal = PrincipalId::new("u1").expect("Principal fixture should be valid.");

		assert!(store.get(&principal).await.expect("Get should succeed.").is_none());
		assert!(!store.exists(&principal).await.expect("Exists should succeed."));

		store.set(&principal, token("a1")).await.expect("Set should succeed.");

		let fetched = store
			.get(&principal)
			.await
			.expect("Get should succeed.")
			.expect("Credential should be present after set.");

		assert_eq!(fetched.token.access_token.expose(), "a1");
		assert!(store.exists(&principal).await.expect("Exists should succeed."));
		assert_eq!(store.len(), 1);
		assert!(store.delete(&principal).await.expect("Delete should succeed."));
		assert!(!store.delete(&principal).await.expect("Second delete should succeed."));
		assert!(store.is_empty());
	}

	#[tokio::test]
	async fn second_write_preserves_created_at() {
		let store = MemoryStore::default();
		let principal = PrincipalId::new("u1").expect("Principal fixture should be valid.");
		let first = store.set(&principal, token("a1")).await.expect("First set should succeed.");

		tokio::time::sleep(StdDuration::from_millis(5)).await;

		let second = store.set(&principal, token("a2")).await.expect("Second set should succeed.");

		assert_eq!(second.created_at, first.created_at);
		assert!(second.updated_at > first.updated_at);
		assert_eq!(second.token.access_token.expose(), "a2");
	}
}
