//! Storage contracts and built-in credential stores keyed by principal.

pub mod kv;
pub mod memory;
#[cfg(feature = "redis")] pub mod redis;

pub use kv::{DEFAULT_KEY_PREFIX, DEFAULT_RETENTION, KeyValueBackend, KvStore};
pub use memory::MemoryStore;
#[cfg(feature = "redis")] pub use self::redis::RedisBackend;

// self
use crate::{
	_prelude::*,
	auth::{PrincipalId, StoredTokenInfo, TokenInfo},
};

/// Boxed future returned by every storage operation.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Async CRUD over principal → [`StoredTokenInfo`].
///
/// Implementations keep `created_at` from the first write and move `updated_at` on every
/// later write.
pub trait CredentialStore
where
	Self: Send + Sync,
{
	/// Fetches the credential held for `principal`, if any.
	fn get<'a>(
		&'a self,
		principal: &'a PrincipalId,
	) -> StoreFuture<'a, Option<StoredTokenInfo>>;

	/// Persists `token` for `principal`, returning the stamped record.
	fn set<'a>(
		&'a self,
		principal: &'a PrincipalId,
		token: TokenInfo,
	) -> StoreFuture<'a, StoredTokenInfo>;

	/// Removes the credential for `principal`; returns `true` when one existed.
	fn delete<'a>(&'a self, principal: &'a PrincipalId) -> StoreFuture<'a, bool>;

	/// Returns `true` when a credential exists for `principal`.
	fn exists<'a>(&'a self, principal: &'a PrincipalId) -> StoreFuture<'a, bool>;
}
impl<S> CredentialStore for Arc<S>
where
	S: ?Sized + CredentialStore,
{
	fn get<'a>(
		&'a self,
		principal: &'a PrincipalId,
	) -> StoreFuture<'a, Option<StoredTokenInfo>> {
		(**self).get(principal)
	}

	fn set<'a>(
		&'a self,
		principal: &'a PrincipalId,
		token: TokenInfo,
	) -> StoreFuture<'a, StoredTokenInfo> {
		(**self).set(principal, token)
	}

	fn delete<'a>(&'a self, principal: &'a PrincipalId) -> StoreFuture<'a, bool> {
		(**self).delete(principal)
	}

	fn exists<'a>(&'a self, principal: &'a PrincipalId) -> StoreFuture<'a, bool> {
		(**self).exists(principal)
	}
}

/// Error type produced by [`CredentialStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced while encoding or decoding a record.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}
