//! [`CredentialStore`] over an external TTL-capable key/value backend.

// self
use crate::{
	_prelude::*,
	auth::{PrincipalId, StoredTokenInfo, TokenInfo},
	store::{CredentialStore, StoreError, StoreFuture},
};

/// Key prefix applied to every principal key.
pub const DEFAULT_KEY_PREFIX: &str = "ledger-broker:token:";
/// Storage TTL reset on every write.
pub const DEFAULT_RETENTION: StdDuration = StdDuration::from_secs(90 * 24 * 60 * 60);

/// Minimal string key/value contract a durable backend must provide.
pub trait KeyValueBackend
where
	Self: Send + Sync,
{
	/// Reads the raw value under `key`.
	fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>>;

	/// Writes `value` under `key` with an expiry of `ttl`.
	fn set_with_ttl<'a>(
		&'a self,
		key: &'a str,
		value: String,
		ttl: StdDuration,
	) -> StoreFuture<'a, ()>;

	/// Deletes `key`; returns `true` when it existed.
	fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool>;

	/// Returns `true` when `key` exists.
	fn exists<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool>;
}

/// Durable credential store serializing records as camelCase JSON.
#[derive(Clone, Debug)]
pub struct KvStore<B> {
	backend: B,
	prefix: String,
	retention: StdDuration,
}
impl<B> KvStore<B>
where
	B: KeyValueBackend,
{
	/// Wraps `backend` with the default prefix and retention window.
	pub fn new(backend: B) -> Self {
		Self { backend, prefix: DEFAULT_KEY_PREFIX.into(), retention: DEFAULT_RETENTION }
	}

	/// Overrides the key prefix.
	pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.prefix = prefix.into();

		self
	}

	/// Overrides the retention window applied on each write.
	pub fn with_retention(mut self, retention: StdDuration) -> Self {
		self.retention = retention;

		self
	}

	/// Borrow the backend.
	pub fn backend(&self) -> &B {
		&self.backend
	}

	/// Storage key for `principal`.
	pub fn key(&self, principal: &PrincipalId) -> String {
		format!("{}{}", self.prefix, principal)
	}

	async fn read(&self, key: &str) -> Result<Option<StoredTokenInfo>, StoreError> {
		let Some(raw) = self.backend.get(key).await? else {
			return Ok(None);
		};
		let record = serde_json::from_str(&raw).map_err(|e| StoreError::Serialization {
			message: format!("Failed to decode record under {key}: {e}"),
		})?;

		Ok(Some(record))
	}

	async fn write(
		&self,
		principal: &PrincipalId,
		token: TokenInfo,
	) -> Result<StoredTokenInfo, StoreError> {
		let key = self.key(principal);
		let previous = self.read(&key).await?;
		let stored = StoredTokenInfo::stamp(token, previous.as_ref(), OffsetDateTime::now_utc());
		let payload = serde_json::to_string(&stored).map_err(|e| StoreError::Serialization {
			message: format!("Failed to encode record: {e}"),
		})?;

		self.backend.set_with_ttl(&key, payload, self.retention).await?;

		Ok(stored)
	}
}
impl<B> CredentialStore for KvStore<B>
where
	B: KeyValueBackend,
{
	fn get<'a>(
		&'a self,
		principal: &'a PrincipalId,
	) -> StoreFuture<'a, Option<StoredTokenInfo>> {
		Box::pin(async move { self.read(&self.key(principal)).await })
	}

	fn set<'a>(
		&'a self,
		principal: &'a PrincipalId,
		token: TokenInfo,
	) -> StoreFuture<'a, StoredTokenInfo> {
		Box::pin(self.write(principal, token))
	}

	fn delete<'a>(&'a self, principal: &'a PrincipalId) -> StoreFuture<'a, bool> {
		Box::pin(async move { self.backend.delete(&self.key(principal)).await })
	}

	fn exists<'a>(&'a self, principal: &'a PrincipalId) -> StoreFuture<'a, bool> {
		Box::pin(async move { self.backend.exists(&self.key(principal)).await })
	}
}
