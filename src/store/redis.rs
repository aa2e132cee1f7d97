//! Redis [`KeyValueBackend`] over a multiplexed connection manager.

// crates.io
use redis::{AsyncCommands, Client, aio::ConnectionManager};
// self
use crate::{
	_prelude::*,
	store::{KeyValueBackend, StoreError, StoreFuture},
};

/// Redis-backed key/value store.
#[derive(Clone)]
pub struct RedisBackend {
	conn: ConnectionManager,
}
impl RedisBackend {
	/// Connects to the Redis instance at `url`.
	pub async fn connect(url: &str) -> Result<Self, StoreError> {
		let client = Client::open(url).map_err(backend_error)?;
		let conn = ConnectionManager::new(client).await.map_err(backend_error)?;

		Ok(Self { conn })
	}

	/// Wraps an existing connection manager.
	pub fn from_connection(conn: ConnectionManager) -> Self {
		Self { conn }
	}
}
impl Debug for RedisBackend {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RedisBackend").finish_non_exhaustive()
	}
}
impl KeyValueBackend for RedisBackend {
	fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
		let mut conn = self.conn.clone();

		Box::pin(async move { conn.get::<_, Option<String>>(key).await.map_err(backend_error) })
	}

	fn set_with_ttl<'a>(
		&'a self,
		key: &'a str,
		value: String,
		ttl: StdDuration,
	) -> StoreFuture<'a, ()> {
		let mut conn = self.conn.clone();
		let seconds = ttl.as_secs().max(1);

		Box::pin(async move { conn.set_ex::<_, _, ()>(key, value, seconds).await.map_err(backend_error) })
	}

	fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool> {
		let mut conn = self.conn.clone();

		Box::pin(async move {
			let removed = conn.del::<_, i64>(key).await.map_err(backend_error)?;

			Ok(removed > 0)
		})
	}

	fn exists<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool> {
		let mut conn = self.conn.clone();

		Box::pin(async move { conn.exists::<_, bool>(key).await.map_err(backend_error) })
	}
}

fn backend_error(e: redis::RedisError) -> StoreError {
	StoreError::Backend { message: e.to_string() }
}
