//! In-memory dynamic client registry (RFC 7591).

// self
use crate::{_prelude::*, auth::ClientId, provider::is_loopback};

/// Client metadata accepted at registration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientMetadata {
	/// Redirect URIs the client may use; an empty list accepts any redirect.
	pub redirect_uris: Vec<Url>,
	/// Human-readable client name.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub client_name: Option<String>,
	/// Grant types the client intends to use.
	pub grant_types: Vec<String>,
	/// Response types the client intends to use.
	pub response_types: Vec<String>,
	/// Token endpoint authentication method.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub token_endpoint_auth_method: Option<String>,
	/// Space-delimited scopes the client may request.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub scope: Option<String>,
}
impl ClientMetadata {
	/// Rejects redirect URIs that are neither HTTPS nor loopback HTTP.
	pub fn validate(&self) -> Result<()> {
		for uri in &self.redirect_uris {
			let ok = match uri.scheme() {
				"https" => true,
				"http" => is_loopback(uri),
				_ => false,
			};

			if !ok || uri.fragment().is_some() {
				return Err(Error::InvalidRequest {
					reason: format!("redirect_uri `{uri}` is not allowed"),
				});
			}
		}

		Ok(())
	}
}

/// Registered downstream client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredClient {
	/// Minted identifier.
	pub client_id: ClientId,
	/// Metadata supplied at registration.
	#[serde(flatten)]
	pub metadata: ClientMetadata,
	/// Registration instant, seconds since the epoch.
	#[serde(rename = "client_id_issued_at")]
	pub issued_at: i64,
}
impl RegisteredClient {
	/// Returns `true` when `redirect_uri` is acceptable for this client.
	pub fn allows_redirect(&self, redirect_uri: &Url) -> bool {
		self.metadata.redirect_uris.is_empty() || self.metadata.redirect_uris.contains(redirect_uri)
	}
}

/// Process-lifetime registry keyed by client id.
#[derive(Debug, Default)]
pub struct ClientRegistry {
	clients: RwLock<HashMap<ClientId, RegisteredClient>>,
}
impl ClientRegistry {
	/// Stores a new client under `client_id`.
	pub fn insert(
		&self,
		client_id: ClientId,
		metadata: ClientMetadata,
		now: OffsetDateTime,
	) -> RegisteredClient {
		let client = RegisteredClient { client_id, metadata, issued_at: now.unix_timestamp() };

		self.clients.write().insert(client.client_id.clone(), client.clone());

		client
	}

	/// Looks up a client by id.
	pub fn get(&self, client_id: &str) -> Option<RegisteredClient> {
		self.clients.read().get(client_id).cloned()
	}

	/// Number of registered clients.
	pub fn len(&self) -> usize {
		self.clients.read().len()
	}

	/// Returns `true` when no client is registered.
	pub fn is_empty(&self) -> bool {
		self.clients.read().is_empty()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn url(raw: &str) -> Url {
		Url::parse(raw).expect("URL fixture should parse.")
	}

	#[test]
	fn redirect_uris_must_be_https_or_loopback() {
		let ok = ClientMetadata {
			redirect_uris: vec![url("https://app.example.com/cb"), url("http://127.0.0.1:8080/cb")],
			..Default::default()
		};

		ok.validate().expect("HTTPS and loopback redirects should be accepted.");

		let bad = ClientMetadata {
			redirect_uris: vec![url("http://app.example.com/cb")],
			..Default::default()
		};

		assert!(matches!(bad.validate(), Err(Error::InvalidRequest { .. })));
	}

	#[test]
	fn registry_serves_clients_and_checks_redirects() {
		let registry = ClientRegistry::default();
		let client_id = ClientId::new("client-xyz").expect("Client fixture should be valid.");
		let metadata = ClientMetadata {
			redirect_uris: vec![url("https://app.example.com/cb")],
			client_name: Some("Books".into()),
			..Default::default()
		};
		let stored = registry.insert(client_id, metadata, OffsetDateTime::now_utc());

		assert_eq!(registry.len(), 1);
		assert_eq!(registry.get("client-xyz"), Some(stored.clone()));
		assert!(registry.get("client-other").is_none());
		assert!(stored.allows_redirect(&url("https://app.example.com/cb")));
		assert!(!stored.allows_redirect(&url("https://evil.example.com/cb")));

		let json = serde_json::to_value(&stored).expect("Client should serialize.");

		assert_eq!(json["client_id"], "client-xyz");
		assert_eq!(json["client_name"], "Books");
		assert!(json["client_id_issued_at"].is_i64());
	}
}
