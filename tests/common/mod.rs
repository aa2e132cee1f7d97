//! Shared fixtures for integration tests.

#![allow(dead_code)]

// std
use std::{
	collections::HashMap,
	error::Error as StdError,
	fmt::{Display, Formatter, Result as FmtResult},
	future::Future,
	pin::Pin,
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration as StdDuration,
};
// crates.io
use oauth2::{AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse};
use parking_lot::Mutex;
use time::Duration;
use url::Url;
// self
use ledger_broker::{
	auth::{PrincipalId, ProviderId, TokenInfo},
	broker::TokenBroker,
	error::Error,
	http::{ResponseMetadata, ResponseMetadataSlot, TokenHttpClient},
	oauth::TransportErrorMapper,
	provider::{
		DefaultProviderStrategy, GrantType, ProviderDescriptor, ProviderStrategy, TokenFailure,
	},
	store::{CredentialStore, MemoryStore},
};

/// Broker wired to the [`FakeTokenEndpoint`].
pub type FakeBroker = TokenBroker<FakeTokenEndpoint, NoopMapper>;

#[derive(Debug)]
pub struct Unreachable;
impl Display for Unreachable {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("unreachable")
	}
}
impl StdError for Unreachable {}

/// In-process token endpoint.
///
/// Authorization codes are answered with `access-<code>` / `refresh-<code>`; refresh
/// grants with `access-from-<refresh token>` and no new refresh token. Latency is looked up
/// by code or refresh token, and every call is counted per grant value.
#[derive(Clone, Default)]
pub struct FakeTokenEndpoint {
	latency: Arc<Mutex<HashMap<String, StdDuration>>>,
	calls: Arc<Mutex<HashMap<String, usize>>>,
	total: Arc<AtomicUsize>,
}
impl FakeTokenEndpoint {
	pub fn with_latency(self, grant_value: &str, latency: StdDuration) -> Self {
		self.latency.lock().insert(grant_value.to_owned(), latency);

		self
	}

	pub fn calls_for(&self, grant_value: &str) -> usize {
		self.calls.lock().get(grant_value).copied().unwrap_or(0)
	}

	pub fn total_calls(&self) -> usize {
		self.total.load(Ordering::SeqCst)
	}
}
impl TokenHttpClient for FakeTokenEndpoint {
	type Handle = FakeHandle;
	type TransportError = Unreachable;

	fn with_metadata(&self, slot: ResponseMetadataSlot) -> Self::Handle {
		FakeHandle { endpoint: self.clone(), slot }
	}
}

pub struct FakeHandle {
	endpoint: FakeTokenEndpoint,
	slot: ResponseMetadataSlot,
}
impl<'c> AsyncHttpClient<'c> for FakeHandle {
	type Error = HttpClientError<Unreachable>;
	type Future =
		Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send + Sync>>;

	fn call(&'c self, request: HttpRequest) -> Self::Future {
		let form: HashMap<String, String> =
			url::form_urlencoded::parse(request.body()).into_owned().collect();
		let grant = form.get("grant_type").cloned().unwrap_or_default();
		let value = match grant.as_str() {
			"authorization_code" => form.get("code").cloned(),
			_ => form.get("refresh_token").cloned(),
		}
		.unwrap_or_default();
		let body = if grant == "authorization_code" {
			format!(
				"{{\"access_token\":\"access-{value}\",\"refresh_token\":\"refresh-{value}\",\"token_type\":\"bearer\",\"expires_in\":3600}}"
			)
		} else {
			format!(
				"{{\"access_token\":\"access-from-{value}\",\"token_type\":\"bearer\",\"expires_in\":3600}}"
			)
		};
		let latency = self.endpoint.latency.lock().get(&value).copied();

		Box::pin(async move {
			self.slot.take();
			self.endpoint.total.fetch_add(1, Ordering::SeqCst);
			*self.endpoint.calls.lock().entry(value).or_default() += 1;

			if let Some(latency) = latency {
				tokio::time::sleep(latency).await;
			}

			self.slot.store(ResponseMetadata { status: Some(200), retry_after: None });

			let mut response = HttpResponse::new(body.into_bytes());

			response.headers_mut().insert(
				oauth2::http::header::CONTENT_TYPE,
				oauth2::http::HeaderValue::from_static("application/json"),
			);

			Ok(response)
		})
	}
}

pub struct NoopMapper;
impl TransportErrorMapper<Unreachable> for NoopMapper {
	fn map_transport_error(
		&self,
		_strategy: &dyn ProviderStrategy,
		_failure: TokenFailure,
		_error: HttpClientError<Unreachable>,
	) -> Error {
		Error::UpstreamAuthFailure { reason: "unexpected transport error".into() }
	}
}

pub fn descriptor(base: &str) -> ProviderDescriptor {
	ProviderDescriptor::builder(
		ProviderId::new("ledger-upstream").expect("Provider identifier should be valid."),
	)
	.authorization_endpoint(
		Url::parse(&format!("{base}/authorize")).expect("Authorize endpoint should parse."),
	)
	.token_endpoint(Url::parse(&format!("{base}/token")).expect("Token endpoint should parse."))
	.support_grants([GrantType::AuthorizationCode, GrantType::RefreshToken])
	.build()
	.expect("Descriptor should build.")
}

pub fn fake_broker(endpoint: FakeTokenEndpoint) -> (FakeBroker, Arc<MemoryStore>) {
	let store = Arc::new(MemoryStore::default());
	let broker = TokenBroker::with_http_client(
		store.clone(),
		descriptor("https://login.example.com"),
		Arc::new(DefaultProviderStrategy),
		"upstream-client",
		endpoint,
		NoopMapper,
	)
	.with_client_secret("upstream-secret");

	(broker, store)
}

pub fn principal(value: &str) -> PrincipalId {
	PrincipalId::new(value).expect("Principal fixture should be valid.")
}

pub async fn seed<S>(store: &S, principal: &PrincipalId, access: &str, refresh: &str, expires_in: Duration)
where
	S: ?Sized + CredentialStore,
{
	let token = TokenInfo::builder()
		.access_token(access)
		.refresh_token(refresh)
		.scope("accounting:read")
		.expires_in(expires_in)
		.build()
		.expect("Token fixture should build.");

	store.set(principal, token).await.expect("Seeding the store should succeed.");
}
