//! Single-flight refresh orchestration.
//!
//! [`TokenBroker::access_token_for`] returns the stored access token while it is outside
//! the refresh buffer. Otherwise the caller joins the principal's [`RefreshFlight`]. The
//! first caller to take the flight's slot re-reads the store, contacts upstream and settles
//! the slot; every caller that joined before the flight settled returns that same outcome,
//! success or error, without a second upstream call.

// std
use std::sync::atomic::{AtomicBool, Ordering};
// self
use crate::{
	_prelude::*,
	auth::{PrincipalId, StoredTokenInfo, TokenInfo},
	broker::{TokenBroker, metrics::RefreshEvent},
	http::TokenHttpClient,
	oauth::TransportErrorMapper,
	obs::{self, FlowKind},
	provider::GrantType,
};

/// One refresh attempt for one principal.
///
/// Once `settled` is set the flight only serves callers that already hold it; new callers
/// start a fresh flight.
pub(super) struct RefreshFlight {
	settled: AtomicBool,
	outcome: AsyncMutex<Option<Result<StoredTokenInfo>>>,
}
impl RefreshFlight {
	fn new() -> Self {
		Self { settled: AtomicBool::new(false), outcome: AsyncMutex::new(None) }
	}
}

fn share(outcome: &Result<StoredTokenInfo>) -> Result<StoredTokenInfo> {
	match outcome {
		Ok(stored) => Ok(stored.clone()),
		Err(e) => Err(e.replicate()),
	}
}

impl<C, M> TokenBroker<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Returns a valid access token for `principal`, refreshing when required.
	pub async fn access_token_for(&self, principal: &PrincipalId) -> Result<String> {
		let current = self.load(principal).await?;

		if !current.token.needs_refresh_at(OffsetDateTime::now_utc(), self.refresh_buffer) {
			return Ok(current.token.access_token.expose().to_owned());
		}

		let refreshed = self.join_flight(principal, Some(current.updated_at)).await?;

		Ok(refreshed.token.access_token.expose().to_owned())
	}

	/// Runs, or joins, the refresh flight for `principal`.
	///
	/// The leader skips the upstream call when the stored credential is outside the refresh
	/// buffer.
	pub async fn refresh_single_flight(&self, principal: &PrincipalId) -> Result<StoredTokenInfo> {
		self.join_flight(principal, None).await
	}

	async fn join_flight(&self, principal: &PrincipalId, seen: Option<i64>) -> Result<StoredTokenInfo> {
		let flight = self.flight_for(principal);
		let result = {
			let mut slot = flight.outcome.lock().await;

			match slot.as_ref() {
				Some(settled) => share(settled),
				None => {
					let result = obs::observe(
						FlowKind::UpstreamRefresh,
						"refresh_access_token",
						self.refresh_locked(principal, seen),
					)
					.await;

					*slot = Some(share(&result));
					flight.settled.store(true, Ordering::Release);

					result
				},
			}
		};

		self.release_flight(principal, flight);

		result
	}

	async fn load(&self, principal: &PrincipalId) -> Result<StoredTokenInfo> {
		self.store
			.get(principal)
			.await?
			.ok_or_else(|| Error::AuthRequired { principal: principal.to_string() })
	}

	async fn refresh_locked(&self, principal: &PrincipalId, seen: Option<i64>) -> Result<StoredTokenInfo> {
		self.refresh_metrics.record(RefreshEvent::Attempt);

		let current = self.load(principal).await.inspect_err(|_| {
			self.refresh_metrics.record(RefreshEvent::Failure);
		})?;
		// An earlier flight may have written a new credential after `seen` was read.
		let rewritten = seen.is_some_and(|seen| current.updated_at != seen);

		if rewritten || !current.token.needs_refresh_at(OffsetDateTime::now_utc(), self.refresh_buffer) {
			self.refresh_metrics.record(RefreshEvent::Success);

			return Ok(current);
		}

		match self.refresh_upstream(&current).await {
			Ok(token) => {
				let stored = self.store.set(principal, token).await.inspect_err(|_| {
					self.refresh_metrics.record(RefreshEvent::Failure);
				})?;

				self.refresh_metrics.record(RefreshEvent::Success);

				Ok(stored)
			},
			Err(e) => {
				self.refresh_metrics.record(RefreshEvent::Failure);

				if let Err(delete_err) = self.store.delete(principal).await {
					obs::warn_event(FlowKind::UpstreamRefresh, "delete_after_failure", &delete_err);
				}

				Err(e)
			},
		}
	}

	async fn refresh_upstream(&self, current: &StoredTokenInfo) -> Result<TokenInfo> {
		self.descriptor.require(GrantType::RefreshToken)?;

		let Some(refresh) = current.token.refresh_token.clone() else {
			return Err(Error::UpstreamAuthFailure {
				reason: "stored credential has no refresh token".into(),
			});
		};
		let upstream = self.upstream()?;

		self.refresh_metrics.record(RefreshEvent::UpstreamCall);

		let mut token = upstream.refresh(self.strategy.as_ref(), refresh.expose()).await?;

		if token.refresh_token.is_none() {
			token.refresh_token = Some(refresh);
		}
		if token.scope.is_empty() {
			token.scope = current.token.scope.clone();
		}

		Ok(token)
	}

	fn flight_for(&self, principal: &PrincipalId) -> Arc<RefreshFlight> {
		let mut flights = self.flights.lock();
		let flight = flights.entry(principal.clone()).or_insert_with(|| Arc::new(RefreshFlight::new()));

		if flight.settled.load(Ordering::Acquire) {
			*flight = Arc::new(RefreshFlight::new());
		}

		flight.clone()
	}

	/// Drops the map entry once the last holder releases it so later callers start a new flight.
	fn release_flight(&self, principal: &PrincipalId, flight: Arc<RefreshFlight>) {
		let mut flights = self.flights.lock();
		let last_holder = match flights.get(principal) {
			Some(entry) => Arc::ptr_eq(entry, &flight) && Arc::strong_count(&flight) == 2,
			None => false,
		};

		if last_holder {
			flights.remove(principal);
		}
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicUsize, Ordering};
	// crates.io
	use oauth2::{AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse};
	// self
	use super::*;
	use crate::{
		auth::ProviderId,
		broker::{CredentialBroker, TokenProvider},
		error::ErrorKind,
		http::{ResponseMetadata, ResponseMetadataSlot},
		provider::{DefaultProviderStrategy, ProviderDescriptor, ProviderStrategy, TokenFailure},
		store::{CredentialStore, MemoryStore},
	};

	#[derive(Debug)]
	struct Unreachable;
	impl Display for Unreachable {
		fn fmt(&self, f: &mut Formatter) -> FmtResult {
			f.write_str("unreachable")
		}
	}
	impl StdError for Unreachable {}

	/// Answers every token request with a canned status + JSON body.
	#[derive(Clone)]
	struct CannedClient {
		status: u16,
		body: &'static str,
		calls: Arc<AtomicUsize>,
	}
	impl TokenHttpClient for CannedClient {
		type Handle = CannedHandle;
		type TransportError = Unreachable;

		fn with_metadata(&self, slot: ResponseMetadataSlot) -> Self::Handle {
			CannedHandle { client: self.clone(), slot }
		}
	}

	struct CannedHandle {
		client: CannedClient,
		slot: ResponseMetadataSlot,
	}
	impl<'c> AsyncHttpClient<'c> for CannedHandle {
		type Error = HttpClientError<Unreachable>;
		type Future =
			Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send + Sync>>;

		fn call(&'c self, _request: HttpRequest) -> Self::Future {
			Box::pin(async move {
				self.client.calls.fetch_add(1, Ordering::SeqCst);
				self.slot.take();
				self.slot.store(ResponseMetadata { status: Some(self.client.status), retry_after: None });

				let mut response = HttpResponse::new(self.client.body.as_bytes().to_vec());

				*response.status_mut() = oauth2::http::StatusCode::from_u16(self.client.status)
					.expect("Canned status should be valid.");
				response.headers_mut().insert(
					oauth2::http::header::CONTENT_TYPE,
					oauth2::http::HeaderValue::from_static("application/json"),
				);

				Ok(response)
			})
		}
	}

	struct NoopMapper;
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

	fn broker(status: u16, body: &'static str) -> (TokenBroker<CannedClient, NoopMapper>, Arc<AtomicUsize>) {
		let calls = Arc::new(AtomicUsize::new(0));
		let descriptor = ProviderDescriptor::builder(
			ProviderId::new("ledger").expect("Provider identifier should be valid."),
		)
		.authorization_endpoint(
			Url::parse("https://login.example.com/authorize").expect("URL should parse."),
		)
		.token_endpoint(Url::parse("https://login.example.com/token").expect("URL should parse."))
		.support_grants([GrantType::AuthorizationCode, GrantType::RefreshToken])
		.build()
		.expect("Descriptor should build.");
		let broker = TokenBroker::with_http_client(
			Arc::new(MemoryStore::default()),
			descriptor,
			Arc::new(DefaultProviderStrategy),
			"upstream-client",
			CannedClient { status, body, calls: calls.clone() },
			NoopMapper,
		)
		.with_client_secret("secret");

		(broker, calls)
	}

	fn token(access: &str, expires_in: Duration) -> TokenInfo {
		TokenInfo::builder()
			.access_token(access)
			.refresh_token("r-old")
			.scope("accounting:read")
			.expires_in(expires_in)
			.build()
			.expect("Token fixture should build.")
	}

	fn principal(value: &str) -> PrincipalId {
		PrincipalId::new(value).expect("Principal fixture should be valid.")
	}

	#[tokio::test]
	async fn fresh_token_is_returned_without_upstream_call() {
		let (broker, calls) = broker(200, "{}");
		let u1 = principal("u1");

		broker.store.set(&u1, token("a-fresh", Duration::hours(1))).await.expect("Seed should succeed.");

		let access = broker.get_access_token(Some(&u1)).await.expect("Fresh token should be returned.");

		assert_eq!(access, "a-fresh");
		assert_eq!(calls.load(Ordering::SeqCst), 0);
		assert!(broker.is_authenticated(Some(&u1)).await.expect("Exists should succeed."));
	}

	#[tokio::test]
	async fn missing_credential_requires_authorization() {
		let (broker, _) = broker(200, "{}");
		let err = broker.get_access_token(None).await.expect_err("Unknown principal must fail.");

		assert_eq!(err.kind(), ErrorKind::AuthRequired);
		assert!(err.to_string().contains("default"));
	}

	#[tokio::test]
	async fn refresh_keeps_old_refresh_token_when_upstream_omits_it() {
		let (broker, calls) = broker(
			200,
			r#"{"access_token":"a-new","token_type":"bearer","expires_in":3600}"#,
		);
		let u1 = principal("u1");

		broker.store.set(&u1, token("a-old", Duration::minutes(1))).await.expect("Seed should succeed.");

		let access = broker.get_access_token(Some(&u1)).await.expect("Refresh should succeed.");
		let stored = broker
			.get_token_info(Some(&u1))
			.await
			.expect("Lookup should succeed.")
			.expect("Credential should remain stored.");

		assert_eq!(access, "a-new");
		assert_eq!(calls.load(Ordering::SeqCst), 1);
		assert_eq!(stored.token.refresh_token.as_ref().map(|s| s.expose()), Some("r-old"));
		assert_eq!(stored.token.scope, "accounting:read");
		assert_eq!(broker.refresh_metrics.upstream_calls(), 1);
		assert_eq!(broker.in_flight_guards(), 0);
	}

	#[tokio::test]
	async fn failed_refresh_deletes_the_credential() {
		let (broker, _) = broker(400, r#"{"error":"invalid_grant","error_description":"expired"}"#);
		let u1 = principal("u1");

		broker.store.set(&u1, token("a-old", Duration::seconds(-10))).await.expect("Seed should succeed.");

		let err = broker.get_access_token(Some(&u1)).await.expect_err("Refresh must fail.");

		assert_eq!(err.kind(), ErrorKind::UpstreamAuthFailure);
		assert!(!broker.store.exists(&u1).await.expect("Exists should succeed."));
		assert_eq!(
			broker.get_access_token(Some(&u1)).await.map_err(|e| e.kind()),
			Err(ErrorKind::AuthRequired)
		);
		assert_eq!(broker.refresh_metrics.failures(), 1);
	}

	#[tokio::test]
	async fn code_exchange_persists_credential_with_configured_scope() {
		let (broker, calls) = broker(
			200,
			r#"{"access_token":"a1","refresh_token":"r1","token_type":"bearer","expires_in":3600}"#,
		);
		let broker = broker.with_scopes("accounting:read offline_access".parse().expect("Scopes should parse."));
		let p = principal("client-abc:0123456789abcdef");
		let redirect = Url::parse("https://bridge.example.com/oauth/callback").expect("URL should parse.");
		let stored = broker
			.exchange_authorization_code(&p, "upstream-code", &redirect)
			.await
			.expect("Exchange should succeed.");

		assert_eq!(stored.token.access_token.expose(), "a1");
		assert_eq!(stored.token.scope, "accounting:read offline_access");
		assert_eq!(calls.load(Ordering::SeqCst), 1);
		assert!(broker.is_authenticated(Some(&p)).await.expect("Exists should succeed."));
	}

	#[tokio::test]
	async fn scoped_principal_is_used_when_none_is_passed() {
		let (broker, _) = broker(200, "{}");
		let bound = principal("client-abc:scoped");

		broker.store.set(&bound, token("a-scoped", Duration::hours(1))).await.expect("Seed should succeed.");

		let access = crate::context::scope(bound.clone(), broker.get_access_token(None))
			.await
			.expect("Scoped principal should resolve.");

		assert_eq!(access, "a-scoped");
	}
}
