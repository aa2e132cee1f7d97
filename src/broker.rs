//! Per-principal upstream token broker.
//!
//! [`TokenBroker`] keeps one valid upstream access token per principal. It owns the HTTP
//! client, credential store, provider descriptor, and strategy references so the refresh
//! and exchange paths can focus on grant-specific logic. Refreshes are single-flight per
//! principal: concurrent callers for the same expired credential share one upstream call.

mod metrics;
mod refresh;

pub use metrics::RefreshMetrics;

// self
use crate::{
	_prelude::*,
	auth::{PrincipalId, ScopeSet, StoredTokenInfo},
	broker::refresh::RefreshFlight,
	context,
	http::TokenHttpClient,
	oauth::{TransportErrorMapper, UpstreamClient},
	obs::{self, FlowKind},
	provider::{GrantType, ProviderDescriptor, ProviderStrategy},
	store::CredentialStore,
};
#[cfg(feature = "reqwest")]
use crate::{http::ReqwestHttpClient, oauth::ReqwestTransportErrorMapper};

/// Boxed future returned by broker capability traits.
pub type BrokerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Principal used when neither an explicit argument nor a task scope names one.
pub const DEFAULT_PRINCIPAL: &str = "default";
/// Window before expiry inside which a token is refreshed proactively.
pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::minutes(5);

/// Read-side capability consumed by data-access code.
///
/// Every method resolves the principal as: explicit argument, then the principal bound by
/// [`context::scope`], then the broker default.
pub trait TokenProvider
where
	Self: Send + Sync,
{
	/// Returns a valid upstream access token, refreshing it first when needed.
	fn get_access_token<'a>(
		&'a self,
		principal: Option<&'a PrincipalId>,
	) -> BrokerFuture<'a, String>;

	/// Returns `true` when a credential is stored for the principal.
	fn is_authenticated<'a>(
		&'a self,
		principal: Option<&'a PrincipalId>,
	) -> BrokerFuture<'a, bool>;

	/// Returns the stored credential for the principal, if any.
	fn get_token_info<'a>(
		&'a self,
		principal: Option<&'a PrincipalId>,
	) -> BrokerFuture<'a, Option<StoredTokenInfo>>;
}

/// Full broker capability used by the authorization bridge.
pub trait CredentialBroker
where
	Self: TokenProvider,
{
	/// Builds the upstream authorize URL carrying `state` and `redirect_uri`.
	fn authorization_url(&self, state: &str, redirect_uri: &Url) -> Result<Url>;

	/// Exchanges an upstream authorization code and persists the credential for `principal`.
	fn exchange_authorization_code<'a>(
		&'a self,
		principal: &'a PrincipalId,
		code: &'a str,
		redirect_uri: &'a Url,
	) -> BrokerFuture<'a, StoredTokenInfo>;
}

#[cfg(feature = "reqwest")]
/// Broker specialized for the crate's default reqwest transport stack.
pub type ReqwestBroker = TokenBroker<ReqwestHttpClient, ReqwestTransportErrorMapper>;

/// Coordinates upstream grants and credential persistence for every principal.
pub struct TokenBroker<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// HTTP client wrapper used for every outbound token request.
	pub http_client: Arc<C>,
	/// Mapper applied to transport-layer errors before surfacing them to callers.
	pub transport_mapper: Arc<M>,
	/// Credential store holding one record per principal.
	pub store: Arc<dyn CredentialStore>,
	/// Upstream provider descriptor.
	pub descriptor: ProviderDescriptor,
	/// Strategy responsible for classifying upstream errors.
	pub strategy: Arc<dyn ProviderStrategy>,
	/// Upstream OAuth 2.0 client identifier.
	pub client_id: String,
	/// Upstream client secret.
	pub client_secret: Option<String>,
	/// Scopes requested on the upstream authorize URL.
	pub scopes: ScopeSet,
	/// Proactive refresh window.
	pub refresh_buffer: Duration,
	/// Principal used when none is supplied or bound.
	pub default_principal: PrincipalId,
	/// Shared metrics recorder for refresh outcomes.
	pub refresh_metrics: Arc<RefreshMetrics>,
	flights: Arc<Mutex<HashMap<PrincipalId, Arc<RefreshFlight>>>>,
}
impl<C, M> TokenBroker<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a broker that reuses the caller-provided transport + mapper pair.
	pub fn with_http_client(
		store: Arc<dyn CredentialStore>,
		descriptor: ProviderDescriptor,
		strategy: Arc<dyn ProviderStrategy>,
		client_id: impl Into<String>,
		http_client: impl Into<Arc<C>>,
		mapper: impl Into<Arc<M>>,
	) -> Self {
		Self {
			http_client: http_client.into(),
			transport_mapper: mapper.into(),
			store,
			descriptor,
			strategy,
			client_id: client_id.into(),
			client_secret: None,
			scopes: ScopeSet::default(),
			refresh_buffer: DEFAULT_REFRESH_BUFFER,
			default_principal: default_principal(),
			refresh_metrics: Default::default(),
			flights: Default::default(),
		}
	}

	/// Sets or replaces the upstream client secret.
	pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
		self.client_secret = Some(secret.into());

		self
	}

	/// Sets the scopes requested from upstream.
	pub fn with_scopes(mut self, scopes: ScopeSet) -> Self {
		self.scopes = scopes;

		self
	}

	/// Overrides the proactive refresh window; negative values are clamped to zero.
	pub fn with_refresh_buffer(mut self, buffer: Duration) -> Self {
		self.refresh_buffer = if buffer.is_negative() { Duration::ZERO } else { buffer };

		self
	}

	/// Overrides the principal used in single-tenant mode.
	pub fn with_default_principal(mut self, principal: PrincipalId) -> Self {
		self.default_principal = principal;

		self
	}

	/// Resolves the effective principal for a call.
	pub fn resolve_principal(&self, explicit: Option<&PrincipalId>) -> PrincipalId {
		context::resolve_principal(explicit, &self.default_principal)
	}

	/// Number of principals with a refresh guard currently in use.
	pub fn in_flight_guards(&self) -> usize {
		self.flights.lock().len()
	}

	fn upstream(&self) -> Result<UpstreamClient<C, M>> {
		UpstreamClient::new(
			&self.descriptor,
			&self.client_id,
			self.client_secret.as_deref(),
			self.http_client.clone(),
			self.transport_mapper.clone(),
		)
	}

	/// Exchanges an upstream authorization code and persists the resulting credential.
	pub async fn exchange_code(
		&self,
		principal: &PrincipalId,
		code: &str,
		redirect_uri: &Url,
	) -> Result<StoredTokenInfo> {
		obs::observe(FlowKind::UpstreamExchange, "exchange_authorization_code", async move {
			self.descriptor.require(GrantType::AuthorizationCode)?;

			let mut token =
				self.upstream()?.exchange_code(self.strategy.as_ref(), code, redirect_uri).await?;

			if token.scope.is_empty() {
				token.scope = self.scopes.normalized();
			}

			let stored = self.store.set(principal, token).await?;

			obs::info_event(FlowKind::UpstreamExchange, "exchange_authorization_code", "credential stored");

			Ok(stored)
		})
		.await
	}
}
#[cfg(feature = "reqwest")]
impl TokenBroker<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Creates a broker backed by a reqwest client with the fixed upstream timeout.
	pub fn new(
		store: Arc<dyn CredentialStore>,
		descriptor: ProviderDescriptor,
		strategy: Arc<dyn ProviderStrategy>,
		client_id: impl Into<String>,
	) -> Result<Self> {
		Ok(Self::with_http_client(
			store,
			descriptor,
			strategy,
			client_id,
			ReqwestHttpClient::new()?,
			Arc::new(ReqwestTransportErrorMapper),
		))
	}
}
impl<C, M> Debug for TokenBroker<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenBroker")
			.field("descriptor", &self.descriptor)
			.field("client_id", &self.client_id)
			.field("client_secret_set", &self.client_secret.is_some())
			.field("scopes", &self.scopes)
			.field("default_principal", &self.default_principal)
			.finish()
	}
}
impl<C, M> TokenProvider for TokenBroker<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn get_access_token<'a>(
		&'a self,
		principal: Option<&'a PrincipalId>,
	) -> BrokerFuture<'a, String> {
		Box::pin(async move {
			let principal = self.resolve_principal(principal);

			self.access_token_for(&principal).await
		})
	}

	fn is_authenticated<'a>(
		&'a self,
		principal: Option<&'a PrincipalId>,
	) -> BrokerFuture<'a, bool> {
		Box::pin(async move {
			let principal = self.resolve_principal(principal);

			Ok(self.store.exists(&principal).await?)
		})
	}

	fn get_token_info<'a>(
		&'a self,
		principal: Option<&'a PrincipalId>,
	) -> BrokerFuture<'a, Option<StoredTokenInfo>> {
		Box::pin(async move {
			let principal = self.resolve_principal(principal);

			Ok(self.store.get(&principal).await?)
		})
	}
}
impl<C, M> CredentialBroker for TokenBroker<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn authorization_url(&self, state: &str, redirect_uri: &Url) -> Result<Url> {
		self.descriptor.require(GrantType::AuthorizationCode)?;
		self.upstream()?.authorize_url(state, redirect_uri, &self.scopes)
	}

	fn exchange_authorization_code<'a>(
		&'a self,
		principal: &'a PrincipalId,
		code: &'a str,
		redirect_uri: &'a Url,
	) -> BrokerFuture<'a, StoredTokenInfo> {
		Box::pin(self.exchange_code(principal, code, redirect_uri))
	}
}

fn default_principal() -> PrincipalId {
	PrincipalId::from_minted(DEFAULT_PRINCIPAL.into())
}
