//! Upstream OAuth 2.0 client built on the `oauth2` crate.
//!
//! [`UpstreamClient`] shapes the authorize URL and runs the two token grants the broker
//! needs. Failures are reduced to a [`TokenFailure`] and classified by the provider's
//! [`ProviderStrategy`].

pub use oauth2;

// std
use std::borrow::Cow;
// crates.io
use oauth2::{
	AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet,
	EndpointSet, HttpClientError, RedirectUrl, RefreshToken, RequestTokenError, Scope,
	TokenResponse, TokenUrl,
	basic::{BasicClient, BasicRequestTokenError, BasicTokenResponse},
};
// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, TokenInfo, TokenSecret},
	error::{ConfigError, TransientError},
	http::{ResponseMetadataSlot, TokenHttpClient},
	provider::{ClientAuthMethod, GrantType, ProviderDescriptor, ProviderStrategy, TokenFailure},
};

type Client = BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Turns transport-level failures into crate errors.
///
/// `failure` already carries the grant and whatever response metadata was captured;
/// mappers that see an HTTP status should let `strategy` classify it.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Maps `error` raised while calling the token endpoint.
	fn map_transport_error(
		&self,
		strategy: &dyn ProviderStrategy,
		failure: TokenFailure,
		error: HttpClientError<E>,
	) -> Error;
}

/// Mapper for [`ReqwestHttpClient`](crate::http::ReqwestHttpClient).
#[cfg(feature = "reqwest")]
#[derive(Clone, Copy, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
#[cfg(feature = "reqwest")]
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(
		&self,
		strategy: &dyn ProviderStrategy,
		failure: TokenFailure,
		error: HttpClientError<ReqwestError>,
	) -> Error {
		match error {
			HttpClientError::Reqwest(inner) => {
				let inner = *inner;

				if inner.is_builder() {
					return ConfigError::from(inner).into();
				}
				if inner.is_timeout() {
					return failure.with_network().transient("token endpoint timed out");
				}
				if failure.error_status().is_some() {
					return strategy.classify(&failure).into_error(inner.to_string(), &failure);
				}

				TransientError::from(inner).into()
			},
			HttpClientError::Http(inner) => ConfigError::from(inner).into(),
			HttpClientError::Io(inner) => TransientError::Io(inner).into(),
			HttpClientError::Other(message) =>
				failure.with_network().transient(format!("token endpoint transport failed: {message}")),
			_ => failure.with_network().transient("token endpoint transport failed"),
		}
	}
}

/// OAuth client for one upstream provider, borrowing the broker's transport.
pub(crate) struct UpstreamClient<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	oauth: Client,
	http: Arc<C>,
	mapper: Arc<M>,
	offline_access: bool,
	scope_delimiter: char,
}
impl<C, M> UpstreamClient<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	pub(crate) fn new(
		descriptor: &ProviderDescriptor,
		client_id: &str,
		client_secret: Option<&str>,
		http: Arc<C>,
		mapper: Arc<M>,
	) -> Result<Self> {
		let auth_url = AuthUrl::from_url(descriptor.authorization_endpoint.clone());
		let token_url = TokenUrl::from_url(descriptor.token_endpoint.clone());
		let mut oauth = BasicClient::new(ClientId::new(client_id.to_owned()))
			.set_auth_uri(auth_url)
			.set_token_uri(token_url);

		if let Some(secret) = client_secret {
			oauth = oauth.set_client_secret(ClientSecret::new(secret.to_owned()));
		}
		if descriptor.client_auth == ClientAuthMethod::RequestBody {
			oauth = oauth.set_auth_type(AuthType::RequestBody);
		}

		Ok(Self {
			oauth,
			http,
			mapper,
			offline_access: descriptor.offline_access,
			scope_delimiter: descriptor.scope_delimiter,
		})
	}

	/// Upstream authorize URL carrying `state`, the bridge callback and `scopes`.
	pub(crate) fn authorize_url(&self, state: &str, redirect_uri: &Url, scopes: &ScopeSet) -> Result<Url> {
		let state = state.to_owned();
		let mut request = self
			.oauth
			.authorize_url(move || CsrfToken::new(state))
			.set_redirect_uri(Cow::Owned(RedirectUrl::from_url(redirect_uri.clone())));

		request = match self.scope_delimiter {
			' ' => request.add_scopes(scopes.iter().map(|scope| Scope::new(scope.to_owned()))),
			_ if scopes.is_empty() => request,
			delimiter => request.add_extra_param("scope", scopes.joined(delimiter)),
		};

		if self.offline_access {
			request = request.add_extra_param("access_type", "offline");
		}

		Ok(request.url().0)
	}

	/// Runs the authorization-code grant.
	pub(crate) async fn exchange_code(
		&self,
		strategy: &dyn ProviderStrategy,
		code: &str,
		redirect_uri: &Url,
	) -> Result<TokenInfo> {
		let slot = ResponseMetadataSlot::default();
		let handle = self.http.with_metadata(slot.clone());
		let response = self
			.oauth
			.exchange_code(AuthorizationCode::new(code.to_owned()))
			.set_redirect_uri(Cow::Owned(RedirectUrl::from_url(redirect_uri.clone())))
			.request_async(&handle)
			.await;

		match response {
			Ok(response) => into_token_info(response),
			Err(e) => Err(self.classify(strategy, TokenFailure::new(GrantType::AuthorizationCode, slot.take().as_ref()), e)),
		}
	}

	/// Runs the refresh-token grant.
	pub(crate) async fn refresh(&self, strategy: &dyn ProviderStrategy, refresh_token: &str) -> Result<TokenInfo> {
		let slot = ResponseMetadataSlot::default();
		let handle = self.http.with_metadata(slot.clone());
		let refresh_token = RefreshToken::new(refresh_token.to_owned());
		let response = self.oauth.exchange_refresh_token(&refresh_token).request_async(&handle).await;

		match response {
			Ok(response) => into_token_info(response),
			Err(e) => Err(self.classify(strategy, TokenFailure::new(GrantType::RefreshToken, slot.take().as_ref()), e)),
		}
	}

	fn classify(
		&self,
		strategy: &dyn ProviderStrategy,
		failure: TokenFailure,
		error: BasicRequestTokenError<HttpClientError<C::TransportError>>,
	) -> Error {
		match error {
			RequestTokenError::ServerResponse(response) => {
				let code = response.error().as_ref().to_owned();
				let message = match response.error_description() {
					Some(description) => format!("{code}: {description}"),
					None => code.clone(),
				};
				let failure = failure.with_oauth(code, response.error_description().cloned());

				strategy.classify(&failure).into_error(message, &failure)
			},
			RequestTokenError::Request(error) => self.mapper.map_transport_error(strategy, failure, error),
			// An HTML error page or plain-text 429 is an upstream failure, not a parse bug.
			RequestTokenError::Parse(source, body) => match failure.error_status() {
				Some(status) => {
					let failure = failure.with_body(&String::from_utf8_lossy(&body));

					strategy
						.classify(&failure)
						.into_error(format!("token endpoint answered HTTP {status}"), &failure)
				},
				None => TransientError::TokenResponseParse { source, status: failure.status }.into(),
			},
			RequestTokenError::Other(message) =>
				failure.transient(format!("token endpoint returned an unexpected response: {message}")),
		}
	}
}

/// Upstream must state `expires_in`. A missing refresh token stays unset so the broker can
/// keep the previous one.
fn into_token_info(response: BasicTokenResponse) -> Result<TokenInfo> {
	let expires_in = response.expires_in().ok_or(ConfigError::MissingExpiresIn)?;
	let expires_in = i64::try_from(expires_in.as_secs()).map_err(|_| ConfigError::ExpiresInOutOfRange)?;

	if expires_in <= 0 {
		return Err(ConfigError::NonPositiveExpiresIn.into());
	}

	let scope = response
		.scopes()
		.map(|scopes| ScopeSet::new(scopes.iter().map(|scope| scope.as_str())))
		.transpose()
		.map_err(ConfigError::from)?
		.map(|scopes| scopes.normalized())
		.unwrap_or_default();

	TokenInfo::builder()
		.access_token(response.access_token().secret().to_owned())
		.refresh_secret(response.refresh_token().map(|t| TokenSecret::new(t.secret().as_str())))
		.issued_at(OffsetDateTime::now_utc())
		.expires_in(Duration::seconds(expires_in))
		.scope(scope)
		.build()
		.map_err(|e| ConfigError::from(e).into())
}
