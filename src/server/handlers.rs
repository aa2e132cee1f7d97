//! Endpoint handlers for the authorization-server router.

// crates.io
use axum::{
	Form, Json,
	extract::{Query, State},
	http::{HeaderValue, StatusCode, header},
	response::{IntoResponse, Response},
};
// self
use super::{OAuthError, ServerState};
use crate::{
	_prelude::*,
	auth::ScopeSet,
	bridge::{ClientMetadata, DownstreamParams, PkceChallenge, PkceMethod},
	error::ConfigError,
};

type Shared = State<Arc<ServerState>>;

/// Query of `GET /authorize`.
#[derive(Debug, Deserialize)]
pub struct AuthorizeQuery {
	/// Must be `code`.
	pub response_type: String,
	/// Registered client id.
	pub client_id: String,
	/// Downstream redirect URI.
	pub redirect_uri: String,
	/// Space-delimited requested scopes.
	#[serde(default)]
	pub scope: Option<String>,
	/// Downstream state, echoed back.
	#[serde(default)]
	pub state: Option<String>,
	/// PKCE challenge.
	#[serde(default)]
	pub code_challenge: Option<String>,
	/// PKCE method; defaults to `plain` per RFC 7636 when a challenge is present.
	#[serde(default)]
	pub code_challenge_method: Option<String>,
}

/// Query of `GET /oauth/callback`.
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
	/// Upstream authorization code.
	#[serde(default)]
	pub code: Option<String>,
	/// Correlation state minted by the bridge.
	#[serde(default)]
	pub state: Option<String>,
	/// Upstream error code.
	#[serde(default)]
	pub error: Option<String>,
	/// Upstream error description.
	#[serde(default)]
	pub error_description: Option<String>,
}

/// Form of `POST /token`.
#[derive(Debug, Deserialize)]
pub struct TokenForm {
	/// `authorization_code` or `refresh_token`.
	pub grant_type: String,
	/// Client presenting the grant.
	pub client_id: String,
	/// Local authorization code.
	#[serde(default)]
	pub code: Option<String>,
	/// PKCE verifier.
	#[serde(default)]
	pub code_verifier: Option<String>,
	/// Redirect URI the code was delivered to; compared when present.
	#[serde(default)]
	pub redirect_uri: Option<String>,
	/// Local refresh token.
	#[serde(default)]
	pub refresh_token: Option<String>,
	/// Requested narrower scopes on refresh.
	#[serde(default)]
	pub scope: Option<String>,
}

/// Form of `POST /revoke`.
#[derive(Debug, Deserialize)]
pub struct RevokeForm {
	/// Token to revoke.
	pub token: String,
	/// Ignored hint.
	#[serde(default)]
	pub token_type_hint: Option<String>,
}

/// `GET /.well-known/oauth-authorization-server`.
pub async fn metadata(State(state): Shared) -> Json<serde_json::Value> {
	Json(serde_json::json!({
		"issuer": state.bridge.jwt().issuer(),
		"authorization_endpoint": state.endpoint("/authorize"),
		"token_endpoint": state.endpoint("/token"),
		"registration_endpoint": state.endpoint("/register"),
		"revocation_endpoint": state.endpoint("/revoke"),
		"response_types_supported": ["code"],
		"grant_types_supported": ["authorization_code", "refresh_token"],
		"code_challenge_methods_supported": [PkceMethod::S256.as_str(), PkceMethod::Plain.as_str()],
		"token_endpoint_auth_methods_supported": ["none"],
	}))
}

/// `GET /authorize`.
pub async fn authorize(
	State(state): Shared,
	Query(query): Query<AuthorizeQuery>,
) -> Result<Response, OAuthError> {
	if query.response_type != "code" {
		return Err(OAuthError::new(
			StatusCode::BAD_REQUEST,
			"unsupported_response_type",
			"only response_type=code is supported",
		));
	}

	let redirect_uri = Url::parse(&query.redirect_uri)
		.map_err(|_| OAuthError::invalid_request("redirect_uri is not a valid URL"))?;
	let scopes = ScopeSet::from_str(query.scope.as_deref().unwrap_or_default())
		.map_err(|e| OAuthError::from(Error::from(ConfigError::from(e))))?;
	let code_challenge = match query.code_challenge {
		Some(challenge) => {
			let method = match query.code_challenge_method.as_deref() {
				Some(raw) => PkceMethod::from_str(raw)?,
				None => PkceMethod::Plain,
			};

			Some(PkceChallenge::new(challenge, method))
		},
		None => None,
	};
	let params = DownstreamParams { redirect_uri, scopes, state: query.state, code_challenge };
	let upstream = state.bridge.authorize(&query.client_id, params)?;

	Ok(found(&upstream))
}

/// `GET /oauth/callback`.
pub async fn callback(
	State(state): Shared,
	Query(query): Query<CallbackQuery>,
) -> Result<Response, OAuthError> {
	let bridge_state =
		query.state.as_deref().ok_or_else(|| OAuthError::invalid_request("state is required"))?;
	let redirect = match (query.error.as_deref(), query.code.as_deref()) {
		(Some(error), _) =>
			state.bridge.handle_upstream_error(bridge_state, error, query.error_description.as_deref())?,
		(None, Some(code)) => state.bridge.handle_upstream_callback(code, bridge_state).await?,
		(None, None) => return Err(OAuthError::invalid_request("code is required")),
	};

	Ok(found(&redirect))
}

/// `POST /token`.
pub async fn token(State(state): Shared, Form(form): Form<TokenForm>) -> Result<Response, OAuthError> {
	let pair = match form.grant_type.as_str() {
		"authorization_code" => {
			let code =
				form.code.as_deref().ok_or_else(|| OAuthError::invalid_request("code is required"))?;

			state
				.bridge
				.exchange_code(
					&form.client_id,
					code,
					form.code_verifier.as_deref(),
					form.redirect_uri.as_deref(),
				)
				.await?
		},
		"refresh_token" => {
			let refresh = form
				.refresh_token
				.as_deref()
				.ok_or_else(|| OAuthError::invalid_request("refresh_token is required"))?;
			let scopes = form
				.scope
				.as_deref()
				.map(ScopeSet::from_str)
				.transpose()
				.map_err(|e| OAuthError::from(Error::from(ConfigError::from(e))))?;

			state.bridge.exchange_refresh_token(&form.client_id, refresh, scopes.as_ref()).await?
		},
		other =>
			return Err(OAuthError::new(
				StatusCode::BAD_REQUEST,
				"unsupported_grant_type",
				format!("grant_type `{other}` is not supported"),
			)),
	};
	let mut response = Json(pair).into_response();

	response.headers_mut().insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

	Ok(response)
}

/// `POST /register`.
pub async fn register(
	State(state): Shared,
	Json(metadata): Json<ClientMetadata>,
) -> Result<Response, OAuthError> {
	let client = state.bridge.register_client(metadata)?;

	Ok((StatusCode::CREATED, Json(client)).into_response())
}

/// `POST /revoke`. Always succeeds for a well-formed request.
pub async fn revoke(State(state): Shared, Form(form): Form<RevokeForm>) -> StatusCode {
	state.bridge.revoke(&form.token);

	StatusCode::OK
}

fn found(location: &Url) -> Response {
	match HeaderValue::from_str(location.as_str()) {
		Ok(value) => (StatusCode::FOUND, [(header::LOCATION, value)]).into_response(),
		Err(_) => OAuthError::new(
			StatusCode::INTERNAL_SERVER_ERROR,
			"server_error",
			"redirect location is not a valid header",
		)
		.into_response(),
	}
}
