//! Downstream HTTP surface built on axum.
//!
//! [`router`] exposes the authorization-server endpoints backed by an
//! [`AuthorizationBridge`]. [`protect`] wraps a caller's data routes in
//! [`require_bearer`], which verifies the local access token and binds its principal to
//! the request task through [`context::scope`] so broker and fetch calls can omit it.

pub mod handlers;

// crates.io
use axum::{
	Json, Router,
	extract::{Request, State},
	http::{HeaderValue, StatusCode, header},
	middleware::{self, Next},
	response::{IntoResponse, Response},
	routing::{get, post},
};
// self
use crate::{
	_prelude::*,
	bridge::AuthorizationBridge,
	context,
	error::{ConfigError, ErrorKind},
};

/// Shared state handed to every handler.
#[derive(Clone, Debug)]
pub struct ServerState {
	/// Authorization bridge backing the endpoints.
	pub bridge: Arc<AuthorizationBridge>,
	/// Public base URL advertised in metadata.
	pub public_base: Url,
}
impl ServerState {
	/// Creates state for `bridge` advertised under `public_base`.
	pub fn new(bridge: Arc<AuthorizationBridge>, public_base: Url) -> Self {
		Self { bridge, public_base }
	}

	fn endpoint(&self, path: &str) -> String {
		format!("{}{path}", self.public_base.as_str().trim_end_matches('/'))
	}
}

/// Builds the authorization-server router.
pub fn router(state: ServerState) -> Router {
	Router::new()
		.route("/.well-known/oauth-authorization-server", get(handlers::metadata))
		.route("/authorize", get(handlers::authorize))
		.route("/oauth/callback", get(handlers::callback))
		.route("/token", post(handlers::token))
		.route("/register", post(handlers::register))
		.route("/revoke", post(handlers::revoke))
		.with_state(Arc::new(state))
}

/// Applies [`require_bearer`] to every route of `router`.
pub fn protect(router: Router, bridge: Arc<AuthorizationBridge>) -> Router {
	router.layer(middleware::from_fn_with_state(bridge, require_bearer))
}

/// Verifies the bearer token and runs the inner service inside the principal's scope.
///
/// On success the [`VerifiedAccess`](crate::bridge::VerifiedAccess) is inserted into the
/// request extensions.
pub async fn require_bearer(
	State(bridge): State<Arc<AuthorizationBridge>>,
	mut req: Request,
	next: Next,
) -> Response {
	let token = req
		.headers()
		.get(header::AUTHORIZATION)
		.and_then(|v| v.to_str().ok())
		.and_then(|v| v.strip_prefix("Bearer "))
		.map(str::trim);
	let Some(token) = token else {
		return OAuthError::invalid_token("missing bearer token").into_response();
	};

	match bridge.verify_access_token(token) {
		Ok(access) => {
			let principal = access.principal.clone();

			req.extensions_mut().insert(access);

			context::scope(principal, next.run(req)).await
		},
		Err(e) => OAuthError::invalid_token(e.to_string()).into_response(),
	}
}

/// RFC 6749 §5.2 error body with its HTTP status.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OAuthError {
	/// HTTP status.
	pub status: StatusCode,
	/// RFC error code.
	pub error: &'static str,
	/// Human-readable description.
	pub description: String,
}
impl OAuthError {
	/// Creates an error body.
	pub fn new(status: StatusCode, error: &'static str, description: impl Into<String>) -> Self {
		Self { status, error, description: description.into() }
	}

	/// `400 invalid_request`.
	pub fn invalid_request(description: impl Into<String>) -> Self {
		Self::new(StatusCode::BAD_REQUEST, "invalid_request", description)
	}

	/// `401 invalid_token`, used by the bearer middleware.
	pub fn invalid_token(description: impl Into<String>) -> Self {
		Self::new(StatusCode::UNAUTHORIZED, "invalid_token", description)
	}
}
impl From<Error> for OAuthError {
	fn from(e: Error) -> Self {
		let description = e.to_string();
		let (status, error) = match (&e, e.kind()) {
			(Error::Config(ConfigError::InvalidScope(_)), _) =>
				(StatusCode::BAD_REQUEST, "invalid_scope"),
			(_, ErrorKind::UnknownClient) => (StatusCode::UNAUTHORIZED, "invalid_client"),
			(_, ErrorKind::InvalidRequest) => (StatusCode::BAD_REQUEST, "invalid_request"),
			(
				_,
				ErrorKind::AuthRequired
				| ErrorKind::InvalidOrExpiredState
				| ErrorKind::InvalidOrExpiredCode
				| ErrorKind::ClientMismatch
				| ErrorKind::RedirectMismatch
				| ErrorKind::PkceVerificationFailed
				| ErrorKind::TokenRevoked
				| ErrorKind::TokenExpired
				| ErrorKind::InvalidToken
				| ErrorKind::UpstreamAuthFailure,
			) => (StatusCode::BAD_REQUEST, "invalid_grant"),
			(_, ErrorKind::UpstreamPermissionDenied) => (StatusCode::FORBIDDEN, "access_denied"),
			(_, ErrorKind::UpstreamRateLimited | ErrorKind::UpstreamTransientFailure | ErrorKind::Storage) =>
				(StatusCode::SERVICE_UNAVAILABLE, "temporarily_unavailable"),
			(_, ErrorKind::Config) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error"),
		};

		Self { status, error, description }
	}
}
impl IntoResponse for OAuthError {
	fn into_response(self) -> Response {
		let body = Json(serde_json::json!({
			"error": self.error,
			"error_description": self.description,
		}));
		let mut response = (self.status, body).into_response();

		if self.status == StatusCode::UNAUTHORIZED {
			let challenge = format!("Bearer error=\"{}\"", self.error);

			if let Ok(value) = HeaderValue::from_str(&challenge) {
				response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
			}
		}

		response
	}
}
