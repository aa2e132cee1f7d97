//! Crate-wide error taxonomy shared by the bridge, broker, stores, and fetch engine.

// self
use crate::_prelude::*;

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),

	/// No upstream credential exists for the principal; the user must authorize again.
	#[error("No upstream credential is stored for principal `{principal}`; authorization is required.")]
	AuthRequired {
		/// Principal the lookup was performed for.
		principal: String,
	},
	/// Correlation state is unknown, already consumed, or older than its TTL.
	#[error("Authorization state is unknown or has expired.")]
	InvalidOrExpiredState,
	/// Authorization code is unknown, already consumed, or older than its TTL.
	#[error("Authorization code is unknown or has expired.")]
	InvalidOrExpiredCode,
	/// A code or token was presented by a client other than the one it was issued to.
	#[error("Credential was issued to a different client.")]
	ClientMismatch,
	/// Token request names a different redirect URI than the one the code was delivered to.
	#[error("Redirect URI does not match the authorization request.")]
	RedirectMismatch,
	/// Downstream request is malformed or violates the client's registration.
	#[error("Request is invalid: {reason}.")]
	InvalidRequest {
		/// Validation failure summary.
		reason: String,
	},
	/// Client identifier is not registered with the bridge.
	#[error("Client `{client_id}` is not registered.")]
	UnknownClient {
		/// Identifier presented by the caller.
		client_id: String,
	},
	/// PKCE verifier does not hash to the challenge bound at authorization time.
	#[error("PKCE code verifier does not match the bound challenge.")]
	PkceVerificationFailed,
	/// Token has been revoked and must not be reused.
	#[error("Token has been revoked.")]
	TokenRevoked,
	/// Token is past its expiry.
	#[error("Token has expired.")]
	TokenExpired,
	/// Token failed signature, issuer, or type validation.
	#[error("Token is invalid: {reason}.")]
	InvalidToken {
		/// Validation failure summary.
		reason: String,
	},

	/// Upstream rejected the grant or the client credentials.
	#[error("Upstream rejected the credentials: {reason}.")]
	UpstreamAuthFailure {
		/// Provider- or broker-supplied reason string.
		reason: String,
	},
	/// Upstream throttled the call.
	#[error("Upstream rate limit exceeded: {reason}.")]
	UpstreamRateLimited {
		/// Provider- or broker-supplied reason string.
		reason: String,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// Temporary upstream failure (timeout, network, 5xx, malformed payload).
	#[error(transparent)]
	UpstreamTransientFailure(#[from] TransientError),
	/// Upstream refused the operation for the granted scopes.
	#[error("Upstream denied permission: {reason}.")]
	UpstreamPermissionDenied {
		/// Provider- or broker-supplied reason string.
		reason: String,
	},
}
impl Error {
	/// Stable taxonomy kind for this error.
	pub fn kind(&self) -> ErrorKind {
		match self {
			Self::Storage(_) => ErrorKind::Storage,
			Self::Config(_) => ErrorKind::Config,
			Self::AuthRequired { .. } => ErrorKind::AuthRequired,
			Self::InvalidOrExpiredState => ErrorKind::InvalidOrExpiredState,
			Self::InvalidOrExpiredCode => ErrorKind::InvalidOrExpiredCode,
			Self::ClientMismatch => ErrorKind::ClientMismatch,
			Self::RedirectMismatch => ErrorKind::RedirectMismatch,
			Self::InvalidRequest { .. } => ErrorKind::InvalidRequest,
			Self::UnknownClient { .. } => ErrorKind::UnknownClient,
			Self::PkceVerificationFailed => ErrorKind::PkceVerificationFailed,
			Self::TokenRevoked => ErrorKind::TokenRevoked,
			Self::TokenExpired => ErrorKind::TokenExpired,
			Self::InvalidToken { .. } => ErrorKind::InvalidToken,
			Self::UpstreamAuthFailure { .. } => ErrorKind::UpstreamAuthFailure,
			Self::UpstreamRateLimited { .. } => ErrorKind::UpstreamRateLimited,
			Self::UpstreamTransientFailure(_) => ErrorKind::UpstreamTransientFailure,
			Self::UpstreamPermissionDenied { .. } => ErrorKind::UpstreamPermissionDenied,
		}
	}

	/// Recommended caller reaction for this error.
	pub fn class(&self) -> ErrorClass {
		self.kind().class()
	}

	/// Rebuilds an equivalent error for callers that waited on the same refresh flight.
	///
	/// Kind and message are preserved; sources that cannot be cloned travel as their
	/// display text.
	pub(crate) fn replicate(&self) -> Self {
		match self {
			Self::Storage(e) => Self::Storage(e.clone()),
			Self::Config(e) => Self::Config(e.replicate()),
			Self::AuthRequired { principal } => Self::AuthRequired { principal: principal.clone() },
			Self::InvalidOrExpiredState => Self::InvalidOrExpiredState,
			Self::InvalidOrExpiredCode => Self::InvalidOrExpiredCode,
			Self::ClientMismatch => Self::ClientMismatch,
			Self::RedirectMismatch => Self::RedirectMismatch,
			Self::InvalidRequest { reason } => Self::InvalidRequest { reason: reason.clone() },
			Self::UnknownClient { client_id } => Self::UnknownClient { client_id: client_id.clone() },
			Self::PkceVerificationFailed => Self::PkceVerificationFailed,
			Self::TokenRevoked => Self::TokenRevoked,
			Self::TokenExpired => Self::TokenExpired,
			Self::InvalidToken { reason } => Self::InvalidToken { reason: reason.clone() },
			Self::UpstreamAuthFailure { reason } =>
				Self::UpstreamAuthFailure { reason: reason.clone() },
			Self::UpstreamRateLimited { reason, retry_after } =>
				Self::UpstreamRateLimited { reason: reason.clone(), retry_after: *retry_after },
			Self::UpstreamTransientFailure(e) => Self::UpstreamTransientFailure(e.replicate()),
			Self::UpstreamPermissionDenied { reason } =>
				Self::UpstreamPermissionDenied { reason: reason.clone() },
		}
	}
}

/// Taxonomy labels surfaced to callers and logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
	/// See [`Error::Storage`].
	Storage,
	/// See [`Error::Config`].
	Config,
	/// See [`Error::AuthRequired`].
	AuthRequired,
	/// See [`Error::InvalidOrExpiredState`].
	InvalidOrExpiredState,
	/// See [`Error::InvalidOrExpiredCode`].
	InvalidOrExpiredCode,
	/// See [`Error::ClientMismatch`].
	ClientMismatch,
	/// See [`Error::RedirectMismatch`].
	RedirectMismatch,
	/// See [`Error::InvalidRequest`].
	InvalidRequest,
	/// See [`Error::UnknownClient`].
	UnknownClient,
	/// See [`Error::PkceVerificationFailed`].
	PkceVerificationFailed,
	/// See [`Error::TokenRevoked`].
	TokenRevoked,
	/// See [`Error::TokenExpired`].
	TokenExpired,
	/// See [`Error::InvalidToken`].
	InvalidToken,
	/// See [`Error::UpstreamAuthFailure`].
	UpstreamAuthFailure,
	/// See [`Error::UpstreamRateLimited`].
	UpstreamRateLimited,
	/// See [`Error::UpstreamTransientFailure`].
	UpstreamTransientFailure,
	/// See [`Error::UpstreamPermissionDenied`].
	UpstreamPermissionDenied,
}
impl ErrorKind {
	/// Returns the taxonomy name of the kind.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Storage => "Storage",
			Self::Config => "Config",
			Self::AuthRequired => "AuthRequired",
			Self::InvalidOrExpiredState => "InvalidOrExpiredState",
			Self::InvalidOrExpiredCode => "InvalidOrExpiredCode",
			Self::ClientMismatch => "ClientMismatch",
			Self::RedirectMismatch => "RedirectMismatch",
			Self::InvalidRequest => "InvalidRequest",
			Self::UnknownClient => "UnknownClient",
			Self::PkceVerificationFailed => "PkceVerificationFailed",
			Self::TokenRevoked => "TokenRevoked",
			Self::TokenExpired => "TokenExpired",
			Self::InvalidToken => "InvalidToken",
			Self::UpstreamAuthFailure => "UpstreamAuthFailure",
			Self::UpstreamRateLimited => "UpstreamRateLimited",
			Self::UpstreamTransientFailure => "UpstreamTransientFailure",
			Self::UpstreamPermissionDenied => "UpstreamPermissionDenied",
		}
	}

	/// Maps the kind onto the caller reaction it calls for.
	pub const fn class(self) -> ErrorClass {
		match self {
			Self::Storage | Self::UpstreamTransientFailure => ErrorClass::Retry,
			Self::UpstreamRateLimited => ErrorClass::Wait,
			Self::AuthRequired
			| Self::InvalidOrExpiredState
			| Self::InvalidOrExpiredCode
			| Self::TokenRevoked
			| Self::TokenExpired
			| Self::InvalidToken
			| Self::UpstreamAuthFailure => ErrorClass::Reauthorize,
			Self::Config
			| Self::ClientMismatch
			| Self::RedirectMismatch
			| Self::InvalidRequest
			| Self::UnknownClient
			| Self::PkceVerificationFailed
			| Self::UpstreamPermissionDenied => ErrorClass::Reject,
		}
	}
}
impl Display for ErrorKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// What a caller should do after receiving an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorClass {
	/// Retry later with backoff; the failure is temporary.
	Retry,
	/// Wait for the upstream quota to recover before retrying.
	Wait,
	/// Start the authorization flow again.
	Reauthorize,
	/// Do not retry; the request itself is wrong.
	Reject,
}

/// Configuration and validation failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// Provider descriptor failed validation.
	#[error(transparent)]
	Descriptor(#[from] crate::provider::ProviderDescriptorError),
	/// Descriptor does not enable the requested grant.
	#[error("Descriptor `{descriptor}` does not enable the {grant} grant.")]
	UnsupportedGrant {
		/// Provider identifier string.
		descriptor: String,
		/// Disabled grant label.
		grant: &'static str,
	},
	/// Request scopes cannot be normalized.
	#[error("Requested scopes are invalid.")]
	InvalidScope(#[from] crate::auth::ScopeValidationError),
	/// Identifier failed validation.
	#[error("Identifier is invalid.")]
	InvalidIdentifier(#[from] crate::auth::IdentifierError),
	/// Token info builder validation failed.
	#[error("Unable to build token info.")]
	TokenBuild(#[from] crate::auth::TokenInfoBuilderError),
	/// Token endpoint response omitted `expires_in`.
	#[error("Token endpoint response is missing expires_in.")]
	MissingExpiresIn,
	/// Token endpoint returned an excessively large `expires_in`.
	#[error("The expires_in value exceeds the supported range.")]
	ExpiresInOutOfRange,
	/// Token endpoint returned a non-positive duration.
	#[error("The expires_in value must be positive.")]
	NonPositiveExpiresIn,
	/// Local JWT could not be signed.
	#[error("Local token could not be signed.")]
	TokenSigning(#[source] jsonwebtoken::errors::Error),
	/// Pagination limits are unusable.
	#[error("Fetch limits are invalid: {reason}.")]
	InvalidFetchLimits {
		/// Which limit failed validation.
		reason: &'static str,
	},
	/// Required setting is absent.
	#[error("Required setting `{name}` is missing.")]
	MissingSetting {
		/// Setting name (environment variable or config key).
		name: &'static str,
	},
	/// Setting is present but unusable.
	#[error("Setting `{name}` is invalid: {reason}.")]
	InvalidSetting {
		/// Setting name (environment variable or config key).
		name: &'static str,
		/// Validation failure summary.
		reason: String,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}

	fn replicate(&self) -> Self {
		match self {
			Self::HttpClientBuild { source } =>
				Self::HttpClientBuild { source: Box::new(Replayed(source.to_string())) },
			Self::HttpRequest(e) => Self::HttpClientBuild { source: Box::new(Replayed(e.to_string())) },
			Self::Descriptor(e) => Self::Descriptor(e.clone()),
			Self::UnsupportedGrant { descriptor, grant } =>
				Self::UnsupportedGrant { descriptor: descriptor.clone(), grant: *grant },
			Self::InvalidScope(e) => Self::InvalidScope(e.clone()),
			Self::InvalidIdentifier(e) => Self::InvalidIdentifier(e.clone()),
			Self::TokenBuild(e) => Self::TokenBuild(e.clone()),
			Self::MissingExpiresIn => Self::MissingExpiresIn,
			Self::ExpiresInOutOfRange => Self::ExpiresInOutOfRange,
			Self::NonPositiveExpiresIn => Self::NonPositiveExpiresIn,
			Self::TokenSigning(e) => Self::TokenSigning(e.clone()),
			Self::InvalidFetchLimits { reason } => Self::InvalidFetchLimits { reason: *reason },
			Self::MissingSetting { name } => Self::MissingSetting { name: *name },
			Self::InvalidSetting { name, reason } =>
				Self::InvalidSetting { name: *name, reason: reason.clone() },
		}
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Temporary failure variants (safe to retry).
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// Token endpoint returned an unexpected but non-fatal response.
	#[error("Token endpoint returned an unexpected response: {message}.")]
	TokenEndpoint {
		/// Provider- or broker-supplied message summarizing the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// Token endpoint responded with malformed JSON that could not be parsed.
	#[error("Token endpoint returned malformed JSON.")]
	TokenResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::error::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// Resource endpoint failed with a retryable status.
	#[error("Resource endpoint returned an unexpected response: {message}.")]
	ResourceEndpoint {
		/// Summary of the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// Resource endpoint responded with a body that is not JSON.
	#[error("Resource endpoint returned malformed JSON.")]
	ResourceResponseParse(#[source] serde_json::Error),
	/// Underlying HTTP client reported a network failure or timeout.
	#[error("Network error occurred while calling the upstream provider.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the upstream provider.")]
	Io(#[from] std::io::Error),
}
impl TransientError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}

	fn replicate(&self) -> Self {
		match self {
			Self::TokenEndpoint { message, status, retry_after } => Self::TokenEndpoint {
				message: message.clone(),
				status: *status,
				retry_after: *retry_after,
			},
			Self::TokenResponseParse { source, status } =>
				Self::TokenEndpoint { message: source.to_string(), status: *status, retry_after: None },
			Self::ResourceEndpoint { message, status } =>
				Self::ResourceEndpoint { message: message.clone(), status: *status },
			Self::ResourceResponseParse(e) =>
				Self::ResourceEndpoint { message: e.to_string(), status: None },
			Self::Network { source } => Self::network(Replayed(source.to_string())),
			Self::Io(e) => Self::Io(std::io::Error::new(e.kind(), e.to_string())),
		}
	}
}

/// Display-only stand-in for a source that could not be cloned.
#[derive(Debug, ThisError)]
#[error("{0}")]
struct Replayed(String);
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransientError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn kinds_map_onto_caller_reactions() {
		assert_eq!(Error::AuthRequired { principal: "u1".into() }.class(), ErrorClass::Reauthorize);
		assert_eq!(Error::TokenRevoked.class(), ErrorClass::Reauthorize);
		assert_eq!(
			Error::UpstreamRateLimited { reason: "slow down".into(), retry_after: None }.class(),
			ErrorClass::Wait
		);
		assert_eq!(
			Error::from(TransientError::ResourceEndpoint { message: "502".into(), status: Some(502) })
				.class(),
			ErrorClass::Retry
		);
		assert_eq!(Error::ClientMismatch.class(), ErrorClass::Reject);
	}

	#[test]
	fn replicas_keep_kind_and_message() {
		let originals = [
			Error::from(TransientError::network(std::io::Error::other("connection reset"))),
			Error::UpstreamRateLimited {
				reason: "slow down".into(),
				retry_after: Some(Duration::seconds(3)),
			},
			Error::from(ConfigError::MissingExpiresIn),
			Error::from(crate::store::StoreError::Backend { message: "redis down".into() }),
		];

		for original in originals {
			let copy = original.replicate();

			assert_eq!(copy.kind(), original.kind());
			assert_eq!(copy.to_string(), original.to_string());
		}
	}

	#[test]
	fn kind_names_match_taxonomy() {
		assert_eq!(Error::InvalidOrExpiredCode.kind().to_string(), "InvalidOrExpiredCode");
		assert_eq!(
			Error::UpstreamPermissionDenied { reason: "scope".into() }.kind().as_str(),
			"UpstreamPermissionDenied"
		);
	}
}
