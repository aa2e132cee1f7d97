//! Classification of upstream token-endpoint failures.
//!
//! The OAuth layer reduces every failed token call to a [`TokenFailure`] of plain data and
//! asks the configured [`ProviderStrategy`] what it means. The answer, an
//! [`UpstreamFailure`], converts into the crate [`Error`].

// self
use crate::{_prelude::*, error::TransientError, http::ResponseMetadata, provider::GrantType};

const BODY_PREVIEW_CHARS: usize = 256;

/// Well-known OAuth `error` codes, matched case-insensitively.
const OAUTH_CODES: &[(&str, UpstreamFailure)] = &[
	("invalid_grant", UpstreamFailure::Grant),
	("access_denied", UpstreamFailure::Grant),
	("invalid_client", UpstreamFailure::Client),
	("unauthorized_client", UpstreamFailure::Client),
	("invalid_scope", UpstreamFailure::Scope),
	("insufficient_scope", UpstreamFailure::Scope),
	("slow_down", UpstreamFailure::Throttled),
	("rate_limit_exceeded", UpstreamFailure::Throttled),
	("temporarily_unavailable", UpstreamFailure::Transient),
	("server_error", UpstreamFailure::Transient),
];

/// Substrings searched in free-form descriptions and non-JSON bodies.
const TEXT_HINTS: &[(&str, UpstreamFailure)] = &[
	("invalid_grant", UpstreamFailure::Grant),
	("invalid_client", UpstreamFailure::Client),
	("insufficient_scope", UpstreamFailure::Scope),
	("invalid_scope", UpstreamFailure::Scope),
	("rate limit", UpstreamFailure::Throttled),
	("too many requests", UpstreamFailure::Throttled),
	("temporarily_unavailable", UpstreamFailure::Transient),
];

/// Decides what a failed token call means for the caller.
pub trait ProviderStrategy
where
	Self: Send + Sync,
{
	/// Classifies `failure`.
	fn classify(&self, failure: &TokenFailure) -> UpstreamFailure;
}

/// What a failed token call amounts to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpstreamFailure {
	/// The code or refresh token is no longer good.
	Grant,
	/// The bridge's client credentials were refused.
	Client,
	/// The grant does not cover the request.
	Scope,
	/// Upstream is throttling.
	Throttled,
	/// Worth retrying later.
	Transient,
}
impl UpstreamFailure {
	/// Builds the crate error for this classification.
	pub fn into_error(self, message: String, failure: &TokenFailure) -> Error {
		match self {
			Self::Grant | Self::Client => Error::UpstreamAuthFailure { reason: message },
			Self::Scope => Error::UpstreamPermissionDenied { reason: message },
			Self::Throttled =>
				Error::UpstreamRateLimited { reason: message, retry_after: failure.retry_after },
			Self::Transient => failure.transient(message),
		}
	}
}

/// Plain-data view of one failed token call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenFailure {
	/// Grant being exchanged.
	pub grant: GrantType,
	/// HTTP status, when a response arrived.
	pub status: Option<u16>,
	/// `Retry-After`, when upstream sent one.
	pub retry_after: Option<Duration>,
	/// OAuth `error` field.
	pub error_code: Option<String>,
	/// OAuth `error_description` field.
	pub description: Option<String>,
	/// First characters of a non-OAuth body.
	pub body: Option<String>,
	/// The request never got a response.
	pub network: bool,
}
impl TokenFailure {
	/// Starts a failure for `grant`, seeded with whatever the transport captured.
	pub fn new(grant: GrantType, metadata: Option<&ResponseMetadata>) -> Self {
		Self {
			grant,
			status: metadata.and_then(|m| m.status),
			retry_after: metadata.and_then(|m| m.retry_after),
			error_code: None,
			description: None,
			body: None,
			network: false,
		}
	}

	/// Records the OAuth error fields.
	pub fn with_oauth(mut self, code: impl Into<String>, description: Option<String>) -> Self {
		self.error_code = Some(code.into());
		self.description = description;

		self
	}

	/// Records a body preview.
	pub fn with_body(mut self, body: &str) -> Self {
		let mut preview: String = body.chars().take(BODY_PREVIEW_CHARS).collect();

		if body.chars().nth(BODY_PREVIEW_CHARS).is_some() {
			preview.push('…');
		}

		self.body = Some(preview);

		self
	}

	/// Marks the failure as a transport failure.
	pub fn with_network(mut self) -> Self {
		self.network = true;

		self
	}

	/// Status if it signals an HTTP error.
	pub fn error_status(&self) -> Option<u16> {
		self.status.filter(|status| *status >= 400)
	}

	pub(crate) fn transient(&self, message: impl Into<String>) -> Error {
		TransientError::TokenEndpoint {
			message: message.into(),
			status: self.status,
			retry_after: self.retry_after,
		}
		.into()
	}
}

/// RFC 6749 driven classification.
///
/// Transport failures are transient and a 429 is always throttling. Otherwise the OAuth
/// `error` code decides, then hints in the description or body, then the status.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultProviderStrategy;
impl ProviderStrategy for DefaultProviderStrategy {
	fn classify(&self, failure: &TokenFailure) -> UpstreamFailure {
		if failure.network {
			return UpstreamFailure::Transient;
		}
		if failure.status == Some(429) {
			return UpstreamFailure::Throttled;
		}

		[failure.error_code.as_deref(), failure.description.as_deref()]
			.into_iter()
			.flatten()
			.find_map(lookup_code)
			.or_else(|| {
				[failure.description.as_deref(), failure.body.as_deref()]
					.into_iter()
					.flatten()
					.find_map(search_hints)
			})
			.unwrap_or_else(|| from_status(failure.status))
	}
}

fn lookup_code(value: &str) -> Option<UpstreamFailure> {
	OAUTH_CODES.iter().find(|(code, _)| value.eq_ignore_ascii_case(code)).map(|(_, kind)| *kind)
}

fn search_hints(text: &str) -> Option<UpstreamFailure> {
	let lowered = text.to_ascii_lowercase();

	TEXT_HINTS.iter().find(|(hint, _)| lowered.contains(hint)).map(|(_, kind)| *kind)
}

fn from_status(status: Option<u16>) -> UpstreamFailure {
	match status {
		Some(400 | 404 | 410) => UpstreamFailure::Grant,
		Some(401) => UpstreamFailure::Client,
		Some(403) => UpstreamFailure::Scope,
		Some(429) => UpstreamFailure::Throttled,
		_ => UpstreamFailure::Transient,
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn failure(status: u16) -> TokenFailure {
		TokenFailure::new(
			GrantType::RefreshToken,
			Some(&ResponseMetadata { status: Some(status), retry_after: None }),
		)
	}

	fn classify(failure: TokenFailure) -> UpstreamFailure {
		DefaultProviderStrategy.classify(&failure)
	}

	#[test]
	fn oauth_code_beats_status() {
		assert_eq!(classify(failure(500).with_oauth("INVALID_GRANT", None)), UpstreamFailure::Grant);
		assert_eq!(
			classify(failure(400).with_oauth("custom", Some("Refresh token revoked: invalid_grant".into()))),
			UpstreamFailure::Grant
		);
		assert_eq!(
			classify(failure(429).with_oauth("invalid_grant", None)),
			UpstreamFailure::Throttled
		);
	}

	#[test]
	fn statuses_and_bodies_fill_the_gaps() {
		assert_eq!(classify(failure(401)), UpstreamFailure::Client);
		assert_eq!(classify(failure(403)), UpstreamFailure::Scope);
		assert_eq!(classify(failure(503)), UpstreamFailure::Transient);
		assert_eq!(classify(failure(502).with_body("Too Many Requests")), UpstreamFailure::Throttled);
		assert_eq!(
			classify(TokenFailure::new(GrantType::AuthorizationCode, None).with_network()),
			UpstreamFailure::Transient
		);
	}

	#[test]
	fn classifications_become_crate_errors() {
		let throttled = TokenFailure::new(
			GrantType::RefreshToken,
			Some(&ResponseMetadata { status: Some(429), retry_after: Some(Duration::seconds(3)) }),
		);

		assert!(matches!(
			UpstreamFailure::Grant.into_error("expired".into(), &failure(400)),
			Error::UpstreamAuthFailure { .. }
		));
		assert!(matches!(
			UpstreamFailure::Scope.into_error("scope".into(), &failure(403)),
			Error::UpstreamPermissionDenied { .. }
		));
		assert!(matches!(
			UpstreamFailure::Throttled.into_error("slow".into(), &throttled),
			Error::UpstreamRateLimited { retry_after: Some(_), .. }
		));
		assert!(matches!(
			UpstreamFailure::Transient.into_error("down".into(), &failure(502)),
			Error::UpstreamTransientFailure(_)
		));
	}

	#[test]
	fn body_preview_is_capped() {
		let preview = failure(500).with_body(&"x".repeat(400)).body.expect("Preview should be set.");

		assert_eq!(preview.chars().count(), BODY_PREVIEW_CHARS + 1);
		assert_eq!(failure(500).with_body("short").body.as_deref(), Some("short"));
	}
}
