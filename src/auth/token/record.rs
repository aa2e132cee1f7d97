//! Upstream credential records, their persisted form, and builders.

// self
use crate::{_prelude::*, auth::token::secret::TokenSecret};

/// Errors produced by [`TokenInfoBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum TokenInfoBuilderError {
	/// Issued when no access token value was provided.
	#[error("Access token is required.")]
	MissingAccessToken,
	/// Issued when no expiry (absolute or relative) was configured.
	#[error("Expiry must be supplied via expires_at or expires_in.")]
	MissingExpiry,
}

/// Upstream credential pair held for one principal.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenInfo {
	/// Upstream access token; callers must avoid logging it.
	pub access_token: TokenSecret,
	/// Upstream refresh token, if the provider issued one.
	#[serde(default)]
	pub refresh_token: Option<TokenSecret>,
	/// Expiry instant as Unix epoch milliseconds.
	pub expires_at: i64,
	/// Space-delimited scope string granted upstream.
	#[serde(default)]
	pub scope: String,
}
impl TokenInfo {
	/// Returns a builder for assembling a credential from a token endpoint response.
	pub fn builder() -> TokenInfoBuilder {
		TokenInfoBuilder::default()
	}

	/// Expiry as an [`OffsetDateTime`].
	pub fn expires_at_time(&self) -> OffsetDateTime {
		from_epoch_ms(self.expires_at)
	}

	/// Returns `true` when the access token is empty or falls inside the refresh buffer at `now`.
	pub fn needs_refresh_at(&self, now: OffsetDateTime, buffer: Duration) -> bool {
		if self.access_token.is_empty() {
			return true;
		}

		let threshold = self.expires_at.saturating_sub(buffer.whole_milliseconds() as i64);

		epoch_ms(now) >= threshold
	}

	/// Returns `true` when the access token is past its expiry at `now`.
	pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
		epoch_ms(now) >= self.expires_at
	}
}
impl Debug for TokenInfo {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenInfo")
			.field("access_token", &"<redacted>")
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("expires_at", &self.expires_at)
			.field("scope", &self.scope)
			.finish()
	}
}

/// Persisted form of a [`TokenInfo`] with write bookkeeping.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredTokenInfo {
	/// Credential payload.
	#[serde(flatten)]
	pub token: TokenInfo,
	/// First write instant (epoch milliseconds); preserved across updates.
	pub created_at: i64,
	/// Latest write instant (epoch milliseconds).
	pub updated_at: i64,
}
impl StoredTokenInfo {
	/// Stamps `token` for a write at `now`, carrying `created_at` over from `previous`.
	pub fn stamp(token: TokenInfo, previous: Option<&StoredTokenInfo>, now: OffsetDateTime) -> Self {
		let now = epoch_ms(now);
		let created_at = previous.map(|p| p.created_at).unwrap_or(now);

		Self { token, created_at, updated_at: now }
	}
}

/// Builder for [`TokenInfo`].
#[derive(Clone, Debug, Default)]
pub struct TokenInfoBuilder {
	access_token: Option<TokenSecret>,
	refresh_token: Option<TokenSecret>,
	scope: Option<String>,
	issued_at: Option<OffsetDateTime>,
	expires_at: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
}
impl TokenInfoBuilder {
	/// Sets the issued-at instant used for relative expiry.
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Sets an absolute expiry instant.
	pub fn expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets a relative expiry duration from the issued instant.
	pub fn expires_in(mut self, duration: Duration) -> Self {
		self.expires_in = Some(duration);

		self
	}

	/// Provides the access token value.
	pub fn access_token(mut self, token: impl Into<String>) -> Self {
		self.access_token = Some(TokenSecret::new(token));

		self
	}

	/// Provides the refresh token value.
	pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
		self.refresh_token = Some(TokenSecret::new(token));

		self
	}

	/// Provides an already wrapped refresh token, if any.
	pub fn refresh_secret(mut self, token: Option<TokenSecret>) -> Self {
		self.refresh_token = token;

		self
	}

	/// Provides the granted scope string.
	pub fn scope(mut self, scope: impl Into<String>) -> Self {
		self.scope = Some(scope.into());

		self
	}

	/// Consumes the builder and produces a [`TokenInfo`].
	pub fn build(self) -> Result<TokenInfo, TokenInfoBuilderError> {
		let access_token = self.access_token.ok_or(TokenInfoBuilderError::MissingAccessToken)?;
		let issued_at = self.issued_at.unwrap_or_else(OffsetDateTime::now_utc);
		let expires_at = match (self.expires_at, self.expires_in) {
			(Some(instant), _) => instant,
			(None, Some(delta)) => issued_at + delta,
			(None, None) => return Err(TokenInfoBuilderError::MissingExpiry),
		};

		Ok(TokenInfo {
			access_token,
			refresh_token: self.refresh_token,
			expires_at: epoch_ms(expires_at),
			scope: self.scope.unwrap_or_default(),
		})
	}
}

/// Converts an instant to Unix epoch milliseconds.
pub fn epoch_ms(instant: OffsetDateTime) -> i64 {
	(instant.unix_timestamp_nanos() / 1_000_000) as i64
}

/// Converts Unix epoch milliseconds back to an instant, clamping unrepresentable values.
pub fn from_epoch_ms(ms: i64) -> OffsetDateTime {
	OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000)
		.unwrap_or(OffsetDateTime::UNIX_EPOCH)
}
