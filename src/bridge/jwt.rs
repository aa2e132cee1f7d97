//! HS256 issuer for the bridge's own access and refresh tokens.

// crates.io
use jsonwebtoken::{
	Algorithm, DecodingKey, EncodingKey, Header, Validation, errors::ErrorKind as JwtErrorKind,
};
use rand::{Rng, distr::Alphanumeric};
// self
use crate::{
	_prelude::*,
	auth::{ClientId, PrincipalId, ScopeSet},
	error::ConfigError,
};

const JTI_LEN: usize = 16;

/// Which half of a local token pair a JWT represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
	/// Presented as a bearer credential on protected routes.
	Access,
	/// Presented to the token endpoint to rotate the pair.
	Refresh,
}
impl TokenType {
	/// Wire name of the type claim.
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Access => "access",
			Self::Refresh => "refresh",
		}
	}
}

/// Claims carried by every local JWT.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
	/// Principal the token acts for.
	pub user_id: String,
	/// Client the token was issued to.
	pub client_id: String,
	/// Granted scopes.
	pub scopes: Vec<String>,
	/// Access or refresh.
	#[serde(rename = "type")]
	pub token_type: TokenType,
	/// Issued-at, seconds since the epoch.
	pub iat: i64,
	/// Expiry, seconds since the epoch.
	pub exp: i64,
	/// Issuer, the bridge's public base URL.
	pub iss: String,
	/// Random token identifier.
	pub jti: String,
}

/// Local token pair returned from the token endpoint.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
	/// Signed access JWT.
	pub access_token: String,
	/// Always `Bearer`.
	pub token_type: String,
	/// Access-token lifetime in seconds.
	pub expires_in: i64,
	/// Signed refresh JWT.
	pub refresh_token: String,
	/// Space-delimited granted scopes.
	pub scope: String,
}
impl Debug for TokenPair {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenPair")
			.field("access_token", &"<redacted>")
			.field("token_type", &self.token_type)
			.field("expires_in", &self.expires_in)
			.field("refresh_token", &"<redacted>")
			.field("scope", &self.scope)
			.finish()
	}
}

/// Signs and verifies local JWTs with a shared HMAC secret.
#[derive(Clone)]
pub struct JwtIssuer {
	encoding: EncodingKey,
	decoding: DecodingKey,
	issuer: String,
	access_ttl: Duration,
	refresh_ttl: Duration,
}
impl JwtIssuer {
	/// Default access-token lifetime.
	pub const DEFAULT_ACCESS_TTL: Duration = Duration::hours(1);
	/// Default refresh-token lifetime.
	pub const DEFAULT_REFRESH_TTL: Duration = Duration::days(30);

	/// Creates an issuer signing with `secret` and stamping `issuer` into `iss`.
	pub fn new(secret: &[u8], issuer: impl Into<String>) -> Self {
		Self {
			encoding: EncodingKey::from_secret(secret),
			decoding: DecodingKey::from_secret(secret),
			issuer: issuer.into(),
			access_ttl: Self::DEFAULT_ACCESS_TTL,
			refresh_ttl: Self::DEFAULT_REFRESH_TTL,
		}
	}

	/// Overrides the access-token lifetime.
	pub fn with_access_ttl(mut self, ttl: Duration) -> Self {
		self.access_ttl = ttl;

		self
	}

	/// Overrides the refresh-token lifetime.
	pub fn with_refresh_ttl(mut self, ttl: Duration) -> Self {
		self.refresh_ttl = ttl;

		self
	}

	/// Issuer stamped into every token.
	pub fn issuer(&self) -> &str {
		&self.issuer
	}

	/// Access-token lifetime.
	pub fn access_ttl(&self) -> Duration {
		self.access_ttl
	}

	/// Mints an access and refresh pair for `principal` at `now`.
	pub fn issue_pair_at(
		&self,
		principal: &PrincipalId,
		client_id: &ClientId,
		scopes: &ScopeSet,
		now: OffsetDateTime,
	) -> Result<TokenPair> {
		let access_token = self.issue_at(TokenType::Access, principal, client_id, scopes, now)?;
		let refresh_token = self.issue_at(TokenType::Refresh, principal, client_id, scopes, now)?;

		Ok(TokenPair {
			access_token,
			token_type: "Bearer".into(),
			expires_in: self.access_ttl.whole_seconds(),
			refresh_token,
			scope: scopes.normalized(),
		})
	}

	/// Signs one token of `token_type`.
	pub fn issue_at(
		&self,
		token_type: TokenType,
		principal: &PrincipalId,
		client_id: &ClientId,
		scopes: &ScopeSet,
		now: OffsetDateTime,
	) -> Result<String> {
		let ttl = match token_type {
			TokenType::Access => self.access_ttl,
			TokenType::Refresh => self.refresh_ttl,
		};
		let iat = now.unix_timestamp();
		let claims = Claims {
			user_id: principal.to_string(),
			client_id: client_id.to_string(),
			scopes: scopes.to_vec(),
			token_type,
			iat,
			exp: iat + ttl.whole_seconds(),
			iss: self.issuer.clone(),
			jti: rand::rng().sample_iter(Alphanumeric).take(JTI_LEN).map(char::from).collect(),
		};

		jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
			.map_err(|e| ConfigError::TokenSigning(e).into())
	}

	/// Verifies signature, issuer, type and expiry at `now`.
	pub fn verify_at(&self, token: &str, expected: TokenType, now: OffsetDateTime) -> Result<Claims> {
		let claims = self.decode(token)?;

		if claims.token_type != expected {
			return Err(Error::InvalidToken {
				reason: format!("expected a {} token", expected.as_str()),
			});
		}
		if now.unix_timestamp() >= claims.exp {
			return Err(Error::TokenExpired);
		}

		Ok(claims)
	}

	/// Verifies signature and issuer only, ignoring type and expiry.
	pub fn decode(&self, token: &str) -> Result<Claims> {
		let mut validation = Validation::new(Algorithm::HS256);

		validation.leeway = 0;
		validation.validate_exp = false;
		validation.set_issuer(&[self.issuer.as_str()]);
		validation.set_required_spec_claims(&["exp", "iss"]);

		jsonwebtoken::decode::<Claims>(token, &self.decoding, &validation)
			.map(|data| data.claims)
			.map_err(|e| match e.kind() {
				JwtErrorKind::ExpiredSignature => Error::TokenExpired,
				_ => Error::InvalidToken { reason: e.to_string() },
			})
	}
}
impl Debug for JwtIssuer {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("JwtIssuer")
			.field("issuer", &self.issuer)
			.field("access_ttl", &self.access_ttl)
			.field("refresh_ttl", &self.refresh_ttl)
			.finish_non_exhaustive()
	}
}
