//! Downstream OAuth 2.0 authorization server layered over the upstream code flow.
//!
//! The bridge never hands upstream credentials to downstream clients. It correlates the
//! downstream authorize request with the upstream redirect through an opaque `state`,
//! asks the [`CredentialBroker`] to exchange and persist the upstream code under a freshly
//! minted principal, and then issues its own one-time code. That code is redeemed for a
//! locally signed JWT pair.
//!
//! Pending authorizations live for [`PENDING_TTL`] and issued codes for [`CODE_TTL`]; both
//! are single use and are garbage-collected whenever a new authorization starts.

pub mod jwt;
pub mod pkce;
pub mod registry;
pub mod revocation;

pub use jwt::*;
pub use pkce::*;
pub use registry::*;
pub use revocation::*;

// crates.io
use rand::{Rng, distr::Alphanumeric};
// self
use crate::{
	_prelude::*,
	auth::{ClientId, PrincipalId, ScopeSet},
	broker::CredentialBroker,
	obs::{self, FlowKind},
};

/// Lifetime of a pending upstream authorization.
pub const PENDING_TTL: Duration = Duration::minutes(10);
/// Lifetime of a locally issued authorization code.
pub const CODE_TTL: Duration = Duration::minutes(5);

const OPAQUE_LEN: usize = 32;
const PRINCIPAL_SUFFIX_LEN: usize = 16;
const CLIENT_ID_LEN: usize = 24;

type Clock = Arc<dyn Fn() -> OffsetDateTime + Send + Sync>;

/// Parameters of the downstream authorize request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownstreamParams {
	/// Where the downstream client expects the local code.
	pub redirect_uri: Url,
	/// Scopes requested by the downstream client.
	pub scopes: ScopeSet,
	/// Downstream `state`, echoed back verbatim.
	pub state: Option<String>,
	/// PKCE challenge bound to the request.
	pub code_challenge: Option<PkceChallenge>,
}

/// Downstream request waiting for the upstream redirect.
#[derive(Clone, Debug)]
pub struct PendingAuthorization {
	/// Requesting client.
	pub client_id: ClientId,
	/// Original downstream parameters.
	pub params: DownstreamParams,
	/// Creation instant.
	pub created_at: OffsetDateTime,
}

/// One-time local code awaiting redemption.
#[derive(Clone, Debug)]
pub struct IssuedCode {
	/// Principal the upstream credential was stored under.
	pub principal: PrincipalId,
	/// Client the code was issued to.
	pub client_id: ClientId,
	/// PKCE challenge carried over from the authorize request.
	pub code_challenge: Option<PkceChallenge>,
	/// Downstream redirect the code was delivered to.
	pub redirect_uri: Url,
	/// Scopes granted to the code.
	pub scopes: ScopeSet,
	/// Creation instant.
	pub created_at: OffsetDateTime,
}

/// Caller identity extracted from a verified local access token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedAccess {
	/// Principal the token acts for.
	pub principal: PrincipalId,
	/// Client the token was issued to.
	pub client_id: ClientId,
	/// Granted scopes.
	pub scopes: ScopeSet,
	/// Expiry instant.
	pub expires_at: OffsetDateTime,
}

/// Authorization server state shared by every downstream request.
pub struct AuthorizationBridge {
	broker: Arc<dyn CredentialBroker>,
	jwt: JwtIssuer,
	callback_uri: Url,
	clients: ClientRegistry,
	pending: Mutex<HashMap<String, PendingAuthorization>>,
	issued: Mutex<HashMap<String, IssuedCode>>,
	revoked: RevocationList,
	clock: Clock,
}
impl AuthorizationBridge {
	/// Creates a bridge that redirects the upstream back to `callback_uri`.
	pub fn new(broker: Arc<dyn CredentialBroker>, jwt: JwtIssuer, callback_uri: Url) -> Self {
		Self {
			broker,
			jwt,
			callback_uri,
			clients: ClientRegistry::default(),
			pending: Mutex::new(HashMap::new()),
			issued: Mutex::new(HashMap::new()),
			revoked: RevocationList::default(),
			clock: Arc::new(OffsetDateTime::now_utc),
		}
	}

	/// Replaces the wall clock used for TTLs and token timestamps.
	pub fn with_clock<F>(mut self, clock: F) -> Self
	where
		F: 'static + Fn() -> OffsetDateTime + Send + Sync,
	{
		self.clock = Arc::new(clock);

		self
	}

	/// Upstream callback URI.
	pub fn callback_uri(&self) -> &Url {
		&self.callback_uri
	}

	/// JWT issuer backing local tokens.
	pub fn jwt(&self) -> &JwtIssuer {
		&self.jwt
	}

	/// Starts a downstream authorization and returns the upstream authorize URL.
	pub fn authorize(&self, client_id: &str, params: DownstreamParams) -> Result<Url> {
		let client = self.registered(client_id)?;

		if !client.allows_redirect(&params.redirect_uri) {
			return Err(Error::InvalidRequest {
				reason: "redirect_uri is not registered for this client".into(),
			});
		}

		let now = self.now();

		self.collect_expired(now);

		let state = mint(OPAQUE_LEN);
		let url = self.broker.authorization_url(&state, &self.callback_uri)?;

		self.pending.lock().insert(
			state,
			PendingAuthorization { client_id: client.client_id, params, created_at: now },
		);
		obs::info_event(FlowKind::Authorize, "pending_stored", client_id);

		Ok(url)
	}

	/// Completes the upstream leg and returns the downstream redirect carrying a local code.
	pub async fn handle_upstream_callback(&self, code: &str, state: &str) -> Result<Url> {
		obs::observe(FlowKind::UpstreamCallback, "handle_upstream_callback", async move {
			let pending = self.take_pending(state)?;
			let principal = PrincipalId::from_minted(format!(
				"{}:{}",
				pending.client_id,
				mint(PRINCIPAL_SUFFIX_LEN)
			));

			self.broker.exchange_authorization_code(&principal, code, &self.callback_uri).await?;

			let local_code = mint(OPAQUE_LEN);
			let PendingAuthorization { client_id, params, .. } = pending;
			let mut redirect = params.redirect_uri.clone();

			{
				let mut pairs = redirect.query_pairs_mut();

				pairs.append_pair("code", &local_code);

				if let Some(state) = &params.state {
					pairs.append_pair("state", state);
				}
			}

			self.issued.lock().insert(
				local_code,
				IssuedCode {
					principal,
					client_id,
					code_challenge: params.code_challenge,
					redirect_uri: params.redirect_uri,
					scopes: params.scopes,
					created_at: self.now(),
				},
			);

			Ok(redirect)
		})
		.await
	}

	/// Forwards an upstream authorization error to the downstream redirect.
	pub fn handle_upstream_error(
		&self,
		state: &str,
		error: &str,
		description: Option<&str>,
	) -> Result<Url> {
		let pending = self.take_pending(state)?;
		let mut redirect = pending.params.redirect_uri;

		{
			let mut pairs = redirect.query_pairs_mut();

			pairs.append_pair("error", error);

			if let Some(description) = description {
				pairs.append_pair("error_description", description);
			}
			if let Some(state) = &pending.params.state {
				pairs.append_pair("state", state);
			}
		}

		obs::warn_event(FlowKind::UpstreamCallback, "upstream_error", &error);

		Ok(redirect)
	}

	/// Returns the PKCE challenge bound to `code`, if one was supplied.
	pub fn challenge_for_code(&self, code: &str) -> Result<Option<PkceChallenge>> {
		let now = self.now();
		let issued = self.issued.lock();
		let entry = issued.get(code).ok_or(Error::InvalidOrExpiredCode)?;

		if now - entry.created_at >= CODE_TTL {
			return Err(Error::InvalidOrExpiredCode);
		}

		Ok(entry.code_challenge.clone())
	}

	/// Redeems a local code for a JWT pair.
	///
	/// A code bound to a PKCE challenge requires a matching verifier, and a `redirect_uri`
	/// supplied with the token request must equal the one the code was delivered to. Failed
	/// checks leave the code in place until it expires.
	pub async fn exchange_code(
		&self,
		client_id: &str,
		code: &str,
		verifier: Option<&str>,
		redirect_uri: Option<&str>,
	) -> Result<TokenPair> {
		obs::observe(FlowKind::CodeExchange, "exchange_code", async move {
			let now = self.now();
			let entry = {
				let mut issued = self.issued.lock();
				let entry = issued.get(code).ok_or(Error::InvalidOrExpiredCode)?;

				if now - entry.created_at >= CODE_TTL {
					issued.remove(code);

					return Err(Error::InvalidOrExpiredCode);
				}
				if entry.client_id.as_ref() != client_id {
					return Err(Error::ClientMismatch);
				}
				if redirect_uri
					.is_some_and(|r| Url::parse(r).ok().as_ref() != Some(&entry.redirect_uri))
				{
					return Err(Error::RedirectMismatch);
				}
				if let Some(challenge) = &entry.code_challenge {
					match verifier {
						Some(verifier) if challenge.verify(verifier) => {},
						_ => return Err(Error::PkceVerificationFailed),
					}
				}

				issued.remove(code).ok_or(Error::InvalidOrExpiredCode)?
			};

			self.jwt.issue_pair_at(&entry.principal, &entry.client_id, &entry.scopes, now)
		})
		.await
	}

	/// Rotates a refresh JWT into a new pair, revoking the presented token.
	///
	/// Requested scopes narrower than the original grant are honored; anything else keeps
	/// the original scopes.
	pub async fn exchange_refresh_token(
		&self,
		client_id: &str,
		refresh_token: &str,
		scopes: Option<&ScopeSet>,
	) -> Result<TokenPair> {
		obs::observe(FlowKind::TokenRefresh, "exchange_refresh_token", async move {
			let now = self.now();
			let claims = self.jwt.verify_at(refresh_token, TokenType::Refresh, now)?;

			if claims.client_id != client_id {
				return Err(Error::ClientMismatch);
			}
			if self.revoked.contains(refresh_token) {
				return Err(Error::TokenRevoked);
			}

			let (principal, client, granted) = identity(&claims)?;

			// The presented token stays valid until the upstream credential is confirmed.
			if !self.broker.is_authenticated(Some(&principal)).await? {
				return Err(Error::AuthRequired { principal: principal.to_string() });
			}
			if !self.revoked.revoke_at(refresh_token, claims.exp, now) {
				return Err(Error::TokenRevoked);
			}

			let scopes = match scopes {
				Some(requested) if !requested.is_empty() && requested.is_subset_of(&granted) =>
					requested.clone(),
				_ => granted,
			};

			self.jwt.issue_pair_at(&principal, &client, &scopes, now)
		})
		.await
	}

	/// Verifies a bearer access token presented on a protected route.
	pub fn verify_access_token(&self, token: &str) -> Result<VerifiedAccess> {
		let claims = self.jwt.verify_at(token, TokenType::Access, self.now())?;

		if self.revoked.contains(token) {
			return Err(Error::TokenRevoked);
		}

		let (principal, client_id, scopes) = identity(&claims)?;

		Ok(VerifiedAccess {
			principal,
			client_id,
			scopes,
			expires_at: OffsetDateTime::from_unix_timestamp(claims.exp)
				.map_err(|e| Error::InvalidToken { reason: e.to_string() })?,
		})
	}

	/// Revokes a local access or refresh token. Unknown or foreign tokens are ignored.
	pub fn revoke(&self, token: &str) {
		if let Ok(claims) = self.jwt.decode(token) {
			self.revoked.revoke_at(token, claims.exp, self.now());
		}
	}

	/// Registers a downstream client and mints its id.
	pub fn register_client(&self, metadata: ClientMetadata) -> Result<RegisteredClient> {
		metadata.validate()?;

		let client_id = ClientId::from_minted(format!("client-{}", mint(CLIENT_ID_LEN)));

		Ok(self.clients.insert(client_id, metadata, self.now()))
	}

	/// Looks up a registered client.
	pub fn client(&self, client_id: &str) -> Option<RegisteredClient> {
		self.clients.get(client_id)
	}

	/// Number of pending upstream authorizations.
	pub fn pending_len(&self) -> usize {
		self.pending.lock().len()
	}

	/// Number of unredeemed local codes.
	pub fn issued_len(&self) -> usize {
		self.issued.lock().len()
	}

	fn registered(&self, client_id: &str) -> Result<RegisteredClient> {
		self.clients
			.get(client_id)
			.ok_or_else(|| Error::UnknownClient { client_id: client_id.to_owned() })
	}

	fn take_pending(&self, state: &str) -> Result<PendingAuthorization> {
		let pending = self.pending.lock().remove(state).ok_or(Error::InvalidOrExpiredState)?;

		if self.now() - pending.created_at >= PENDING_TTL {
			return Err(Error::InvalidOrExpiredState);
		}

		Ok(pending)
	}

	fn collect_expired(&self, now: OffsetDateTime) {
		self.pending.lock().retain(|_, p| now - p.created_at < PENDING_TTL);
		self.issued.lock().retain(|_, c| now - c.created_at < CODE_TTL);
	}

	fn now(&self) -> OffsetDateTime {
		(self.clock)()
	}
}
impl Debug for AuthorizationBridge {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthorizationBridge")
			.field("callback_uri", &self.callback_uri.as_str())
			.field("jwt", &self.jwt)
			.field("clients", &self.clients.len())
			.field("pending", &self.pending_len())
			.field("issued", &self.issued_len())
			.field("revoked", &self.revoked.len())
			.finish()
	}
}

fn identity(claims: &Claims) -> Result<(PrincipalId, ClientId, ScopeSet)> {
	let invalid = |reason: String| Error::InvalidToken { reason };
	let principal = PrincipalId::new(&claims.user_id).map_err(|e| invalid(e.to_string()))?;
	let client = ClientId::new(&claims.client_id).map_err(|e| invalid(e.to_string()))?;
	let scopes = ScopeSet::new(claims.scopes.iter().cloned()).map_err(|e| invalid(e.to_string()))?;

	Ok((principal, client, scopes))
}

fn mint(len: usize) -> String {
	rand::rng().sample_iter(Alphanumeric).take(len).map(char::from).collect()
}
