//! The upstream accounting provider: where to send users and tokens, and how its
//! failures read.
//!
//! [`ProviderDescriptor`] is plain, validated data fixed at startup. [`ProviderStrategy`]
//! lives in [`strategy`] and turns token-endpoint failures into the crate taxonomy.

pub mod strategy;

pub use strategy::*;

// self
use crate::{_prelude::*, auth::ProviderId, error::ConfigError};

/// Grants the broker drives against the upstream token endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
	/// Completes the bridge callback.
	AuthorizationCode,
	/// Keeps a principal's upstream access token fresh.
	RefreshToken,
}
impl GrantType {
	/// RFC 6749 `grant_type` value.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::AuthorizationCode => "authorization_code",
			Self::RefreshToken => "refresh_token",
		}
	}
}
impl Display for GrantType {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Where the upstream token endpoint expects the client credentials.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMethod {
	/// `Authorization: Basic` header.
	#[default]
	Basic,
	/// `client_id` / `client_secret` form fields.
	RequestBody,
}

/// Reasons a descriptor is refused.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum ProviderDescriptorError {
	/// An endpoint was never set.
	#[error("The {0} endpoint is required.")]
	MissingEndpoint(&'static str),
	/// No grant was enabled.
	#[error("At least one grant must be enabled.")]
	NoGrants,
	/// An endpoint is plain HTTP on a non-loopback host.
	#[error("The {endpoint} endpoint must use HTTPS or a loopback host: {url}.")]
	InsecureEndpoint {
		/// Endpoint label.
		endpoint: &'static str,
		/// Offending URL.
		url: String,
	},
	/// The scope delimiter is a control character.
	#[error("Scope delimiter {0:?} is a control character.")]
	ControlDelimiter(char),
}

/// Validated description of the upstream provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
	/// Descriptor identifier, used in logs and errors.
	pub id: ProviderId,
	/// Where users are sent to consent.
	pub authorization_endpoint: Url,
	/// Where codes and refresh tokens are exchanged.
	pub token_endpoint: Url,
	/// Enabled grants.
	pub grants: Vec<GrantType>,
	/// Client credential placement on token calls.
	pub client_auth: ClientAuthMethod,
	/// Adds `access_type=offline` to authorize URLs so upstream hands out refresh tokens.
	pub offline_access: bool,
	/// Joins scopes in the authorize URL.
	pub scope_delimiter: char,
}
impl ProviderDescriptor {
	/// Starts a descriptor for `id`.
	pub fn builder(id: ProviderId) -> ProviderDescriptorBuilder {
		ProviderDescriptorBuilder {
			id,
			authorization_endpoint: None,
			token_endpoint: None,
			grants: Vec::new(),
			client_auth: ClientAuthMethod::default(),
			offline_access: true,
			scope_delimiter: ' ',
		}
	}

	/// Returns `true` when `grant` is enabled.
	pub fn supports(&self, grant: GrantType) -> bool {
		self.grants.contains(&grant)
	}

	/// Fails with [`ConfigError::UnsupportedGrant`] unless `grant` is enabled.
	pub fn require(&self, grant: GrantType) -> Result<(), ConfigError> {
		if self.supports(grant) {
			Ok(())
		} else {
			Err(ConfigError::UnsupportedGrant { descriptor: self.id.to_string(), grant: grant.as_str() })
		}
	}
}

/// Builder for [`ProviderDescriptor`].
#[derive(Debug)]
pub struct ProviderDescriptorBuilder {
	id: ProviderId,
	authorization_endpoint: Option<Url>,
	token_endpoint: Option<Url>,
	grants: Vec<GrantType>,
	client_auth: ClientAuthMethod,
	offline_access: bool,
	scope_delimiter: char,
}
impl ProviderDescriptorBuilder {
	/// Sets the authorize endpoint.
	pub fn authorization_endpoint(mut self, url: Url) -> Self {
		self.authorization_endpoint = Some(url);

		self
	}

	/// Sets the token endpoint.
	pub fn token_endpoint(mut self, url: Url) -> Self {
		self.token_endpoint = Some(url);

		self
	}

	/// Enables `grants`; duplicates are ignored.
	pub fn support_grants<I>(mut self, grants: I) -> Self
	where
		I: IntoIterator<Item = GrantType>,
	{
		for grant in grants {
			if !self.grants.contains(&grant) {
				self.grants.push(grant);
			}
		}

		self
	}

	/// Sets where client credentials go on token calls.
	pub fn client_auth(mut self, method: ClientAuthMethod) -> Self {
		self.client_auth = method;

		self
	}

	/// Toggles `access_type=offline` on authorize URLs. On by default.
	pub fn offline_access(mut self, enabled: bool) -> Self {
		self.offline_access = enabled;

		self
	}

	/// Overrides the scope delimiter (space by default).
	pub fn scope_delimiter(mut self, delimiter: char) -> Self {
		self.scope_delimiter = delimiter;

		self
	}

	/// Validates and returns the descriptor.
	pub fn build(self) -> Result<ProviderDescriptor, ProviderDescriptorError> {
		let authorization_endpoint = self
			.authorization_endpoint
			.ok_or(ProviderDescriptorError::MissingEndpoint("authorization"))?;
		let token_endpoint =
			self.token_endpoint.ok_or(ProviderDescriptorError::MissingEndpoint("token"))?;

		if self.grants.is_empty() {
			return Err(ProviderDescriptorError::NoGrants);
		}
		if self.scope_delimiter.is_control() {
			return Err(ProviderDescriptorError::ControlDelimiter(self.scope_delimiter));
		}

		ensure_secure("authorization", &authorization_endpoint)?;
		ensure_secure("token", &token_endpoint)?;

		Ok(ProviderDescriptor {
			id: self.id,
			authorization_endpoint,
			token_endpoint,
			grants: self.grants,
			client_auth: self.client_auth,
			offline_access: self.offline_access,
			scope_delimiter: self.scope_delimiter,
		})
	}
}

/// Plain HTTP is tolerated only for loopback hosts.
pub(crate) fn is_loopback(url: &Url) -> bool {
	matches!(url.host_str(), Some("localhost" | "127.0.0.1" | "[::1]"))
}

fn ensure_secure(endpoint: &'static str, url: &Url) -> Result<(), ProviderDescriptorError> {
	match url.scheme() {
		"https" => Ok(()),
		"http" if is_loopback(url) => Ok(()),
		_ => Err(ProviderDescriptorError::InsecureEndpoint { endpoint, url: url.to_string() }),
	}
}
