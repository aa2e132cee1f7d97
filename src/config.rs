//! Service configuration assembled from serde sources or `LEDGER_BROKER_*` variables.
//!
//! Builders on the individual components stay the programmatic path; this module only
//! gathers the settings a deployed bridge needs and turns them into those components.

// self
use crate::{
	_prelude::*,
	auth::{ProviderId, ScopeSet},
	bridge::JwtIssuer,
	error::ConfigError,
	ext::RateGovernor,
	fetch::FetchLimits,
	provider::{GrantType, ProviderDescriptor},
	store::{CredentialStore, DEFAULT_KEY_PREFIX, DEFAULT_RETENTION, MemoryStore},
};

/// Prefix shared by every environment variable read by [`ServiceConfig::from_env`].
pub const ENV_PREFIX: &str = "LEDGER_BROKER_";

/// Public base URL used when none is configured.
pub const DEFAULT_PUBLIC_BASE: &str = "http://127.0.0.1:8080";

const MIN_JWT_SECRET_LEN: usize = 32;

/// Credential store selection, made once at startup.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreConfig {
	/// Process-local map.
	#[default]
	Memory,
	/// Redis-backed key/value store.
	Redis {
		/// Connection URL, e.g. `redis://127.0.0.1:6379`.
		url: String,
		/// Key prefix for credential records.
		#[serde(default = "default_key_prefix")]
		key_prefix: String,
		/// Storage TTL refreshed on every write, in seconds.
		#[serde(default = "default_retention_secs")]
		retention_secs: u64,
	},
}
impl StoreConfig {
	/// Instantiates the configured backend.
	pub async fn build(&self) -> Result<Arc<dyn CredentialStore>> {
		match self {
			Self::Memory => Ok(Arc::new(MemoryStore::default())),
			#[cfg(feature = "redis")]
			Self::Redis { url, key_prefix, retention_secs } => {
				let backend = crate::store::RedisBackend::connect(url).await?;
				let store = crate::store::KvStore::new(backend)
					.with_prefix(key_prefix.clone())
					.with_retention(StdDuration::from_secs(*retention_secs));

				Ok(Arc::new(store))
			},
			#[cfg(not(feature = "redis"))]
			Self::Redis { .. } => Err(ConfigError::InvalidSetting {
				name: "store",
				reason: "redis support is not compiled in".into(),
			}
			.into()),
		}
	}
}

/// Settings for a deployed bridge and broker.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
	/// Upstream OAuth client id.
	pub client_id: String,
	/// Upstream OAuth client secret.
	pub client_secret: Option<String>,
	/// Upstream authorize endpoint.
	pub authorization_endpoint: Option<Url>,
	/// Upstream token endpoint.
	pub token_endpoint: Option<Url>,
	/// Upstream API base URL used by the fetch engine.
	pub api_base: Option<Url>,
	/// Scopes requested from upstream.
	pub scopes: ScopeSet,
	/// HMAC secret for local JWTs.
	pub jwt_secret: String,
	/// Public base URL of the bridge; also the JWT issuer.
	pub public_base: String,
	/// Local access-token lifetime in seconds.
	pub access_ttl_secs: i64,
	/// Local refresh-token lifetime in seconds.
	pub refresh_ttl_secs: i64,
	/// Upstream refresh buffer in seconds.
	pub refresh_buffer_secs: i64,
	/// Calls admitted per rate window.
	pub rate_quota: usize,
	/// Rate window in milliseconds.
	pub rate_window_ms: u64,
	/// Pagination limits.
	pub fetch: FetchLimits,
	/// Credential store backend.
	pub store: StoreConfig,
}
impl ServiceConfig {
	/// Reads settings from `LEDGER_BROKER_*` environment variables over the defaults.
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|name| std::env::var(format!("{ENV_PREFIX}{name}")).ok())
	}

	/// Reads settings through `lookup`, which receives variable names without the prefix.
	pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let mut config = Self::default();

		if let Some(v) = lookup("CLIENT_ID") {
			config.client_id = v;
		}

		config.client_secret = lookup("CLIENT_SECRET").or(config.client_secret);

		if let Some(v) = lookup("AUTHORIZE_URL") {
			config.authorization_endpoint = Some(parse_url("AUTHORIZE_URL", &v)?);
		}
		if let Some(v) = lookup("TOKEN_URL") {
			config.token_endpoint = Some(parse_url("TOKEN_URL", &v)?);
		}
		if let Some(v) = lookup("API_BASE_URL") {
			config.api_base = Some(parse_url("API_BASE_URL", &v)?);
		}
		if let Some(v) = lookup("SCOPES") {
			config.scopes = ScopeSet::from_str(&v)?;
		}
		if let Some(v) = lookup("JWT_SECRET") {
			config.jwt_secret = v;
		}
		if let Some(v) = lookup("PUBLIC_BASE_URL") {
			config.public_base = parse_url("PUBLIC_BASE_URL", &v)?.into();
		}
		if let Some(v) = lookup("ACCESS_TTL_SECS") {
			config.access_ttl_secs = parse_number("ACCESS_TTL_SECS", &v)?;
		}
		if let Some(v) = lookup("REFRESH_TTL_SECS") {
			config.refresh_ttl_secs = parse_number("REFRESH_TTL_SECS", &v)?;
		}
		if let Some(v) = lookup("REFRESH_BUFFER_SECS") {
			config.refresh_buffer_secs = parse_number("REFRESH_BUFFER_SECS", &v)?;
		}
		if let Some(v) = lookup("RATE_QUOTA") {
			config.rate_quota = parse_number("RATE_QUOTA", &v)?;
		}
		if let Some(v) = lookup("RATE_WINDOW_MS") {
			config.rate_window_ms = parse_number("RATE_WINDOW_MS", &v)?;
		}
		if let Some(v) = lookup("PAGE_SIZE") {
			config.fetch.page_size = parse_number("PAGE_SIZE", &v)?;
		}
		if let Some(v) = lookup("MAX_PAGES") {
			config.fetch.max_pages = parse_number("MAX_PAGES", &v)?;
		}
		if let Some(v) = lookup("MAX_RESULTS") {
			config.fetch.max_results = parse_number("MAX_RESULTS", &v)?;
		}
		if let Some(v) = lookup("PAGE_DELAY_MS") {
			config.fetch.page_delay = StdDuration::from_millis(parse_number("PAGE_DELAY_MS", &v)?);
		}
		if let Some(url) = lookup("REDIS_URL") {
			config.store = StoreConfig::Redis {
				url,
				key_prefix: lookup("KEY_PREFIX").unwrap_or_else(default_key_prefix),
				retention_secs: default_retention_secs(),
			};
		}

		Ok(config)
	}

	/// Rejects missing secrets, missing endpoints, and unusable limits.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.client_id.is_empty() {
			return Err(ConfigError::MissingSetting { name: "CLIENT_ID" });
		}
		if self.client_secret.as_deref().is_none_or(str::is_empty) {
			return Err(ConfigError::MissingSetting { name: "CLIENT_SECRET" });
		}
		if self.authorization_endpoint.is_none() {
			return Err(ConfigError::MissingSetting { name: "AUTHORIZE_URL" });
		}
		if self.token_endpoint.is_none() {
			return Err(ConfigError::MissingSetting { name: "TOKEN_URL" });
		}
		if self.jwt_secret.is_empty() {
			return Err(ConfigError::MissingSetting { name: "JWT_SECRET" });
		}
		if self.jwt_secret.len() < MIN_JWT_SECRET_LEN {
			return Err(ConfigError::InvalidSetting {
				name: "JWT_SECRET",
				reason: format!("must be at least {MIN_JWT_SECRET_LEN} bytes"),
			});
		}
		self.public_base_url()?;

		if self.access_ttl_secs <= 0 || self.refresh_ttl_secs <= 0 {
			return Err(ConfigError::InvalidSetting {
				name: "ACCESS_TTL_SECS",
				reason: "token lifetimes must be positive".into(),
			});
		}
		if self.rate_quota == 0 || self.rate_window_ms == 0 {
			return Err(ConfigError::InvalidSetting {
				name: "RATE_QUOTA",
				reason: "quota and window must be positive".into(),
			});
		}

		self.fetch.validate()
	}

	/// Builds the upstream descriptor from the configured endpoints.
	pub fn descriptor(&self) -> Result<ProviderDescriptor, ConfigError> {
		let authorization = self
			.authorization_endpoint
			.clone()
			.ok_or(ConfigError::MissingSetting { name: "AUTHORIZE_URL" })?;
		let token =
			self.token_endpoint.clone().ok_or(ConfigError::MissingSetting { name: "TOKEN_URL" })?;
		let descriptor = ProviderDescriptor::builder(ProviderId::new("upstream")?)
			.authorization_endpoint(authorization)
			.token_endpoint(token)
			.support_grants([GrantType::AuthorizationCode, GrantType::RefreshToken])
			.build()?;

		Ok(descriptor)
	}

	/// Builds the local JWT issuer.
	pub fn jwt_issuer(&self) -> JwtIssuer {
		JwtIssuer::new(self.jwt_secret.as_bytes(), self.public_base.trim_end_matches('/'))
			.with_access_ttl(Duration::seconds(self.access_ttl_secs))
			.with_refresh_ttl(Duration::seconds(self.refresh_ttl_secs))
	}

	/// Builds the shared rate governor.
	pub fn governor(&self) -> RateGovernor {
		RateGovernor::new(self.rate_quota, StdDuration::from_millis(self.rate_window_ms))
	}

	/// Parsed public base URL.
	pub fn public_base_url(&self) -> Result<Url, ConfigError> {
		parse_url("PUBLIC_BASE_URL", &self.public_base)
	}

	/// Upstream redirect target served by the bridge.
	pub fn callback_uri(&self) -> Result<Url, ConfigError> {
		parse_url("PUBLIC_BASE_URL", &format!("{}/oauth/callback", self.public_base.trim_end_matches('/')))
	}

	/// Upstream refresh buffer.
	pub fn refresh_buffer(&self) -> Duration {
		Duration::seconds(self.refresh_buffer_secs)
	}
}
impl Default for ServiceConfig {
	fn default() -> Self {
		Self {
			client_id: String::new(),
			client_secret: None,
			authorization_endpoint: None,
			token_endpoint: None,
			api_base: None,
			scopes: ScopeSet::default(),
			jwt_secret: String::new(),
			public_base: DEFAULT_PUBLIC_BASE.into(),
			access_ttl_secs: JwtIssuer::DEFAULT_ACCESS_TTL.whole_seconds(),
			refresh_ttl_secs: JwtIssuer::DEFAULT_REFRESH_TTL.whole_seconds(),
			refresh_buffer_secs: crate::broker::DEFAULT_REFRESH_BUFFER.whole_seconds(),
			rate_quota: RateGovernor::DEFAULT_QUOTA,
			rate_window_ms: RateGovernor::DEFAULT_WINDOW.as_millis() as u64,
			fetch: FetchLimits::default(),
			store: StoreConfig::default(),
		}
	}
}
impl Debug for ServiceConfig {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ServiceConfig")
			.field("client_id", &self.client_id)
			.field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
			.field("authorization_endpoint", &self.authorization_endpoint)
			.field("token_endpoint", &self.token_endpoint)
			.field("api_base", &self.api_base)
			.field("scopes", &self.scopes)
			.field("jwt_secret", &"<redacted>")
			.field("public_base", &self.public_base)
			.field("access_ttl_secs", &self.access_ttl_secs)
			.field("refresh_ttl_secs", &self.refresh_ttl_secs)
			.field("refresh_buffer_secs", &self.refresh_buffer_secs)
			.field("rate_quota", &self.rate_quota)
			.field("rate_window_ms", &self.rate_window_ms)
			.field("fetch", &self.fetch)
			.field("store", &self.store)
			.finish()
	}
}

fn default_key_prefix() -> String {
	DEFAULT_KEY_PREFIX.into()
}

fn default_retention_secs() -> u64 {
	DEFAULT_RETENTION.as_secs()
}

fn parse_url(name: &'static str, raw: &str) -> Result<Url, ConfigError> {
	Url::parse(raw).map_err(|e| ConfigError::InvalidSetting { name, reason: e.to_string() })
}

fn parse_number<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
	T: FromStr,
	T::Err: Display,
{
	raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidSetting { name, reason: e.to_string() })
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn lookup(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
		move |name| pairs.iter().find(|(k, _)| *k == name).map(|(_, v)| (*v).to_owned())
	}

	const COMPLETE: &[(&str, &str)] = &[
		("CLIENT_ID", "upstream-client"),
		("CLIENT_SECRET", "upstream-secret"),
		("AUTHORIZE_URL", "https://login.example.com/authorize"),
		("TOKEN_URL", "https://login.example.com/token"),
		("API_BASE_URL", "https://api.example.com/v1"),
		("SCOPES", "accounting:read offline_access"),
		("JWT_SECRET", "0123456789abcdef0123456789abcdef"),
		("PUBLIC_BASE_URL", "https://bridge.example.com/"),
		("RATE_QUOTA", "10"),
		("MAX_RESULTS", "500"),
	];

	#[test]
	fn env_overrides_defaults() {
		let config = ServiceConfig::from_lookup(lookup(COMPLETE)).expect("Config should load.");

		config.validate().expect("Complete config should validate.");

		assert_eq!(config.rate_quota, 10);
		assert_eq!(config.rate_window_ms, 5_000);
		assert_eq!(config.fetch.max_results, 500);
		assert_eq!(config.fetch.page_size, FetchLimits::DEFAULT_PAGE_SIZE);
		assert_eq!(config.store, StoreConfig::Memory);
		assert_eq!(config.scopes.len(), 2);
		assert_eq!(
			config.callback_uri().expect("Callback should join.").as_str(),
			"https://bridge.example.com/oauth/callback"
		);
		assert_eq!(config.jwt_issuer().issuer(), "https://bridge.example.com");
		assert_eq!(config.governor().quota(), 10);

		let descriptor = config.descriptor().expect("Descriptor should build.");

		assert!(descriptor.supports(GrantType::RefreshToken));
	}

	#[test]
	fn missing_secrets_are_rejected() {
		let config = ServiceConfig::default();

		assert!(matches!(config.validate(), Err(ConfigError::MissingSetting { name: "CLIENT_ID" })));

		let short_secret = ServiceConfig {
			jwt_secret: "short".into(),
			..ServiceConfig::from_lookup(lookup(COMPLETE)).expect("Config should load.")
		};

		assert!(matches!(
			short_secret.validate(),
			Err(ConfigError::InvalidSetting { name: "JWT_SECRET", .. })
		));

		let idle = ServiceConfig {
			rate_quota: 0,
			..ServiceConfig::from_lookup(lookup(COMPLETE)).expect("Config should load.")
		};

		assert!(matches!(idle.validate(), Err(ConfigError::InvalidSetting { name: "RATE_QUOTA", .. })));
	}

	#[test]
	fn malformed_values_name_the_variable() {
		let err = ServiceConfig::from_lookup(lookup(&[("RATE_QUOTA", "many")]))
			.expect_err("Non-numeric quota must fail.");

		assert!(matches!(err, ConfigError::InvalidSetting { name: "RATE_QUOTA", .. }));
	}

	#[test]
	fn redis_url_selects_the_kv_store() {
		let config = ServiceConfig::from_lookup(lookup(&[("REDIS_URL", "redis://127.0.0.1:6379")]))
			.expect("Config should load.");

		assert_eq!(
			config.store,
			StoreConfig::Redis {
				url: "redis://127.0.0.1:6379".into(),
				key_prefix: DEFAULT_KEY_PREFIX.into(),
				retention_secs: 90 * 24 * 60 * 60,
			}
		);
	}

	#[test]
	fn store_config_deserializes_by_kind() {
		let memory: StoreConfig =
			serde_json::from_str(r#"{"kind":"memory"}"#).expect("Memory config should parse.");
		let redis: StoreConfig = serde_json::from_str(r#"{"kind":"redis","url":"redis://cache"}"#)
			.expect("Redis config should parse.");

		assert_eq!(memory, StoreConfig::Memory);
		assert!(matches!(redis, StoreConfig::Redis { key_prefix, .. } if key_prefix == DEFAULT_KEY_PREFIX));
	}

	#[tokio::test]
	async fn memory_store_builds() {
		let store = StoreConfig::Memory.build().await.expect("Memory store should build.");
		let principal = crate::auth::PrincipalId::new("u1").expect("Principal should be valid.");

		assert!(!store.exists(&principal).await.expect("Exists should succeed."));
	}
}
