//! Runs the bridge from `LEDGER_BROKER_*` variables and serves a protected invoice listing.
//!
//! ```sh
//! LEDGER_BROKER_CLIENT_ID=... LEDGER_BROKER_CLIENT_SECRET=... \
//! LEDGER_BROKER_AUTHORIZE_URL=https://login.example.com/oauth/authorize \
//! LEDGER_BROKER_TOKEN_URL=https://login.example.com/oauth/token \
//! LEDGER_BROKER_API_BASE_URL=https://api.example.com \
//! LEDGER_BROKER_JWT_SECRET=$(openssl rand -hex 32) \
//! cargo run --example serve
//! ```

// std
use std::sync::Arc;
// crates.io
use axum::{
	Json, Router,
	extract::State,
	http::StatusCode,
	routing::get,
};
use color_eyre::{Result, eyre::eyre};
use serde_json::Value;
use tokio::net::TcpListener;
// self
use ledger_broker::{
	bridge::AuthorizationBridge,
	broker::TokenBroker,
	config::ServiceConfig,
	fetch::{FetchAllResult, FetchEngine, ReqwestPageSource},
	provider::DefaultProviderStrategy,
	server::{self, ServerState},
};

type Engine = FetchEngine<ReqwestPageSource>;

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let config = ServiceConfig::from_env()?;

	config.validate()?;

	let store = config.store.build().await?;
	let mut broker = TokenBroker::new(
		store,
		config.descriptor()?,
		Arc::new(DefaultProviderStrategy),
		config.client_id.clone(),
	)?
	.with_scopes(config.scopes.clone())
	.with_refresh_buffer(config.refresh_buffer());

	if let Some(secret) = &config.client_secret {
		broker = broker.with_client_secret(secret.clone());
	}

	let broker = Arc::new(broker);
	let api_base = config.api_base.clone().ok_or_else(|| eyre!("API_BASE_URL is required."))?;
	let engine = Arc::new(
		FetchEngine::new(ReqwestPageSource::new(api_base)?, broker.clone(), Arc::new(config.governor()))
			.with_default_limits(config.fetch),
	);
	let bridge =
		Arc::new(AuthorizationBridge::new(broker, config.jwt_issuer(), config.callback_uri()?));
	let public_base = config.public_base_url()?;
	let data = Router::new().route("/invoices", get(invoices)).with_state(engine);
	let app = server::router(ServerState::new(bridge.clone(), public_base.clone()))
		.merge(server::protect(data, bridge));
	let addr = format!(
		"{}:{}",
		public_base.host_str().unwrap_or("127.0.0.1"),
		public_base.port_or_known_default().unwrap_or(8080)
	);
	let listener = TcpListener::bind(&addr).await?;

	println!("Bridge listening on {addr}, advertised as {public_base}.");

	axum::serve(listener, app).await?;

	Ok(())
}

async fn invoices(
	State(engine): State<Arc<Engine>>,
) -> Result<Json<FetchAllResult<Value>>, (StatusCode, String)> {
	let result = engine
		.fetch_all_pages(
			None,
			"/v1/invoices",
			&[],
			|page| page["items"].as_array().cloned().unwrap_or_default(),
			|page| page["total"].as_u64(),
			None,
		)
		.await
		.map_err(|e| (StatusCode::BAD_GATEWAY, e.to_string()))?;

	Ok(Json(result))
}
