//! Page sources: the transport seam between the fetch engine and the upstream API.

// crates.io
use serde_json::Value;
#[cfg(feature = "reqwest")] use reqwest::StatusCode;
// self
use crate::_prelude::*;
#[cfg(feature = "reqwest")]
use crate::{
	error::{ConfigError, TransientError},
	http::{self, ReqwestHttpClient},
};

/// Boxed future returned by [`PageSource::fetch_page`].
pub type PageFuture<'a> = Pin<Box<dyn Future<Output = Result<Value>> + 'a + Send>>;

/// One page request against a list endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageRequest {
	/// Endpoint path relative to the API base.
	pub endpoint: String,
	/// Caller-supplied query parameters.
	pub params: Vec<(String, String)>,
	/// 1-based page number.
	pub page: u32,
	/// Requested page size.
	pub page_size: u32,
}

/// Fetches one page of a list endpoint with a bearer token.
pub trait PageSource
where
	Self: Send + Sync,
{
	/// Performs the request and returns the decoded JSON body.
	fn fetch_page<'a>(&'a self, access_token: &'a str, request: &'a PageRequest) -> PageFuture<'a>;
}
impl<S> PageSource for Arc<S>
where
	S: ?Sized + PageSource,
{
	fn fetch_page<'a>(&'a self, access_token: &'a str, request: &'a PageRequest) -> PageFuture<'a> {
		(**self).fetch_page(access_token, request)
	}
}

/// Page source issuing `GET {base}/{endpoint}?page=N&size=M` over reqwest.
#[cfg(feature = "reqwest")]
#[derive(Clone)]
pub struct ReqwestPageSource {
	http: ReqwestHttpClient,
	base: Url,
}
#[cfg(feature = "reqwest")]
impl ReqwestPageSource {
	/// Creates a source rooted at `base` with the default request timeout.
	pub fn new(base: Url) -> Result<Self, ConfigError> {
		Ok(Self::with_http_client(base, ReqwestHttpClient::new()?))
	}

	/// Creates a source rooted at `base` that reuses `http`.
	pub fn with_http_client(base: Url, http: ReqwestHttpClient) -> Self {
		Self { http, base }
	}

	/// API base URL.
	pub fn base(&self) -> &Url {
		&self.base
	}

	fn page_url(&self, request: &PageRequest) -> Result<Url> {
		let raw = format!(
			"{}/{}",
			self.base.as_str().trim_end_matches('/'),
			request.endpoint.trim_start_matches('/')
		);
		let mut url = Url::parse(&raw).map_err(|e| ConfigError::InvalidSetting {
			name: "endpoint",
			reason: e.to_string(),
		})?;

		url.query_pairs_mut()
			.extend_pairs(request.params.iter().map(|(k, v)| (k.as_str(), v.as_str())))
			.append_pair("page", &request.page.to_string())
			.append_pair("size", &request.page_size.to_string());

		Ok(url)
	}
}
#[cfg(feature = "reqwest")]
impl PageSource for ReqwestPageSource {
	fn fetch_page<'a>(&'a self, access_token: &'a str, request: &'a PageRequest) -> PageFuture<'a> {
		Box::pin(async move {
			let url = self.page_url(request)?;
			let response = self
				.http
				.client()
				.get(url)
				.bearer_auth(access_token)
				.header(reqwest::header::ACCEPT, "application/json")
				.send()
				.await
				.map_err(TransientError::from)?;
			let status = response.status();

			if !status.is_success() {
				let retry_after = http::parse_retry_after(response.headers());
				let body = response.text().await.unwrap_or_default();

				return Err(classify_status(status, retry_after, &body));
			}

			let bytes = response.bytes().await.map_err(TransientError::from)?;

			serde_json::from_slice(&bytes)
				.map_err(|e| TransientError::ResourceResponseParse(e).into())
		})
	}
}
#[cfg(feature = "reqwest")]
impl Debug for ReqwestPageSource {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ReqwestPageSource").field("base", &self.base.as_str()).finish()
	}
}

#[cfg(feature = "reqwest")]
fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> Error {
	let reason = summarize(status, body);

	match status {
		StatusCode::UNAUTHORIZED => Error::UpstreamAuthFailure { reason },
		StatusCode::FORBIDDEN => Error::UpstreamPermissionDenied { reason },
		StatusCode::TOO_MANY_REQUESTS => Error::UpstreamRateLimited { reason, retry_after },
		_ => TransientError::ResourceEndpoint { message: reason, status: Some(status.as_u16()) }
			.into(),
	}
}

#[cfg(feature = "reqwest")]
fn summarize(status: StatusCode, body: &str) -> String {
	const MAX_BODY: usize = 200;

	let body = body.trim();

	if body.is_empty() {
		return format!("HTTP {status}");
	}

	let snippet: String = body.chars().take(MAX_BODY).collect();

	format!("HTTP {status}: {snippet}")
}
