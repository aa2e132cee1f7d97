//! HTTP transport seam for upstream token calls.
//!
//! The `oauth2` crate drives token requests through an [`AsyncHttpClient`]. A
//! [`TokenHttpClient`] hands out one such handle per request, each wired to a
//! [`ResponseMetadataSlot`], so the status and `Retry-After` of a failed response are still
//! available when the error is classified.

// crates.io
use oauth2::{AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse};
#[cfg(feature = "reqwest")] use reqwest::{
	header::{HeaderMap, RETRY_AFTER},
	redirect::Policy,
};
#[cfg(feature = "reqwest")] use time::format_description::well_known::Rfc2822;
// self
use crate::_prelude::*;
#[cfg(feature = "reqwest")] use crate::error::ConfigError;

/// Timeout applied to every upstream request.
pub const DEFAULT_HTTP_TIMEOUT: StdDuration = StdDuration::from_secs(30);

/// Source of per-request [`AsyncHttpClient`] handles.
///
/// Handles and their request futures must be `Send` so broker futures can move between
/// worker threads.
pub trait TokenHttpClient
where
	Self: 'static + Send + Sync,
{
	/// Error produced by the underlying transport.
	type TransportError: 'static + Send + Sync + StdError;

	/// Handle executing one token request.
	type Handle: for<'c> AsyncHttpClient<
			'c,
			Error = HttpClientError<Self::TransportError>,
			Future: 'c + Send,
		>
		+ 'static
		+ Send
		+ Sync;

	/// Returns a handle that clears `slot` before sending and fills it once a response
	/// arrives.
	fn with_metadata(&self, slot: ResponseMetadataSlot) -> Self::Handle;
}

/// Status and retry hint of the latest token response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseMetadata {
	/// HTTP status.
	pub status: Option<u16>,
	/// `Retry-After` as a relative duration.
	pub retry_after: Option<Duration>,
}

/// Shared cell the transport writes [`ResponseMetadata`] into.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadataSlot(Arc<Mutex<Option<ResponseMetadata>>>);
impl ResponseMetadataSlot {
	/// Replaces the captured metadata.
	pub fn store(&self, meta: ResponseMetadata) {
		*self.0.lock() = Some(meta);
	}

	/// Removes and returns the captured metadata.
	pub fn take(&self) -> Option<ResponseMetadata> {
		self.0.lock().take()
	}
}

/// reqwest client configured for token and API calls: fixed timeout, no redirects.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestHttpClient {
	client: ReqwestClient,
}
#[cfg(feature = "reqwest")]
impl ReqwestHttpClient {
	/// Builds a client with [`DEFAULT_HTTP_TIMEOUT`].
	pub fn new() -> Result<Self, ConfigError> {
		Self::with_timeout(DEFAULT_HTTP_TIMEOUT)
	}

	/// Builds a client with `timeout`.
	pub fn with_timeout(timeout: StdDuration) -> Result<Self, ConfigError> {
		let client = ReqwestClient::builder().timeout(timeout).redirect(Policy::none()).build()?;

		Ok(Self { client })
	}

	/// Wraps a caller-configured client. Token endpoints answer directly, so it should not
	/// follow redirects.
	pub fn with_client(client: ReqwestClient) -> Self {
		Self { client }
	}

	/// Underlying reqwest client.
	pub fn client(&self) -> &ReqwestClient {
		&self.client
	}
}
#[cfg(feature = "reqwest")]
impl TokenHttpClient for ReqwestHttpClient {
	type Handle = ReqwestHandle;
	type TransportError = ReqwestError;

	fn with_metadata(&self, slot: ResponseMetadataSlot) -> Self::Handle {
		ReqwestHandle { client: self.client.clone(), slot }
	}
}

/// Per-request handle produced by [`ReqwestHttpClient`].
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug)]
pub struct ReqwestHandle {
	client: ReqwestClient,
	slot: ResponseMetadataSlot,
}
#[cfg(feature = "reqwest")]
impl<'c> AsyncHttpClient<'c> for ReqwestHandle {
	type Error = HttpClientError<ReqwestError>;
	type Future =
		Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send + Sync>>;

	fn call(&'c self, request: HttpRequest) -> Self::Future {
		Box::pin(async move {
			self.slot.take();

			let response = self.client.execute(request.try_into().map_err(Box::new)?).await.map_err(Box::new)?;
			let status = response.status();
			let headers = response.headers().clone();

			self.slot.store(ResponseMetadata {
				status: Some(status.as_u16()),
				retry_after: parse_retry_after(&headers),
			});

			let body = response.bytes().await.map_err(Box::new)?;
			let mut converted = HttpResponse::new(body.to_vec());

			*converted.status_mut() = status;
			*converted.headers_mut() = headers;

			Ok(converted)
		})
	}
}

/// Reads `Retry-After` as delta-seconds or an RFC 2822 date in the future.
#[cfg(feature = "reqwest")]
pub(crate) fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
	let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

	if let Ok(secs) = raw.parse::<i64>() {
		return (secs >= 0).then(|| Duration::seconds(secs));
	}

	let remaining = OffsetDateTime::parse(raw, &Rfc2822).ok()? - OffsetDateTime::now_utc();

	remaining.is_positive().then_some(remaining)
}

#[cfg(all(test, feature = "reqwest"))]
mod tests {
	// crates.io
	use reqwest::header::HeaderValue;
	// self
	use super::*;

	fn headers(value: &'static str) -> HeaderMap {
		let mut headers = HeaderMap::new();

		headers.insert(RETRY_AFTER, HeaderValue::from_static(value));

		headers
	}

	#[test]
	fn retry_after_reads_seconds_and_dates() {
		assert_eq!(parse_retry_after(&headers("7")), Some(Duration::seconds(7)));
		assert_eq!(parse_retry_after(&headers("-1")), None);
		assert_eq!(parse_retry_after(&headers("soon")), None);
		assert_eq!(parse_retry_after(&headers("Wed, 21 Oct 2015 07:28:00 GMT")), None);
		assert_eq!(parse_retry_after(&HeaderMap::new()), None);
	}

	#[test]
	fn slot_hands_metadata_out_once() {
		let slot = ResponseMetadataSlot::default();

		slot.store(ResponseMetadata { status: Some(429), retry_after: None });

		assert_eq!(slot.take().and_then(|m| m.status), Some(429));
		assert_eq!(slot.take(), None);
	}

	#[tokio::test]
	async fn handle_records_status_of_error_responses() {
		let server = httpmock::MockServer::start_async().await;

		server
			.mock_async(|when, then| {
				when.method("POST").path("/token");
				then.status(429).header("retry-after", "12").body("slow down");
			})
			.await;

		let slot = ResponseMetadataSlot::default();
		let handle = ReqwestHttpClient::new()
			.expect("Default reqwest client should build.")
			.with_metadata(slot.clone());
		let request = oauth2::http::Request::builder()
			.method("POST")
			.uri(server.url("/token"))
			.body(Vec::new())
			.expect("Request should build.");
		let response = handle.call(request).await.expect("Transport should succeed.");

		assert_eq!(response.status().as_u16(), 429);
		assert_eq!(
			slot.take(),
			Some(ResponseMetadata { status: Some(429), retry_after: Some(Duration::seconds(12)) })
		);
	}
}
