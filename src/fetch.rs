//! Paginated fetch engine bounded by the rate governor and result ceilings.
//!
//! [`FetchEngine::fetch_all_pages`] walks pages from 1, admitting every call through a
//! [`RateLimitPolicy`] and obtaining the bearer token from a [`TokenProvider`]. It stops
//! when the reported total is reached, a page comes back empty, or a page/result ceiling
//! is hit; ceilings mark the result as truncated. Any failed page fails the whole call.

pub mod source;

pub use source::*;

// crates.io
use serde_json::Value;
// self
use crate::{
	_prelude::*,
	auth::PrincipalId,
	broker::TokenProvider,
	error::ConfigError,
	ext::{RateLimitContext, RateLimitPolicy},
	obs::{self, FlowKind},
};

/// Pagination bounds applied to one fetch-all call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchLimits {
	/// Items requested per page.
	pub page_size: u32,
	/// Maximum number of pages fetched.
	pub max_pages: u32,
	/// Maximum number of items returned.
	pub max_results: usize,
	/// Pause inserted between consecutive pages.
	#[serde(with = "millis")]
	pub page_delay: StdDuration,
}
impl FetchLimits {
	/// Default page size.
	pub const DEFAULT_PAGE_SIZE: u32 = 100;
	/// Default page ceiling.
	pub const DEFAULT_MAX_PAGES: u32 = 50;
	/// Default result ceiling.
	pub const DEFAULT_MAX_RESULTS: usize = 1_000;
	/// Default inter-page delay.
	pub const DEFAULT_PAGE_DELAY: StdDuration = StdDuration::from_millis(100);

	/// Overrides the page size.
	pub fn with_page_size(mut self, page_size: u32) -> Self {
		self.page_size = page_size;

		self
	}

	/// Overrides the page ceiling.
	pub fn with_max_pages(mut self, max_pages: u32) -> Self {
		self.max_pages = max_pages;

		self
	}

	/// Overrides the result ceiling.
	pub fn with_max_results(mut self, max_results: usize) -> Self {
		self.max_results = max_results;

		self
	}

	/// Overrides the inter-page delay.
	pub fn with_page_delay(mut self, page_delay: StdDuration) -> Self {
		self.page_delay = page_delay;

		self
	}

	/// Rejects zero-valued limits.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.page_size == 0 {
			return Err(ConfigError::InvalidFetchLimits { reason: "page_size must be positive" });
		}
		if self.max_pages == 0 {
			return Err(ConfigError::InvalidFetchLimits { reason: "max_pages must be positive" });
		}
		if self.max_results == 0 {
			return Err(ConfigError::InvalidFetchLimits { reason: "max_results must be positive" });
		}

		Ok(())
	}
}
impl Default for FetchLimits {
	fn default() -> Self {
		Self {
			page_size: Self::DEFAULT_PAGE_SIZE,
			max_pages: Self::DEFAULT_MAX_PAGES,
			max_results: Self::DEFAULT_MAX_RESULTS,
			page_delay: Self::DEFAULT_PAGE_DELAY,
		}
	}
}

/// Ceiling that stopped a fetch early.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "ceiling")]
pub enum TruncationReason {
	/// `max_pages` pages were fetched before the data ran out.
	PageCeiling {
		/// Configured page ceiling.
		max_pages: u32,
	},
	/// `max_results` items were collected before the data ran out.
	ResultCeiling {
		/// Configured result ceiling.
		max_results: usize,
	},
}
impl Display for TruncationReason {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::PageCeiling { max_pages } =>
				write!(f, "page ceiling of {max_pages} pages reached; narrow the query to see more"),
			Self::ResultCeiling { max_results } =>
				write!(f, "result ceiling of {max_results} items reached; narrow the query to see more"),
		}
	}
}

/// Accumulated output of one fetch-all call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FetchAllResult<T> {
	/// Collected items, never more than `max_results`.
	pub items: Vec<T>,
	/// Total reported by the upstream, when it reports one.
	pub total: Option<u64>,
	/// Number of pages requested.
	pub pages_fetched: u32,
	/// `true` when a ceiling stopped the loop.
	pub truncated: bool,
	/// Which ceiling stopped the loop.
	pub truncation_reason: Option<TruncationReason>,
}

/// Drives paginated reads against one upstream API.
pub struct FetchEngine<S> {
	source: S,
	tokens: Arc<dyn TokenProvider>,
	governor: Arc<dyn RateLimitPolicy>,
	defaults: FetchLimits,
}
impl<S> FetchEngine<S>
where
	S: PageSource,
{
	/// Creates an engine over `source`, authenticating through `tokens` and admitting
	/// calls through `governor`.
	pub fn new(
		source: S,
		tokens: Arc<dyn TokenProvider>,
		governor: Arc<dyn RateLimitPolicy>,
	) -> Self {
		Self { source, tokens, governor, defaults: FetchLimits::default() }
	}

	/// Overrides the limits used when a call passes none.
	pub fn with_default_limits(mut self, limits: FetchLimits) -> Self {
		self.defaults = limits;

		self
	}

	/// Default limits.
	pub fn default_limits(&self) -> FetchLimits {
		self.defaults
	}

	/// Fetches one page on behalf of `principal` after admission through the governor.
	pub async fn fetch_page(
		&self,
		principal: Option<&PrincipalId>,
		request: &PageRequest,
	) -> Result<Value> {
		let mut ctx = RateLimitContext::new(request.endpoint.as_str());

		if let Some(principal) = principal {
			ctx = ctx.with_principal(principal.clone());
		}

		self.governor.acquire(&ctx).await;

		let token = self.tokens.get_access_token(principal).await?;

		self.source.fetch_page(&token, request).await
	}

	/// Fetches pages until the data or a ceiling runs out.
	///
	/// `extract_items` pulls the page's items out of the response body; `extract_total`
	/// reads the upstream's total count, if the payload carries one.
	pub async fn fetch_all_pages<T, FI, FT>(
		&self,
		principal: Option<&PrincipalId>,
		endpoint: &str,
		params: &[(String, String)],
		extract_items: FI,
		extract_total: FT,
		limits: Option<FetchLimits>,
	) -> Result<FetchAllResult<T>>
	where
		FI: Fn(&Value) -> Vec<T>,
		FT: Fn(&Value) -> Option<u64>,
	{
		let limits = limits.unwrap_or(self.defaults);

		limits.validate()?;

		obs::observe(FlowKind::Fetch, "fetch_all_pages", async move {
			let mut result = FetchAllResult {
				items: Vec::new(),
				total: None,
				pages_fetched: 0,
				truncated: false,
				truncation_reason: None,
			};
			let mut request = PageRequest {
				endpoint: endpoint.to_owned(),
				params: params.to_vec(),
				page: 1,
				page_size: limits.page_size,
			};

			loop {
				let body = self.fetch_page(principal, &request).await?;

				result.pages_fetched += 1;

				if let Some(total) = extract_total(&body) {
					result.total = Some(total);
				}

				let page_items = extract_items(&body);

				if page_items.is_empty() {
					break;
				}

				let remaining = limits.max_results - result.items.len();

				if page_items.len() > remaining {
					result.items.extend(page_items.into_iter().take(remaining));
					result.truncation_reason =
						Some(TruncationReason::ResultCeiling { max_results: limits.max_results });

					break;
				}

				result.items.extend(page_items);

				if result.total.is_some_and(|total| result.items.len() as u64 >= total) {
					break;
				}
				if result.items.len() >= limits.max_results {
					result.truncation_reason =
						Some(TruncationReason::ResultCeiling { max_results: limits.max_results });

					break;
				}
				if result.pages_fetched >= limits.max_pages {
					result.truncation_reason =
						Some(TruncationReason::PageCeiling { max_pages: limits.max_pages });

					break;
				}

				tokio::time::sleep(limits.page_delay).await;

				request.page += 1;
			}

			result.truncated = result.truncation_reason.is_some();

			if let Some(reason) = &result.truncation_reason {
				obs::info_event(FlowKind::Fetch, "fetch_all_pages", &reason.to_string());
			}

			Ok(result)
		})
		.await
	}
}
impl<S> Debug for FetchEngine<S> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("FetchEngine").field("defaults", &self.defaults).finish_non_exhaustive()
	}
}

mod millis {
	// crates.io
	use serde::{Deserializer, Serializer};
	// self
	use crate::_prelude::*;

	pub fn serialize<S>(value: &StdDuration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_u64(value.as_millis() as u64)
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<StdDuration, D::Error>
	where
		D: Deserializer<'de>,
	{
		Ok(StdDuration::from_millis(u64::deserialize(deserializer)?))
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{auth::StoredTokenInfo, broker::BrokerFuture, ext::RateGovernor};

	struct StaticTokens;
	impl TokenProvider for StaticTokens {
		fn get_access_token<'a>(
			&'a self,
			_principal: Option<&'a PrincipalId>,
		) -> BrokerFuture<'a, String> {
			Box::pin(async { Ok("token".to_owned()) })
		}

		fn is_authenticated<'a>(
			&'a self,
			_principal: Option<&'a PrincipalId>,
		) -> BrokerFuture<'a, bool> {
			Box::pin(async { Ok(true) })
		}

		fn get_token_info<'a>(
			&'a self,
			_principal: Option<&'a PrincipalId>,
		) -> BrokerFuture<'a, Option<StoredTokenInfo>> {
			Box::pin(async { Ok(None) })
		}
	}

	/// Serves `count` numbered items in `{"content": [...], "totalElements": n}` pages.
	struct NumberedSource {
		count: u64,
		report_total: bool,
		requests: Mutex<Vec<u32>>,
	}
	impl PageSource for NumberedSource {
		fn fetch_page<'a>(&'a self, token: &'a str, request: &'a PageRequest) -> PageFuture<'a> {
			Box::pin(async move {
				assert_eq!(token, "token");

				self.requests.lock().push(request.page);

				let start = u64::from(request.page - 1) * u64::from(request.page_size);
				let end = (start + u64::from(request.page_size)).min(self.count);
				let content: Vec<u64> = (start..end.max(start)).collect();
				let mut body = serde_json::json!({ "content": content });

				if self.report_total {
					body["totalElements"] = self.count.into();
				}

				Ok(body)
			})
		}
	}

	fn engine(count: u64, report_total: bool) -> FetchEngine<NumberedSource> {
		FetchEngine::new(
			NumberedSource { count, report_total, requests: Mutex::new(Vec::new()) },
			Arc::new(StaticTokens),
			Arc::new(RateGovernor::default()),
		)
	}

	fn items(body: &Value) -> Vec<u64> {
		body["content"].as_array().map(|a| a.iter().filter_map(Value::as_u64).collect()).unwrap_or_default()
	}

	fn total(body: &Value) -> Option<u64> {
		body["totalElements"].as_u64()
	}

	#[tokio::test(start_paused = true)]
	async fn stops_when_total_is_reached() {
		let engine = engine(37, true);
		let limits = FetchLimits::default().with_page_size(10);
		let result = engine
			.fetch_all_pages(None, "invoices", &[], items, total, Some(limits))
			.await
			.expect("Fetch should succeed.");

		assert_eq!(result.items.len(), 37);
		assert_eq!(result.items.first(), Some(&0));
		assert_eq!(result.items.last(), Some(&36));
		assert_eq!(result.pages_fetched, 4);
		assert_eq!(result.total, Some(37));
		assert!(!result.truncated);
		assert_eq!(result.truncation_reason, None);
	}

	#[tokio::test(start_paused = true)]
	async fn result_ceiling_truncates() {
		let engine = engine(37, true);
		let limits = FetchLimits::default().with_page_size(10).with_max_results(20);
		let result = engine
			.fetch_all_pages(None, "invoices", &[], items, total, Some(limits))
			.await
			.expect("Fetch should succeed.");

		assert_eq!(result.items.len(), 20);
		assert!(result.truncated);
		assert_eq!(result.truncation_reason, Some(TruncationReason::ResultCeiling { max_results: 20 }));
		assert!(result.truncation_reason.expect("Reason should be set.").to_string().contains("result ceiling"));
	}

	#[tokio::test(start_paused = true)]
	async fn overflowing_page_is_cut_at_the_ceiling() {
		let engine = engine(37, false);
		let limits = FetchLimits::default().with_page_size(10).with_max_results(15);
		let result = engine
			.fetch_all_pages(None, "customers", &[], items, total, Some(limits))
			.await
			.expect("Fetch should succeed.");

		assert_eq!(result.items.len(), 15);
		assert_eq!(result.pages_fetched, 2);
		assert!(result.truncated);
	}

	#[tokio::test(start_paused = true)]
	async fn empty_page_completes_and_page_ceiling_truncates() {
		let engine = engine(25, false);
		let limits = FetchLimits::default().with_page_size(10);
		let result = engine
			.fetch_all_pages(None, "vouchers", &[], items, total, Some(limits))
			.await
			.expect("Fetch should succeed.");

		assert_eq!(result.items.len(), 25);
		assert_eq!(result.pages_fetched, 4, "The empty fourth page ends the loop.");
		assert!(!result.truncated);

		let capped = engine
			.fetch_all_pages(None, "vouchers", &[], items, total, Some(limits.with_max_pages(2)))
			.await
			.expect("Fetch should succeed.");

		assert_eq!(capped.items.len(), 20);
		assert_eq!(capped.truncation_reason, Some(TruncationReason::PageCeiling { max_pages: 2 }));
	}

	#[tokio::test(start_paused = true)]
	async fn pages_are_spaced_by_the_delay() {
		let engine = engine(30, true);
		let limits = FetchLimits::default().with_page_size(10);
		let started = tokio::time::Instant::now();

		engine
			.fetch_all_pages(None, "orders", &[], items, total, Some(limits))
			.await
			.expect("Fetch should succeed.");

		assert_eq!(*engine.source.requests.lock(), vec![1, 2, 3]);
		assert_eq!(started.elapsed(), StdDuration::from_millis(200), "Two gaps, none after the last page.");
	}

	#[tokio::test]
	async fn zero_limits_are_rejected() {
		let engine = engine(5, true);

		for limits in [
			FetchLimits::default().with_page_size(0),
			FetchLimits::default().with_max_pages(0),
			FetchLimits::default().with_max_results(0),
		] {
			let err = engine
				.fetch_all_pages(None, "invoices", &[], items, total, Some(limits))
				.await
				.expect_err("Zero limits must be rejected.");

			assert!(matches!(err, Error::Config(ConfigError::InvalidFetchLimits { .. })));
		}
	}
}
