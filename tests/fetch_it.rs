#![cfg(feature = "reqwest")]

mod common;

// std
use std::{sync::Arc, time::Duration as StdDuration};
// crates.io
use httpmock::prelude::*;
use serde_json::{Value, json};
use time::Duration;
use url::Url;
// self
use ledger_broker::{
	error::Error,
	ext::{RateGovernor, RateLimitContext, RateLimitPolicy},
	fetch::{FetchEngine, FetchLimits, ReqwestPageSource, TruncationReason},
};

fn items(body: &Value) -> Vec<Value> {
	body["content"].as_array().cloned().unwrap_or_default()
}

fn total(body: &Value) -> Option<u64> {
	body["totalElements"].as_u64()
}

async fn mock_invoices(server: &MockServer, count: usize, page_size: usize) {
	let pages = count.div_ceil(page_size);

	for page in 1..=pages {
		let start = (page - 1) * page_size;
		let end = (start + page_size).min(count);
		let content: Vec<Value> = (start..end).map(|n| json!({ "id": n })).collect();

		server
			.mock_async(|when, then| {
				when.method(GET)
					.path("/v1/invoices")
					.query_param("page", page.to_string())
					.query_param("size", page_size.to_string())
					.header("authorization", "Bearer fetch-access");
				then.status(200)
					.header("content-type", "application/json")
					.json_body(json!({ "content": content, "totalElements": count }));
			})
			.await;
	}
}

async fn engine(server: &MockServer) -> FetchEngine<ReqwestPageSource> {
	let (broker, store) = common::fake_broker(common::FakeTokenEndpoint::default());
	let owner = common::principal("client-f:owner");

	common::seed(store.as_ref(), &owner, "fetch-access", "fetch-refresh", Duration::hours(1)).await;

	let broker = broker.with_default_principal(owner);
	let source = ReqwestPageSource::new(
		Url::parse(&format!("{}/v1", server.base_url())).expect("API base should parse."),
	)
	.expect("Page source should build.");

	FetchEngine::new(source, Arc::new(broker), Arc::new(RateGovernor::default()))
}

#[tokio::test]
async fn walks_pages_until_the_total_is_reached() {
	let server = MockServer::start_async().await;

	mock_invoices(&server, 37, 10).await;

	let engine = engine(&server).await;
	let limits = FetchLimits::default().with_page_size(10).with_page_delay(StdDuration::from_millis(10));
	let result = engine
		.fetch_all_pages(None, "invoices", &[], items, total, Some(limits))
		.await
		.expect("Fetch should succeed.");

	assert_eq!(result.items.len(), 37);
	assert_eq!(result.pages_fetched, 4);
	assert_eq!(result.total, Some(37));
	assert!(!result.truncated);
	assert_eq!(result.items[36]["id"], 36);
}

#[tokio::test]
async fn result_ceiling_marks_truncation() {
	let server = MockServer::start_async().await;

	mock_invoices(&server, 37, 10).await;

	let engine = engine(&server).await;
	let limits = FetchLimits::default()
		.with_page_size(10)
		.with_max_results(20)
		.with_page_delay(StdDuration::ZERO);
	let result = engine
		.fetch_all_pages(None, "invoices", &[], items, total, Some(limits))
		.await
		.expect("Fetch should succeed.");

	assert_eq!(result.items.len(), 20);
	assert!(result.truncated);
	assert_eq!(result.truncation_reason, Some(TruncationReason::ResultCeiling { max_results: 20 }));
}

#[tokio::test]
async fn a_failed_page_fails_the_whole_fetch() {
	let server = MockServer::start_async().await;

	server
		.mock_async(|when, then| {
			when.method(GET).path("/v1/invoices").query_param("page", "1");
			then.status(200)
				.header("content-type", "application/json")
				.json_body(json!({ "content": [{ "id": 0 }], "totalElements": 2 }));
		})
		.await;
	server
		.mock_async(|when, then| {
			when.method(GET).path("/v1/invoices").query_param("page", "2");
			then.status(503).body("maintenance");
		})
		.await;

	let engine = engine(&server).await;
	let limits = FetchLimits::default().with_page_size(1).with_page_delay(StdDuration::ZERO);
	let err = engine
		.fetch_all_pages(None, "invoices", &[], items, total, Some(limits))
		.await
		.expect_err("A failed page must fail the fetch.");

	assert!(matches!(err, Error::UpstreamTransientFailure(_)));
}

#[tokio::test(start_paused = true)]
async fn governor_delays_the_call_past_the_quota() {
	let governor = Arc::new(RateGovernor::default());
	let ctx = RateLimitContext::new("invoices");
	let started = tokio::time::Instant::now();
	let mut admitted = Vec::new();

	for n in 0..26 {
		let governor = governor.clone();
		let ctx = ctx.clone().with_principal(common::principal(&format!("client-g:{n}")));

		admitted.push(tokio::spawn(async move {
			governor.acquire(&ctx).await;

			tokio::time::Instant::now()
		}));
	}

	let mut instants = Vec::new();

	for task in admitted {
		instants.push(task.await.expect("Admission task should not panic."));
	}

	instants.sort();

	assert!(instants[24] - started < StdDuration::from_millis(1));
	assert!(instants[25] - instants[0] >= StdDuration::from_millis(5_000));
}
