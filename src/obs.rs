//! Structured logs, spans and counters for bridge, broker and fetch flows.
//!
//! With the `tracing` feature every observed flow runs inside a `ledger_broker.flow` span
//! carrying `flow` and `stage` fields. With the `metrics` feature the
//! `ledger_broker_flow_total` counter is bumped per attempt and per outcome. Without
//! either feature the helpers compile down to nothing.

mod metrics;
mod tracing;

pub use metrics::record_flow_outcome;
pub(crate) use tracing::{info_event, warn_event};

// self
use crate::_prelude::*;

/// Operation being observed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowKind {
	/// `/authorize` handling.
	Authorize,
	/// Upstream redirect landing on the bridge callback.
	UpstreamCallback,
	/// Local authorization-code exchange.
	CodeExchange,
	/// Local refresh-token rotation.
	TokenRefresh,
	/// Upstream authorization-code exchange.
	UpstreamExchange,
	/// Upstream refresh grant.
	UpstreamRefresh,
	/// Paginated fetch.
	Fetch,
}
impl FlowKind {
	/// Label used for the `flow` field.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Authorize => "authorize",
			Self::UpstreamCallback => "upstream_callback",
			Self::CodeExchange => "code_exchange",
			Self::TokenRefresh => "token_refresh",
			Self::UpstreamExchange => "upstream_exchange",
			Self::UpstreamRefresh => "upstream_refresh",
			Self::Fetch => "fetch",
		}
	}
}
impl Display for FlowKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Counter label for one step of a flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowOutcome {
	/// The flow started.
	Attempt,
	/// The flow returned `Ok`.
	Success,
	/// The flow returned `Err`.
	Failure,
}
impl FlowOutcome {
	/// Label used for the `outcome` field.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Attempt => "attempt",
			Self::Success => "success",
			Self::Failure => "failure",
		}
	}

	fn of<T>(result: &Result<T>) -> Self {
		if result.is_ok() { Self::Success } else { Self::Failure }
	}
}

/// Runs `fut` inside a flow span and records its outcome; failures are logged at warn.
pub(crate) async fn observe<T, Fut>(kind: FlowKind, stage: &'static str, fut: Fut) -> Result<T>
where
	Fut: Future<Output = Result<T>>,
{
	record_flow_outcome(kind, FlowOutcome::Attempt);

	let result = tracing::in_span(kind, stage, fut).await;

	record_flow_outcome(kind, FlowOutcome::of(&result));

	if let Err(e) = &result {
		warn_event(kind, stage, e);
	}

	result
}
