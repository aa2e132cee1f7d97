// self
use crate::obs::{FlowKind, FlowOutcome};

/// Bumps `ledger_broker_flow_total{flow, outcome}` on the global recorder.
#[cfg(feature = "metrics")]
pub fn record_flow_outcome(kind: FlowKind, outcome: FlowOutcome) {
	metrics::counter!("ledger_broker_flow_total", "flow" => kind.as_str(), "outcome" => outcome.as_str())
		.increment(1);
}
/// No-op without the `metrics` feature.
#[cfg(not(feature = "metrics"))]
pub fn record_flow_outcome(_: FlowKind, _: FlowOutcome) {}
