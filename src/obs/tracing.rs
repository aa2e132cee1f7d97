// self
use crate::{_prelude::*, obs::FlowKind};

#[cfg(feature = "tracing")]
pub(super) async fn in_span<Fut>(kind: FlowKind, stage: &'static str, fut: Fut) -> Fut::Output
where
	Fut: Future,
{
	// crates.io
	use tracing::Instrument;

	fut.instrument(tracing::info_span!("ledger_broker.flow", flow = kind.as_str(), stage)).await
}
#[cfg(not(feature = "tracing"))]
pub(super) async fn in_span<Fut>(_: FlowKind, _: &'static str, fut: Fut) -> Fut::Output
where
	Fut: Future,
{
	fut.await
}

/// Warn-level event for a failed or degraded step.
///
/// Only `Display` output is logged; token values are wrapped in a redacting type before
/// they can reach an error message.
#[cfg(feature = "tracing")]
pub(crate) fn warn_event(kind: FlowKind, stage: &'static str, detail: &dyn Display) {
	tracing::warn!(flow = kind.as_str(), stage, detail = %detail, "flow step failed");
}
#[cfg(not(feature = "tracing"))]
pub(crate) fn warn_event(_: FlowKind, _: &'static str, _: &dyn Display) {}

/// Info-level event for a notable transition.
#[cfg(feature = "tracing")]
pub(crate) fn info_event(kind: FlowKind, stage: &'static str, message: &str) {
	tracing::info!(flow = kind.as_str(), stage, "{message}");
}
#[cfg(not(feature = "tracing"))]
pub(crate) fn info_event(_: FlowKind, _: &'static str, _: &str) {}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[tokio::test]
	async fn helpers_run_without_a_subscriber() {
		warn_event(FlowKind::UpstreamRefresh, "test", &"boom");
		info_event(FlowKind::Authorize, "test", "started");

		assert_eq!(in_span(FlowKind::Fetch, "test", async { 42 }).await, 42);
	}
}
