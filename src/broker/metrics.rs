// std
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Clone, Copy)]
pub(crate) enum RefreshEvent {
	Attempt,
	Success,
	Failure,
	UpstreamCall,
}

/// Lock-free tallies of refresh flights.
///
/// Only the caller leading a flight is counted; callers that share its outcome are not. A
/// leader that finds the credential already rewritten counts as a success without an
/// upstream call.
#[derive(Debug, Default)]
pub struct RefreshMetrics([AtomicU64; 4]);
impl RefreshMetrics {
	/// Flights led by a caller.
	pub fn attempts(&self) -> u64 {
		self.read(RefreshEvent::Attempt)
	}

	/// Flights that ended with a usable credential.
	pub fn successes(&self) -> u64 {
		self.read(RefreshEvent::Success)
	}

	/// Flights that ended in an error.
	pub fn failures(&self) -> u64 {
		self.read(RefreshEvent::Failure)
	}

	/// Refresh grants sent upstream.
	pub fn upstream_calls(&self) -> u64 {
		self.read(RefreshEvent::UpstreamCall)
	}

	pub(crate) fn record(&self, event: RefreshEvent) {
		self.0[event as usize].fetch_add(1, Ordering::Relaxed);
	}

	fn read(&self, event: RefreshEvent) -> u64 {
		self.0[event as usize].load(Ordering::Relaxed)
	}
}
