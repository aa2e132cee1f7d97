//! Sliding-window rate governor shared by every outbound upstream API call.

// crates.io
use tokio::time::Instant;
// self
use crate::{_prelude::*, auth::PrincipalId};

/// Boxed future returned by [`RateLimitPolicy::acquire`].
pub type AcquireFuture<'a> = Pin<Box<dyn Future<Output = ()> + 'a + Send>>;

/// Strategy consulted before outbound calls hit the upstream API.
pub trait RateLimitPolicy
where
	Self: Send + Sync,
{
	/// Evaluates whether the next call would have to wait, without recording it.
	fn evaluate(&self, context: &RateLimitContext) -> RateLimitDecision;

	/// Suspends until the call may proceed, then records it.
	fn acquire<'a>(&'a self, context: &'a RateLimitContext) -> AcquireFuture<'a>;
}

/// Context shared with a [`RateLimitPolicy`] before an outbound call is made.
#[derive(Clone, Debug)]
pub struct RateLimitContext {
	/// Principal the call is made for, when known.
	pub principal: Option<PrincipalId>,
	/// Logical operation (endpoint) being attempted.
	pub operation: String,
}
impl RateLimitContext {
	/// Creates a new context for the given operation.
	pub fn new(operation: impl Into<String>) -> Self {
		Self { principal: None, operation: operation.into() }
	}

	/// Attaches the principal the call is made for.
	pub fn with_principal(mut self, principal: PrincipalId) -> Self {
		self.principal = Some(principal);

		self
	}
}

/// Result emitted by a [`RateLimitPolicy`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
	/// The request may proceed immediately.
	Allow,
	/// The request should be delayed.
	Delay(RetryDirective),
}

/// Advises callers how long to wait after a [`RateLimitDecision::Delay`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryDirective {
	/// Suggested wait before the call is admitted.
	pub recommended_backoff: StdDuration,
	/// Optional descriptive string.
	pub reason: Option<String>,
}
impl RetryDirective {
	/// Creates a new directive with the provided wait.
	pub fn new(recommended_backoff: StdDuration) -> Self {
		Self { recommended_backoff, reason: None }
	}

	/// Adds a human-readable reason.
	pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
		self.reason = Some(reason.into());

		self
	}
}

/// Fixed quota per sliding window, shared across principals and call sites.
///
/// The governor keeps the admission instants of the last window in a single
/// [`VecDeque`]; instants are taken from [`tokio::time`] so paused-clock tests can drive it.
#[derive(Debug)]
pub struct RateGovernor {
	quota: usize,
	window: StdDuration,
	margin: StdDuration,
	calls: Mutex<VecDeque<Instant>>,
}
impl RateGovernor {
	/// Default number of calls admitted per window.
	pub const DEFAULT_QUOTA: usize = 25;
	/// Default window length.
	pub const DEFAULT_WINDOW: StdDuration = StdDuration::from_millis(5_000);
	/// Default safety margin added to every computed wait.
	pub const DEFAULT_MARGIN: StdDuration = StdDuration::from_millis(50);

	/// Creates a governor admitting `quota` calls per `window`; a zero quota admits one.
	pub fn new(quota: usize, window: StdDuration) -> Self {
		Self {
			quota: quota.max(1),
			window,
			margin: Self::DEFAULT_MARGIN,
			calls: Mutex::new(VecDeque::new()),
		}
	}

	/// Overrides the safety margin.
	pub fn with_margin(mut self, margin: StdDuration) -> Self {
		self.margin = margin;

		self
	}

	/// Configured quota.
	pub fn quota(&self) -> usize {
		self.quota
	}

	/// Configured window.
	pub fn window(&self) -> StdDuration {
		self.window
	}

	/// Number of admissions still inside the window.
	pub fn in_window(&self) -> usize {
		let mut calls = self.calls.lock();

		self.prune(&mut calls, Instant::now());

		calls.len()
	}

	/// Returns the wait required before the next admission, or `None` when admissible.
	pub fn check(&self) -> Option<StdDuration> {
		let mut calls = self.calls.lock();

		self.wait_for(&mut calls, Instant::now())
	}

	/// Waits until a slot is free and records the admission.
	pub async fn admit(&self) {
		loop {
			let wait = {
				let mut calls = self.calls.lock();
				let now = Instant::now();

				match self.wait_for(&mut calls, now) {
					None => {
						calls.push_back(now);

						return;
					},
					Some(wait) => wait,
				}
			};

			tokio::time::sleep(wait).await;
		}
	}

	fn prune(&self, calls: &mut VecDeque<Instant>, now: Instant) {
		while calls.front().is_some_and(|oldest| now.duration_since(*oldest) >= self.window) {
			calls.pop_front();
		}
	}

	fn wait_for(&self, calls: &mut VecDeque<Instant>, now: Instant) -> Option<StdDuration> {
		self.prune(calls, now);

		if calls.len() < self.quota {
			return None;
		}

		let oldest = *calls.front()?;
		let elapsed = now.duration_since(oldest);

		Some(self.window.saturating_sub(elapsed) + self.margin)
	}
}
impl Default for RateGovernor {
	fn default() -> Self {
		Self::new(Self::DEFAULT_QUOTA, Self::DEFAULT_WINDOW)
	}
}
impl RateLimitPolicy for RateGovernor {
	fn evaluate(&self, _context: &RateLimitContext) -> RateLimitDecision {
		match self.check() {
			None => RateLimitDecision::Allow,
			Some(wait) => RateLimitDecision::Delay(
				RetryDirective::new(wait)
					.with_reason(format!("{} calls per {:?} exhausted", self.quota, self.window)),
			),
		}
	}

	fn acquire<'a>(&'a self, _context: &'a RateLimitContext) -> AcquireFuture<'a> {
		Box::pin(self.admit())
	}
}
