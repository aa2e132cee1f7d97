//! Outbound traffic extensions.
//!
//! [`RateLimitPolicy`] is the contract the fetch engine consults before each upstream
//! call; [`RateGovernor`] is the process-wide sliding-window implementation.

pub mod rate_limit;

pub use rate_limit::*;
