//! Request-scoped principal propagation.
//!
//! The HTTP surface binds the verified principal to the current task with [`scope`];
//! broker and fetch calls made without an explicit principal pick it up through
//! [`current_principal`].

// self
use crate::{_prelude::*, auth::PrincipalId};

tokio::task_local! {
	static PRINCIPAL: PrincipalId;
}

/// Runs `fut` with `principal` bound as the task's current principal.
pub async fn scope<F>(principal: PrincipalId, fut: F) -> F::Output
where
	F: Future,
{
	PRINCIPAL.scope(principal, fut).await
}

/// Returns the principal bound by an enclosing [`scope`], if any.
pub fn current_principal() -> Option<PrincipalId> {
	PRINCIPAL.try_with(Clone::clone).ok()
}

/// Resolves the effective principal: explicit argument, then task scope, then `fallback`.
pub fn resolve_principal(explicit: Option<&PrincipalId>, fallback: &PrincipalId) -> PrincipalId {
	explicit.cloned().or_else(current_principal).unwrap_or_else(|| fallback.clone())
}
