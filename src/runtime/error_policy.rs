//! # Error policy
//!
//! Failed reconciliations are requeued with exponential backoff, tracked
//! per resource so one failing extension does not slow down the others.

use std::sync::Arc;
use std::time::Duration;

use kube_runtime::controller::Action;
use tracing::error;

use crate::crd::Extension;
use crate::observability::metrics;

use super::watch_loop::{Context, ReconcileError};
use crate::controller::LifecycleActuator;

/// Initial requeue delay after the first error.
const BACKOFF_BASE: Duration = Duration::from_secs(5);
/// Upper bound on the requeue delay.
const BACKOFF_MAX: Duration = Duration::from_secs(300);

/// Requeue delay for the given consecutive error count.
pub fn backoff_duration(attempts: u32) -> Duration {
    let exp = attempts.saturating_sub(1).min(16);
    let delay = BACKOFF_BASE.saturating_mul(1u32 << exp);
    delay.min(BACKOFF_MAX)
}

/// Handles a reconciliation error: records it and requeues with
/// per-resource exponential backoff.
pub fn error_policy<A: LifecycleActuator>(
    extension: Arc<Extension>,
    error: &ReconcileError,
    ctx: Arc<Context<A>>,
) -> Action {
    let name = extension.metadata.name.as_deref().unwrap_or("unknown");
    let namespace = extension.metadata.namespace.as_deref().unwrap_or("unknown");

    error!(
        name = name,
        namespace = namespace,
        error = %error,
        "reconciliation failed"
    );
    metrics::increment_reconciliation_errors();

    let attempts = ctx.record_error(&format!("{namespace}/{name}"));

    Action::requeue(backoff_duration(attempts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(backoff_duration(1), Duration::from_secs(5));
        assert_eq!(backoff_duration(2), Duration::from_secs(10));
        assert_eq!(backoff_duration(3), Duration::from_secs(20));
        assert_eq!(backoff_duration(4), Duration::from_secs(40));
    }

    #[test]
    fn backoff_is_capped() {
        assert_eq!(backoff_duration(7), Duration::from_secs(300));
        assert_eq!(backoff_duration(30), Duration::from_secs(300));
        assert_eq!(backoff_duration(u32::MAX), Duration::from_secs(300));
    }

    #[test]
    fn backoff_handles_zero_attempts() {
        assert_eq!(backoff_duration(0), Duration::from_secs(5));
    }
}
