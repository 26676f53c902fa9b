//! Readiness implements the generic fallback readiness checker and the poll loop that drives a
//! resource's readiness-fn (factory-supplied or fallback) to a terminal answer (§4.4).

use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use kroxide_types::ReadinessOutcome;

/// READINESS_POLL_INTERVAL is how often the readiness poll loop re-checks an unready resource
/// (§4.4: "polled no more often than every 2 seconds").
pub const READINESS_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// ReadinessError is returned when the poll loop cannot make progress.
#[derive(thiserror::Error, Debug)]
pub enum ReadinessError {
    /// The configured timeout elapsed before the resource became ready.
    #[error("readiness timed out after {0:?}")]
    TimedOut(Duration),
    /// The cancellation token was triggered before the resource became ready.
    #[error("readiness check cancelled")]
    Cancelled,
}

/// Check_readiness is the kind-agnostic fallback checker (§4.4): "absent a factory-supplied
/// predicate, a generic checker inspects `status.conditions` for a `Ready`/`Available` condition
/// in `True` state, falling back to comparing `status.readyReplicas` against `spec.replicas` when
/// present, and otherwise reports not-ready."
pub fn check_readiness(object: &Value) -> ReadinessOutcome {
    if let Some(conditions) = object.pointer("/status/conditions").and_then(Value::as_array) {
        for cond in conditions {
            let ty = cond.get("type").and_then(Value::as_str).unwrap_or_default();
            if matches!(ty, "Ready" | "Available") {
                let status = cond.get("status").and_then(Value::as_str).unwrap_or_default();
                return if status == "True" {
                    ReadinessOutcome::ready()
                } else {
                    let message = cond
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("condition not True")
                        .to_string();
                    ReadinessOutcome::pending(message)
                };
            }
        }
    }

    if let (Some(ready), Some(desired)) = (
        object.pointer("/status/readyReplicas").and_then(Value::as_u64),
        object.pointer("/spec/replicas").and_then(Value::as_u64),
    ) {
        return if ready >= desired {
            ReadinessOutcome::ready()
        } else {
            ReadinessOutcome::pending(format!("{ready}/{desired} replicas ready"))
        };
    }

    ReadinessOutcome::pending("no generic readiness signal found for this kind".to_string())
}

/// Poll_until_ready repeatedly calls `fetch` to obtain the resource's current state and `check`
/// to judge readiness, waiting [`READINESS_POLL_INTERVAL`] between attempts, until `check`
/// reports ready, `timeout` elapses, or `cancel` fires.
///
/// # Errors
///
/// Returns [`ReadinessError::TimedOut`] or [`ReadinessError::Cancelled`] if the resource never
/// becomes ready. Propagates `fetch`'s error type as-is on the first failed fetch.
pub async fn poll_until_ready<T, E, F, C>(
    mut fetch: F,
    mut check: C,
    timeout: Duration,
    cancel: CancellationToken,
) -> Result<ReadinessOutcome, PollError<E>>
where
    F: AsyncFnMut() -> Result<T, E>,
    C: FnMut(&T) -> ReadinessOutcome,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let current = fetch().await.map_err(PollError::Fetch)?;
        let outcome = check(&current);
        trace!(ready = outcome.ready, "readiness check");
        if outcome.ready {
            return Ok(outcome);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(PollError::Readiness(ReadinessError::TimedOut(timeout)));
        }
        tokio::select! {
            _ = tokio::time::sleep(READINESS_POLL_INTERVAL) => {}
            () = cancel.cancelled() => return Err(PollError::Readiness(ReadinessError::Cancelled)),
        }
    }
}

/// PollError wraps either a fetch failure (caller's error type) or a [`ReadinessError`].
#[derive(thiserror::Error, Debug)]
pub enum PollError<E> {
    /// Fetching the resource's current state failed.
    #[error("fetch error: {0}")]
    Fetch(E),
    /// The poll loop ended without the resource becoming ready.
    #[error(transparent)]
    Readiness(#[from] ReadinessError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_condition_reports_ready() {
        let obj = serde_json::json!({"status": {"conditions": [{"type": "Ready", "status": "True"}]}});
        assert!(check_readiness(&obj).ready);
    }

    #[test]
    fn false_condition_reports_pending_with_message() {
        let obj = serde_json::json!({"status": {"conditions": [{"type": "Available", "status": "False", "message": "waiting on pods"}]}});
        let outcome = check_readiness(&obj);
        assert!(!outcome.ready);
        assert_eq!(outcome.message.as_deref(), Some("waiting on pods"));
    }

    #[test]
    fn replica_counts_fall_back_when_no_conditions() {
        let obj = serde_json::json!({"spec": {"replicas": 3}, "status": {"readyReplicas": 3}});
        assert!(check_readiness(&obj).ready);
    }

    #[tokio::test]
    async fn poll_times_out_if_never_ready() {
        let cancel = CancellationToken::new();
        let result = poll_until_ready::<_, std::convert::Infallible, _, _>(
            async || Ok(serde_json::json!({})),
            |v: &Value| check_readiness(v),
            Duration::from_millis(10),
            cancel,
        )
        .await;
        assert!(matches!(result, Err(PollError::Readiness(ReadinessError::TimedOut(_)))));
    }
}
