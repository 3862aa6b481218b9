use std::time::Duration;

use tokio::time::{self, Instant};
use tracing::{debug, info};

use super::{
    runtime::{ReportError, ReportSource},
    step::{MetricQuery, Predicate, Value},
};

/// What an assertion step waits for.
#[derive(Clone, Copy, Debug)]
pub enum Condition<'a> {
    Report {
        metric: &'a MetricQuery,
        predicate: &'a Predicate,
    },
    IsUp,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AssertionOutcome {
    Passed,
    /// Deadline reached without the condition holding.
    TimedOut { last_error: Option<String> },
    /// Non-retryable reporting error.
    Failed { reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssertionResult {
    pub outcome: AssertionOutcome,
    /// Last value the node reported, if any.
    pub observed: Option<Value>,
    pub elapsed: Duration,
    pub attempts: u32,
}

/// Poll `node` until `condition` holds or `timeout` elapses.
///
/// The first poll happens immediately. Unreachable nodes and missing metrics
/// are retried like a false predicate; only the deadline ends the wait.
pub async fn await_condition(
    source: &dyn ReportSource,
    node: &str,
    condition: Condition<'_>,
    timeout: Duration,
    poll_interval: Duration,
) -> AssertionResult {
    let started = Instant::now();
    let deadline = deadline_after(started, timeout);
    let mut observed = None;
    let mut last_error = None;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match time::timeout_at(deadline, poll(source, node, condition)).await {
            Ok(Ok(value)) => {
                if condition_holds(condition, &value) {
                    info!(node, attempts, observed = %value, "condition satisfied");
                    return AssertionResult {
                        outcome: AssertionOutcome::Passed,
                        observed: Some(value),
                        elapsed: started.elapsed(),
                        attempts,
                    };
                }
                debug!(node, attempts, observed = %value, "condition not met yet");
                observed = Some(value);
                last_error = None;
            }
            Ok(Err(err)) if err.is_retryable() => {
                debug!(node, attempts, error = %err, "report unavailable, retrying");
                last_error = Some(err.to_string());
            }
            Ok(Err(err)) => {
                return AssertionResult {
                    outcome: AssertionOutcome::Failed {
                        reason: err.to_string(),
                    },
                    observed,
                    elapsed: started.elapsed(),
                    attempts,
                };
            }
            Err(_) => break,
        }

        let now = Instant::now();
        if now >= deadline {
            break;
        }
        time::sleep_until(deadline_after(now, poll_interval).min(deadline)).await;
    }

    AssertionResult {
        outcome: AssertionOutcome::TimedOut { last_error },
        observed,
        elapsed: started.elapsed(),
        attempts,
    }
}

/// `start + timeout`, saturating at roughly thirty years out.
pub(crate) fn deadline_after(start: Instant, timeout: Duration) -> Instant {
    start
        .checked_add(timeout)
        .unwrap_or_else(|| start + FAR_FUTURE)
}

const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

async fn poll(
    source: &dyn ReportSource,
    node: &str,
    condition: Condition<'_>,
) -> Result<Value, ReportError> {
    match condition {
        Condition::Report { metric, .. } => source.report(node, metric).await,
        Condition::IsUp => source.is_up(node).await.map(|()| Value::Int(1)),
    }
}

fn condition_holds(condition: Condition<'_>, value: &Value) -> bool {
    match condition {
        Condition::Report { predicate, .. } => predicate.holds(value),
        Condition::IsUp => true,
    }
}
