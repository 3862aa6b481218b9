use std::time::Duration;

use testing_framework_env as tf_env;

use crate::adjust_timeout;

pub const RUN_TIMEOUT_SECS: u64 = 60 * 60;
pub const STEP_TIMEOUT_SECS: u64 = 60;
pub const POLL_INTERVAL_MS: u64 = 1_000;
pub const STARTUP_GRACE_MS: u64 = 500;
pub const READINESS_TIMEOUT_SECS: u64 = 120;
pub const READINESS_POLL_INTERVAL_MS: u64 = 500;

/// Deadline for a whole run when the topology file does not set one.
pub fn run_timeout() -> Duration {
    adjust_timeout(Duration::from_secs(
        tf_env::harness_run_timeout_secs().unwrap_or(RUN_TIMEOUT_SECS),
    ))
}

/// Timeout applied to steps whose DSL line has no `within` clause.
pub fn step_timeout() -> Duration {
    adjust_timeout(Duration::from_secs(
        tf_env::harness_step_timeout_secs().unwrap_or(STEP_TIMEOUT_SECS),
    ))
}

pub fn poll_interval() -> Duration {
    Duration::from_millis(tf_env::harness_poll_interval_ms().unwrap_or(POLL_INTERVAL_MS))
}

/// How long a freshly spawned node must stay alive to count as launched.
pub fn startup_grace() -> Duration {
    Duration::from_millis(tf_env::harness_startup_grace_ms().unwrap_or(STARTUP_GRACE_MS))
}

pub fn readiness_timeout() -> Duration {
    adjust_timeout(Duration::from_secs(
        tf_env::harness_readiness_timeout_secs().unwrap_or(READINESS_TIMEOUT_SECS),
    ))
}

pub const fn readiness_poll_interval() -> Duration {
    Duration::from_millis(READINESS_POLL_INTERVAL_MS)
}
