use std::{sync::LazyLock, time::Duration};

use testing_framework_env as tf_env;

pub mod constants;
pub mod timeouts;
pub mod topology;

static IS_SLOW_TEST_ENV: LazyLock<bool> = LazyLock::new(tf_env::slow_test_env);

const SLOW_ENV_TIMEOUT_MULTIPLIER: u32 = 2;

/// In slow test environments like Codecov, use 2x timeout.
#[must_use]
pub fn adjust_timeout(d: Duration) -> Duration {
    if *IS_SLOW_TEST_ENV {
        d.checked_mul(SLOW_ENV_TIMEOUT_MULTIPLIER)
            .unwrap_or(Duration::MAX)
    } else {
        d
    }
}
