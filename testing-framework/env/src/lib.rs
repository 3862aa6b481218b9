use std::{env, path::PathBuf};

#[must_use]
pub fn slow_test_env() -> bool {
    env::var("SLOW_TEST_ENV").is_ok_and(|s| s == "true")
}

#[must_use]
pub fn harness_keep_logs() -> bool {
    env::var("HARNESS_KEEP_LOGS").is_ok()
}

#[must_use]
pub fn harness_log_dir() -> Option<PathBuf> {
    env::var("HARNESS_LOG_DIR").ok().map(PathBuf::from)
}

#[must_use]
pub fn harness_node_js_bin() -> Option<PathBuf> {
    env::var_os("HARNESS_NODE_JS_BIN").map(PathBuf::from)
}

#[must_use]
pub fn harness_run_timeout_secs() -> Option<u64> {
    parse_env("HARNESS_RUN_TIMEOUT_SECS")
}

#[must_use]
pub fn harness_step_timeout_secs() -> Option<u64> {
    parse_env("HARNESS_STEP_TIMEOUT_SECS")
}

#[must_use]
pub fn harness_poll_interval_ms() -> Option<u64> {
    parse_env("HARNESS_POLL_INTERVAL_MS")
}

#[must_use]
pub fn harness_startup_grace_ms() -> Option<u64> {
    parse_env("HARNESS_STARTUP_GRACE_MS")
}

#[must_use]
pub fn harness_readiness_timeout_secs() -> Option<u64> {
    parse_env("HARNESS_READINESS_TIMEOUT_SECS")
}

fn parse_env(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|v| v.trim().parse::<u64>().ok())
}
