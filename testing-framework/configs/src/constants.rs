/// Loopback host every locally spawned node binds to.
pub const LOCAL_HOST: &str = "127.0.0.1";

/// Path of the Prometheus text exposition served by nodes.
pub const METRICS_PATH: &str = "/metrics";

/// Prefix substrate-based nodes put in front of their metric names.
pub const SUBSTRATE_METRIC_PREFIX: &str = "substrate_";

/// Interpreter used for `js-script` steps unless `HARNESS_NODE_JS_BIN` is set.
pub const DEFAULT_NODE_JS_BIN: &str = "node";

/// Upper bound on captured script output kept in the run report.
pub const MAX_CAPTURED_OUTPUT_BYTES: usize = 16 * 1024;
