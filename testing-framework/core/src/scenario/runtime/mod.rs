mod context;
mod executor;
mod node_registry;
mod reporting;
mod runner;

pub use context::{CleanupGuard, RunContext};
pub use executor::StepExecutor;
pub use node_registry::{NodeEndpoint, NodeRegistry};
pub use reporting::{PrometheusReporter, ReportError, ReportSource};
pub use runner::Runner;
