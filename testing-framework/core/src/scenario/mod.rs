//! Scenario model and runtime: parsed steps, the step graph, and the
//! components that execute it against a deployed network.

mod assertion;
mod definition;
mod deployer;
pub mod dsl;
pub mod http_probe;
mod invoker;
mod report;
pub mod runtime;
mod step;

pub use assertion::{AssertionOutcome, AssertionResult, Condition, await_condition};
pub use definition::{ConfigError, RunSettings, Scenario, ScenarioBuilder, StepPlan};
pub use deployer::Deployer;
pub use invoker::{
    ExecutableInvoker, InterpreterInvoker, InvocationError, InvocationOutcome, InvocationTarget,
    Invoker, Invokers,
};
pub use report::{RunReport, StepFailure, StepResult, StepState, TimeoutScope};
pub use runtime::{
    CleanupGuard, NodeEndpoint, NodeRegistry, PrometheusReporter, ReportError, ReportSource,
    RunContext, Runner, StepExecutor,
};
pub use step::{MetricQuery, Predicate, ScriptRuntime, Step, StepId, StepKind, Value};
