use std::sync::Arc;

use tracing::info;

use super::{
    context::{CleanupGuard, RunContext},
    executor::StepExecutor,
};
use crate::scenario::{RunReport, Scenario};

/// Represents a fully prepared environment capable of executing a scenario.
pub struct Runner {
    context: Arc<RunContext>,
    cleanup_guard: Option<Box<dyn CleanupGuard>>,
}

impl Runner {
    /// Construct a runner from the run context and optional cleanup guard.
    #[must_use]
    pub fn new(context: RunContext, cleanup_guard: Option<Box<dyn CleanupGuard>>) -> Self {
        Self {
            context: Arc::new(context),
            cleanup_guard,
        }
    }

    /// Access the underlying run context.
    #[must_use]
    pub fn context(&self) -> Arc<RunContext> {
        Arc::clone(&self.context)
    }

    fn cleanup(&mut self) {
        if let Some(guard) = self.cleanup_guard.take() {
            guard.cleanup();
        }
    }

    /// Executes every step of the scenario, then tears the deployment down.
    /// Step failures are part of the report, not an error.
    pub async fn run(mut self, scenario: &Scenario) -> RunReport {
        let executor = StepExecutor::new(self.context(), scenario.settings());
        let report = executor.execute(scenario.plan()).await;

        info!(passed = report.passed(), "run complete, tearing down");
        self.cleanup();
        report
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        self.cleanup();
    }
}
