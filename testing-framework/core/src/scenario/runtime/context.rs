use std::sync::Arc;

use super::{
    node_registry::NodeRegistry,
    reporting::{PrometheusReporter, ReportSource},
};
use crate::scenario::{Invoker, Invokers};

/// Releases deployment resources. Consumed on use, so it runs at most once.
pub trait CleanupGuard: Send {
    fn cleanup(self: Box<Self>);
}

/// Shared, read-only state handed to every step task.
#[derive(Clone)]
pub struct RunContext {
    registry: NodeRegistry,
    reporter: Arc<dyn ReportSource>,
    invokers: Invokers,
}

impl RunContext {
    /// Context backed by the nodes' Prometheus endpoints and the default
    /// script invokers.
    #[must_use]
    pub fn new(registry: NodeRegistry) -> Self {
        let reporter = Arc::new(PrometheusReporter::new(&registry));
        Self {
            registry,
            reporter,
            invokers: Invokers::default(),
        }
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ReportSource>) -> Self {
        self.reporter = reporter;
        self
    }

    #[must_use]
    pub fn with_invoker(mut self, invoker: Arc<dyn Invoker>) -> Self {
        self.invokers = self.invokers.with(invoker);
        self
    }

    #[must_use]
    pub const fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    #[must_use]
    pub fn reporter(&self) -> &dyn ReportSource {
        self.reporter.as_ref()
    }

    #[must_use]
    pub const fn invokers(&self) -> &Invokers {
        &self.invokers
    }
}
