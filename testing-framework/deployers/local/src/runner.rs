use std::sync::Arc;

use async_trait::async_trait;
use testing_framework_config::timeouts;
use testing_framework_core::scenario::{
    Deployer, Invoker, NodeRegistry, ReportSource, RunContext, Runner, Scenario,
    http_probe::{HttpReadinessError, wait_for_metrics_endpoints},
};
use thiserror::Error;
use tracing::{debug, info};

use crate::supervisor::{LaunchError, LocalCleanup, Supervisor};

/// Spawns validators and collators as local processes.
#[derive(Clone, Default)]
pub struct LocalDeployer {
    invokers: Vec<Arc<dyn Invoker>>,
    reporter: Option<Arc<dyn ReportSource>>,
}

/// Errors surfaced by the local deployer before any step runs.
#[derive(Debug, Error)]
pub enum LocalDeployerError {
    #[error("failed to launch local topology: {source}")]
    Launch {
        #[source]
        source: LaunchError,
    },
    #[error("readiness probe failed: {source}")]
    ReadinessFailed {
        #[source]
        source: HttpReadinessError,
    },
}

#[async_trait]
impl Deployer for LocalDeployer {
    type Error = LocalDeployerError;

    async fn deploy(&self, scenario: &Scenario) -> Result<Runner, Self::Error> {
        let topology = scenario.topology();
        let settings = scenario.settings();
        info!(
            validators = topology.validators().count(),
            collators = topology.collators().count(),
            "starting local deployment"
        );

        let supervisor = Supervisor::start(topology, settings.startup_grace)
            .await
            .map_err(|source| LocalDeployerError::Launch { source })?;
        let registry = NodeRegistry::from_topology(topology);

        if settings.readiness {
            // On failure the supervisor is dropped here, stopping every node.
            wait_for_readiness(&registry, settings.readiness_timeout)
                .await
                .map_err(|source| {
                    debug!(error = ?source, "local readiness failed");
                    LocalDeployerError::ReadinessFailed { source }
                })?;
            info!("local nodes are ready");
        } else {
            debug!("readiness probing disabled");
        }

        Ok(Runner::new(
            self.context(registry),
            Some(Box::new(LocalCleanup::new(supervisor))),
        ))
    }
}

impl LocalDeployer {
    #[must_use]
    /// Construct a local deployer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a script invoker, replacing the default for its runtime.
    #[must_use]
    pub fn with_invoker(mut self, invoker: Arc<dyn Invoker>) -> Self {
        self.invokers.push(invoker);
        self
    }

    /// Use a custom node reporting source instead of Prometheus scraping.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ReportSource>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    fn context(&self, registry: NodeRegistry) -> RunContext {
        let mut context = RunContext::new(registry);
        if let Some(reporter) = &self.reporter {
            context = context.with_reporter(Arc::clone(reporter));
        }
        for invoker in &self.invokers {
            context = context.with_invoker(Arc::clone(invoker));
        }
        context
    }
}

async fn wait_for_readiness(
    registry: &NodeRegistry,
    timeout: std::time::Duration,
) -> Result<(), HttpReadinessError> {
    info!("waiting for local node metrics endpoints");
    let endpoints = registry.endpoints().cloned().collect::<Vec<_>>();
    wait_for_metrics_endpoints(&endpoints, timeout, timeouts::readiness_poll_interval()).await
}
