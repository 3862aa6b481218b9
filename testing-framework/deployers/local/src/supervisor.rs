use std::time::Duration;

use testing_framework_core::{
    nodes::{NodeHandle, SpawnNodeError, spawn_node},
    scenario::CleanupGuard,
    topology::Topology,
};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to start node '{node}': {source}")]
    Spawn {
        node: String,
        #[source]
        source: SpawnNodeError,
    },
    #[error("node '{node}' exited during startup ({status}); stderr tail:\n{stderr}")]
    ExitedEarly {
        node: String,
        status: String,
        stderr: String,
    },
}

/// Owns every node process of a deployment.
///
/// Dropping the supervisor stops whatever is still running, so a failed
/// launch tears down the nodes that did start.
pub struct Supervisor {
    handles: Vec<NodeHandle>,
}

impl Supervisor {
    /// Spawn one process per node in declaration order, then wait
    /// `startup_grace` and verify none of them exited.
    pub async fn start(topology: &Topology, startup_grace: Duration) -> Result<Self, LaunchError> {
        let mut supervisor = Self {
            handles: Vec::with_capacity(topology.nodes().len()),
        };

        for node in topology.nodes() {
            let handle = spawn_node(node).map_err(|source| {
                warn!(node = %node.name, error = %source, "node launch failed, tearing down");
                LaunchError::Spawn {
                    node: node.name.clone(),
                    source,
                }
            })?;
            supervisor.handles.push(handle);
        }

        if !startup_grace.is_zero() {
            sleep(startup_grace).await;
        }
        supervisor.check_alive()?;

        info!(nodes = supervisor.handles.len(), "all node processes started");
        Ok(supervisor)
    }

    /// Fails with the first node that is no longer running.
    pub fn check_alive(&mut self) -> Result<(), LaunchError> {
        for handle in &mut self.handles {
            if let Some(status) = handle.exit_status() {
                warn!(node = handle.name(), %status, "node exited during startup");
                return Err(LaunchError::ExitedEarly {
                    node: handle.name().to_owned(),
                    status: status.to_string(),
                    stderr: handle.stderr_tail(),
                });
            }
        }
        Ok(())
    }

    /// Name and pid of every supervised process.
    #[must_use]
    pub fn pids(&self) -> Vec<(String, u32)> {
        self.handles
            .iter()
            .map(|handle| (handle.name().to_owned(), handle.pid()))
            .collect()
    }

    #[must_use]
    pub fn handles(&self) -> &[NodeHandle] {
        &self.handles
    }

    /// Kill and reap every process still running. Returns how many were
    /// stopped by this call.
    pub fn stop(&mut self) -> usize {
        // Reverse launch order: collators go before the validators they follow.
        let stopped = self
            .handles
            .iter_mut()
            .rev()
            .map(NodeHandle::shutdown)
            .filter(|stopped| *stopped)
            .count();
        if stopped > 0 {
            info!(stopped, "node processes stopped");
        }
        stopped
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Teardown guard handed to the runner.
pub struct LocalCleanup {
    supervisor: Supervisor,
}

impl LocalCleanup {
    #[must_use]
    pub fn new(supervisor: Supervisor) -> Self {
        Self { supervisor }
    }
}

impl CleanupGuard for LocalCleanup {
    fn cleanup(mut self: Box<Self>) {
        self.supervisor.stop();
    }
}
