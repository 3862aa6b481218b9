use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use super::node_registry::NodeRegistry;
use crate::{
    nodes::api_client::{MetricsClient, MetricsClientError},
    scenario::{MetricQuery, Value},
};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("node '{node}' is not part of the topology")]
    UnknownNode { node: String },
    #[error("node '{node}' unreachable: {source}")]
    Unreachable {
        node: String,
        #[source]
        source: MetricsClientError,
    },
    #[error("node '{node}' does not report `{metric}`")]
    MetricMissing { node: String, metric: String },
}

impl ReportError {
    /// Transient conditions are retried until the step deadline.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::UnknownNode { .. })
    }
}

/// Node reporting interface polled by assertions.
#[async_trait]
pub trait ReportSource: Send + Sync {
    async fn report(&self, node: &str, metric: &MetricQuery) -> Result<Value, ReportError>;

    async fn is_up(&self, node: &str) -> Result<(), ReportError>;
}

/// Reads values from each node's Prometheus endpoint.
pub struct PrometheusReporter {
    clients: HashMap<String, MetricsClient>,
}

impl PrometheusReporter {
    #[must_use]
    pub fn new(registry: &NodeRegistry) -> Self {
        let clients = registry
            .endpoints()
            .map(|endpoint| {
                (
                    endpoint.name.clone(),
                    MetricsClient::new(endpoint.metrics_url.clone()),
                )
            })
            .collect();
        Self { clients }
    }

    fn client(&self, node: &str) -> Result<&MetricsClient, ReportError> {
        self.clients.get(node).ok_or_else(|| ReportError::UnknownNode {
            node: node.to_owned(),
        })
    }
}

#[async_trait]
impl ReportSource for PrometheusReporter {
    async fn report(&self, node: &str, metric: &MetricQuery) -> Result<Value, ReportError> {
        let value = self
            .client(node)?
            .value(metric)
            .await
            .map_err(|source| ReportError::Unreachable {
                node: node.to_owned(),
                source,
            })?;

        value.ok_or_else(|| ReportError::MetricMissing {
            node: node.to_owned(),
            metric: metric.to_string(),
        })
    }

    async fn is_up(&self, node: &str) -> Result<(), ReportError> {
        self.client(node)?
            .scrape()
            .await
            .map(|_| ())
            .map_err(|source| ReportError::Unreachable {
                node: node.to_owned(),
                source,
            })
    }
}
