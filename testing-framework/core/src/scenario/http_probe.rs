use std::time::Duration;

use futures::future::try_join_all;
use reqwest::Client as ReqwestClient;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{debug, info};

use super::runtime::NodeEndpoint;
use crate::topology::NodeRole;

/// Error raised when HTTP readiness checks time out.
#[derive(Clone, Debug, Error)]
#[error("timeout waiting for {role} '{node}' metrics endpoint {url} after {timeout:?}", role = role.label())]
pub struct HttpReadinessError {
    node: String,
    role: NodeRole,
    url: String,
    timeout: Duration,
}

/// Wait until every endpoint's metrics URL answers with a success status.
pub async fn wait_for_metrics_endpoints(
    endpoints: &[NodeEndpoint],
    timeout_duration: Duration,
    poll_interval: Duration,
) -> Result<(), HttpReadinessError> {
    if endpoints.is_empty() {
        return Ok(());
    }

    info!(
        nodes = endpoints.len(),
        timeout_secs = timeout_duration.as_secs_f32(),
        poll_ms = poll_interval.as_millis(),
        "waiting for HTTP readiness"
    );

    let client = ReqwestClient::new();
    let probes = endpoints.iter().map(|endpoint| {
        wait_for_single_endpoint(client.clone(), endpoint, timeout_duration, poll_interval)
    });

    try_join_all(probes).await.map(|_| ())
}

async fn wait_for_single_endpoint(
    client: ReqwestClient,
    endpoint: &NodeEndpoint,
    timeout_duration: Duration,
    poll_interval: Duration,
) -> Result<(), HttpReadinessError> {
    let url = endpoint.metrics_url.as_str();
    debug!(node = %endpoint.name, role = endpoint.role.label(), %url, "probing HTTP endpoint");
    let probe = async {
        loop {
            let is_ready = client
                .get(url)
                .send()
                .await
                .map(|response| response.status().is_success())
                .unwrap_or(false);

            if is_ready {
                return;
            }

            sleep(poll_interval).await;
        }
    };

    timeout(timeout_duration, probe)
        .await
        .map_err(|_| HttpReadinessError {
            node: endpoint.name.clone(),
            role: endpoint.role,
            url: url.to_owned(),
            timeout: timeout_duration,
        })
}
