use std::{io, time::Duration};

use prometheus_parse::{Sample, Scrape, Value as PromValue};
use reqwest::Client;
use thiserror::Error;
use tracing::debug;

use crate::scenario::{MetricQuery, Value};
use testing_framework_config::constants::SUBSTRATE_METRIC_PREFIX;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum MetricsClientError {
    #[error(transparent)]
    Request(#[from] reqwest::Error),
    #[error("malformed metrics exposition: {0}")]
    Parse(#[from] io::Error),
}

/// Thin async client for a node's Prometheus endpoint.
#[derive(Clone, Debug)]
pub struct MetricsClient {
    url: String,
    client: Client,
}

impl MetricsClient {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self::with_client(url, client)
    }

    #[must_use]
    pub fn with_client(url: impl Into<String>, client: Client) -> Self {
        Self {
            url: url.into(),
            client,
        }
    }

    /// GET and parse the text exposition.
    pub async fn scrape(&self) -> Result<Scrape, MetricsClientError> {
        let body = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let scrape = Scrape::parse(body.lines().map(|line| Ok(line.to_owned())))?;
        debug!(url = %self.url, samples = scrape.samples.len(), "metrics scraped");
        Ok(scrape)
    }

    /// Current value of the first sample matching `query`, if any.
    pub async fn value(&self, query: &MetricQuery) -> Result<Option<Value>, MetricsClientError> {
        let scrape = self.scrape().await?;
        Ok(find_sample(&scrape, query).and_then(sample_value))
    }
}

/// Match by exact name, or by the name with the substrate prefix added.
#[must_use]
pub fn find_sample<'a>(scrape: &'a Scrape, query: &MetricQuery) -> Option<&'a Sample> {
    let prefixed = format!("{SUBSTRATE_METRIC_PREFIX}{}", query.name);
    scrape.samples.iter().find(|sample| {
        (sample.metric == query.name || sample.metric == prefixed)
            && query
                .labels
                .iter()
                .all(|(key, expected)| sample.labels.get(key).is_some_and(|v| v == expected))
    })
}

/// Integral gauge/counter readings become `Value::Int`; other readings are
/// kept as text.
fn sample_value(sample: &Sample) -> Option<Value> {
    let reading = match &sample.value {
        PromValue::Counter(v) | PromValue::Gauge(v) | PromValue::Untyped(v) => *v,
        PromValue::Histogram(_) | PromValue::Summary(_) => return None,
    };

    if reading.is_finite() && reading.fract() == 0.0 && reading.abs() < i64::MAX as f64 {
        Some(Value::Int(reading as i64))
    } else {
        Some(Value::Text(reading.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPOSITION: &str = r#"# HELP substrate_block_height Block height info of the chain
# TYPE substrate_block_height gauge
substrate_block_height{status="best",chain="rococo_local_testnet"} 12
substrate_block_height{status="finalized",chain="rococo_local_testnet"} 9
# HELP substrate_node_roles The roles the node is running as
# TYPE substrate_node_roles gauge
substrate_node_roles{chain="rococo_local_testnet"} 4
# TYPE load_ratio gauge
load_ratio 0.5
"#;

    fn scrape() -> Scrape {
        Scrape::parse(EXPOSITION.lines().map(|l| Ok(l.to_owned()))).unwrap()
    }

    #[test]
    fn matches_prefixed_names_and_labels() {
        let scrape = scrape();
        let best = MetricQuery::new("block_height").with_label("status", "best");
        let finalized = MetricQuery::new("block_height").with_label("status", "finalized");

        assert_eq!(
            find_sample(&scrape, &best).and_then(sample_value),
            Some(Value::Int(12))
        );
        assert_eq!(
            find_sample(&scrape, &finalized).and_then(sample_value),
            Some(Value::Int(9))
        );
        assert_eq!(
            find_sample(&scrape, &MetricQuery::new("node_roles")).and_then(sample_value),
            Some(Value::Int(4))
        );
    }

    #[test]
    fn fractional_readings_are_text() {
        let scrape = scrape();
        assert_eq!(
            find_sample(&scrape, &MetricQuery::new("load_ratio")).and_then(sample_value),
            Some(Value::Text("0.5".to_owned()))
        );
    }

    #[test]
    fn unmatched_labels_find_nothing() {
        let scrape = scrape();
        let query = MetricQuery::new("block_height").with_label("status", "imported");
        assert!(find_sample(&scrape, &query).is_none());
    }
}
