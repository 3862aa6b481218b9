use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use serde_with::{DurationMilliSeconds, DurationSeconds, serde_as};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TopologyFileError {
    #[error("failed to read topology file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid topology file at `{field}`: {source}")]
    Parse {
        field: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// On-disk description of a test network and the steps run against it.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TopologyFile {
    #[serde(default)]
    pub settings: HarnessSettings,
    pub nodes: NodesSection,
    #[serde(default)]
    pub steps: Vec<StepEntry>,
}

impl TopologyFile {
    pub fn load(path: &Path) -> Result<Self, TopologyFileError> {
        let content = fs::read_to_string(path).map_err(|source| TopologyFileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Parse YAML, reporting the offending field path on failure.
    pub fn from_yaml_str(content: &str) -> Result<Self, TopologyFileError> {
        let deserializer = serde_yaml::Deserializer::from_str(content);
        serde_path_to_error::deserialize(deserializer).map_err(|err| {
            let field = err.path().to_string();
            TopologyFileError::Parse {
                field,
                source: err.into_inner(),
            }
        })
    }
}

/// Run-wide knobs. Every field is optional; unset values fall back to the
/// env-overridable defaults in `testing_framework_config::timeouts`.
#[serde_as]
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessSettings {
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    #[serde(rename = "run_timeout_secs")]
    pub run_timeout: Option<Duration>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    #[serde(rename = "default_step_timeout_secs")]
    pub default_step_timeout: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(rename = "poll_interval_ms")]
    pub poll_interval: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(rename = "startup_grace_ms")]
    pub startup_grace: Option<Duration>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    #[serde(rename = "readiness_timeout_secs")]
    pub readiness_timeout: Option<Duration>,
    pub readiness: Option<bool>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodesSection {
    pub validators: ValidatorGroup,
    #[serde(default)]
    pub collators: Vec<CollatorGroup>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidatorGroup {
    pub count: usize,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub names: Option<Vec<String>>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollatorGroup {
    pub para_id: u32,
    #[serde(default = "default_collator_count")]
    pub count: usize,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub names: Option<Vec<String>>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

const fn default_collator_count() -> usize {
    1
}

/// A top-level step entry: either one step or a group of steps with no
/// ordering between them.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum StepEntry {
    Parallel(ParallelDecl),
    Single(StepDecl),
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParallelDecl {
    pub parallel: Vec<StepDecl>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepDecl {
    #[serde(default)]
    pub id: Option<String>,
    pub run: String,
    /// Explicit dependencies; replaces the implicit edge to the previous entry.
    #[serde(default)]
    pub after: Option<Vec<String>>,
}
