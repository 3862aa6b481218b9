use std::{
    collections::BTreeMap,
    io,
    path::{Path, PathBuf},
};

use serde::Serialize;
use testing_framework_config::{
    constants::{LOCAL_HOST, METRICS_PATH},
    topology::invariants::{
        TopologyInvariantError, validate_group_shape, validate_unique_indices,
        validate_unique_names,
    },
};
use thiserror::Error;
use tracing::debug;

use crate::topology::{
    config::NodesSection,
    utils::{TemplateVars, allocate_local_ports, render_template},
};

#[derive(Debug, Error)]
pub enum TopologyBuildError {
    #[error(transparent)]
    Invariants(#[from] TopologyInvariantError),
    #[error("failed to allocate local ports: {source}")]
    PortAllocation {
        #[source]
        source: io::Error,
    },
}

/// Node role within the test network.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Validator,
    Collator,
}

impl NodeRole {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Validator => "validator",
            Self::Collator => "collator",
        }
    }
}

/// Everything needed to launch and address one node.
#[derive(Clone, Debug, Serialize)]
pub struct NodeDescriptor {
    pub name: String,
    pub role: NodeRole,
    /// Zero-based index within its role.
    pub index: usize,
    pub para_id: Option<u32>,
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub rpc_port: u16,
    pub prometheus_port: u16,
}

impl NodeDescriptor {
    #[must_use]
    pub fn metrics_url(&self) -> String {
        format!("http://{LOCAL_HOST}:{}{METRICS_PATH}", self.prometheus_port)
    }

    #[must_use]
    pub fn rpc_url(&self) -> String {
        format!("http://{LOCAL_HOST}:{}", self.rpc_port)
    }

    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{LOCAL_HOST}:{}", self.rpc_port)
    }

    fn template_vars<'a>(&'a self, base_path: &'a Path) -> TemplateVars<'a> {
        TemplateVars {
            name: &self.name,
            index: self.index,
            para_id: self.para_id,
            rpc_port: self.rpc_port,
            prometheus_port: self.prometheus_port,
            base_path,
        }
    }

    /// Command-line args with placeholders filled for a concrete data dir.
    #[must_use]
    pub fn rendered_args(&self, base_path: &Path) -> Vec<String> {
        let vars = self.template_vars(base_path);
        self.args
            .iter()
            .map(|arg| render_template(arg, &vars))
            .collect()
    }

    #[must_use]
    pub fn rendered_env(&self, base_path: &Path) -> BTreeMap<String, String> {
        let vars = self.template_vars(base_path);
        self.env
            .iter()
            .map(|(key, value)| (key.clone(), render_template(value, &vars)))
            .collect()
    }
}

/// Immutable node graph for one run.
#[derive(Clone, Debug, Serialize)]
pub struct Topology {
    nodes: Vec<NodeDescriptor>,
}

struct GroupPlan<'a> {
    role: NodeRole,
    para_id: Option<u32>,
    count: usize,
    command: &'a str,
    args: &'a [String],
    names: Option<&'a [String]>,
    env: &'a BTreeMap<String, String>,
}

impl Topology {
    /// Expand role groups into concrete nodes and allocate their ports.
    /// Relative command paths are resolved against `base_dir`.
    pub fn from_config(
        nodes: &NodesSection,
        base_dir: Option<&Path>,
    ) -> Result<Self, TopologyBuildError> {
        let mut groups = vec![GroupPlan {
            role: NodeRole::Validator,
            para_id: None,
            count: nodes.validators.count,
            command: &nodes.validators.command,
            args: &nodes.validators.args,
            names: nodes.validators.names.as_deref(),
            env: &nodes.validators.env,
        }];
        groups.extend(nodes.collators.iter().map(|group| GroupPlan {
            role: NodeRole::Collator,
            para_id: Some(group.para_id),
            count: group.count,
            command: &group.command,
            args: &group.args,
            names: group.names.as_deref(),
            env: &group.env,
        }));

        for group in &groups {
            let label = match group.para_id {
                Some(para_id) => format!("collator group {para_id}"),
                None => group.role.label().to_owned(),
            };
            validate_group_shape(&label, group.count, group.names)?;
        }

        let total = groups.iter().map(|g| g.count).sum::<usize>();
        let ports = allocate_local_ports(total * 2)
            .map_err(|source| TopologyBuildError::PortAllocation { source })?;
        let mut ports = ports.into_iter();

        let mut descriptors = Vec::with_capacity(total);
        let mut collator_index = 0usize;
        for group in &groups {
            for slot in 0..group.count {
                let index = match group.role {
                    NodeRole::Validator => slot,
                    NodeRole::Collator => {
                        collator_index += 1;
                        collator_index - 1
                    }
                };
                let name = group
                    .names
                    .map(|names| names[slot].clone())
                    .unwrap_or_else(|| default_node_name(group.role, group.para_id, slot));

                let (Some(rpc_port), Some(prometheus_port)) = (ports.next(), ports.next()) else {
                    return Err(TopologyBuildError::PortAllocation {
                        source: io::Error::other("port allocator returned too few ports"),
                    });
                };

                descriptors.push(NodeDescriptor {
                    name,
                    role: group.role,
                    index,
                    para_id: group.para_id,
                    command: resolve_command_path(group.command, base_dir),
                    args: group.args.to_vec(),
                    env: group.env.clone(),
                    rpc_port,
                    prometheus_port,
                });
            }
        }

        validate_unique_names(descriptors.iter().map(|node| node.name.as_str()))?;
        validate_unique_indices(
            descriptors
                .iter()
                .map(|node| (node.role.label(), node.index)),
        )?;

        debug!(nodes = descriptors.len(), "topology generated");
        Ok(Self { nodes: descriptors })
    }

    #[must_use]
    pub fn nodes(&self) -> &[NodeDescriptor] {
        &self.nodes
    }

    pub fn validators(&self) -> impl Iterator<Item = &NodeDescriptor> {
        self.nodes
            .iter()
            .filter(|node| node.role == NodeRole::Validator)
    }

    pub fn collators(&self) -> impl Iterator<Item = &NodeDescriptor> {
        self.nodes
            .iter()
            .filter(|node| node.role == NodeRole::Collator)
    }

    #[must_use]
    pub fn node(&self, name: &str) -> Option<&NodeDescriptor> {
        self.nodes.iter().find(|node| node.name == name)
    }

    #[must_use]
    pub fn para_ids(&self) -> Vec<u32> {
        let mut ids = self
            .collators()
            .filter_map(|node| node.para_id)
            .collect::<Vec<_>>();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

fn default_node_name(role: NodeRole, para_id: Option<u32>, slot: usize) -> String {
    match para_id {
        Some(para_id) => format!("collator-{para_id}-{slot}"),
        None => format!("{}-{slot}", role.label()),
    }
}

fn resolve_command_path(command: &str, base_dir: Option<&Path>) -> String {
    let path = Path::new(command);
    match base_dir {
        Some(base) if path.is_relative() && command.contains('/') => {
            PathBuf::from(base).join(path).display().to_string()
        }
        _ => command.to_owned(),
    }
}
