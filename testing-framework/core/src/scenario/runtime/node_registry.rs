use std::{collections::BTreeMap, sync::Arc};

use crate::{
    scenario::InvocationTarget,
    topology::{NodeDescriptor, NodeRole, Topology},
};

/// Addresses of one running node. Carries no ownership of the process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeEndpoint {
    pub name: String,
    pub role: NodeRole,
    pub para_id: Option<u32>,
    pub rpc_url: String,
    pub ws_url: String,
    pub metrics_url: String,
}

impl NodeEndpoint {
    #[must_use]
    pub fn from_descriptor(node: &NodeDescriptor) -> Self {
        Self {
            name: node.name.clone(),
            role: node.role,
            para_id: node.para_id,
            rpc_url: node.rpc_url(),
            ws_url: node.ws_url(),
            metrics_url: node.metrics_url(),
        }
    }

    #[must_use]
    pub fn invocation_target(&self) -> InvocationTarget {
        InvocationTarget {
            node: self.name.clone(),
            rpc_url: self.rpc_url.clone(),
            ws_url: self.ws_url.clone(),
            metrics_url: self.metrics_url.clone(),
        }
    }
}

/// Read-only name → endpoint lookup shared with every step task. Only the
/// deployer constructs it.
#[derive(Clone, Debug, Default)]
pub struct NodeRegistry {
    inner: Arc<BTreeMap<String, NodeEndpoint>>,
}

impl NodeRegistry {
    #[must_use]
    pub fn new(endpoints: impl IntoIterator<Item = NodeEndpoint>) -> Self {
        let inner = endpoints
            .into_iter()
            .map(|endpoint| (endpoint.name.clone(), endpoint))
            .collect();
        Self {
            inner: Arc::new(inner),
        }
    }

    #[must_use]
    pub fn from_topology(topology: &Topology) -> Self {
        Self::new(topology.nodes().iter().map(NodeEndpoint::from_descriptor))
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&NodeEndpoint> {
        self.inner.get(name)
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &NodeEndpoint> {
        self.inner.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
