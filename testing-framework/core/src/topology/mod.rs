pub mod config;
pub mod generation;
pub mod utils;

pub use config::{
    CollatorGroup, HarnessSettings, NodesSection, ParallelDecl, StepDecl, StepEntry,
    TopologyFile, TopologyFileError, ValidatorGroup,
};
pub use generation::{NodeDescriptor, NodeRole, Topology, TopologyBuildError};
