pub mod api_client;
mod binary;
mod node;

pub use api_client::{MetricsClient, MetricsClientError};
pub use binary::{BinaryNotFound, resolve_command};
pub use node::{NodeHandle, SpawnNodeError, spawn_node};
