mod runner;
mod supervisor;

pub use runner::{LocalDeployer, LocalDeployerError};
pub use supervisor::{LaunchError, LocalCleanup, Supervisor};
