use async_trait::async_trait;

use super::{Scenario, runtime::Runner};

/// Provisions the nodes of a scenario and hands back a [`Runner`] that owns
/// their teardown.
#[async_trait]
pub trait Deployer: Send + Sync {
    type Error;

    async fn deploy(&self, scenario: &Scenario) -> Result<Runner, Self::Error>;
}
