use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Error;

/// A provisioned VM or container capable of running a browser under
/// automation. `ready` only turns true once the endpoint is reachable over
/// the network; anything non-ready that gets abandoned mid-acquisition must
/// be deleted, never left running unowned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: String,
    pub ip: Option<String>,
    pub name: String,
    pub ready: bool,
}

/// Capability over a provisioning backend (libvirt, OpenStack, Docker, a
/// fixed pool). `create` may push zero or more intermediate candidates
/// (e.g. a container whose IP is not assigned yet) to `progress` before
/// resolving with the final ready endpoint or an [`Error::Creation`].
#[async_trait]
pub trait ProvisioningDriver: Send + Sync {
    async fn create(
        &self,
        platform: &str,
        dc: &Value,
        progress: mpsc::Sender<Endpoint>,
    ) -> Result<Endpoint, Error>;

    async fn delete(&self, endpoint_id: &str) -> Result<(), Error>;

    async fn ready(&self, endpoint: &Endpoint) -> bool {
        endpoint.ready
    }
}
