use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use drydock_core::driver::{Endpoint, ProvisioningDriver};
use drydock_core::Error;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Provisioning driver backed by fixed per-platform host pools.
///
/// `create` leases a free host, surfaces it as a not-yet-ready candidate and
/// then probes the automation port over TCP. A lease whose probe fails stays
/// on the books until `delete` reclaims it, so a half-provisioned host is
/// never handed to two sessions at once.
pub struct FixedPoolDriver {
    pools: BTreeMap<String, Vec<String>>,
    leases: Mutex<HashMap<String, String>>,
    probe_port: u16,
    probe_timeout: Duration,
}

impl FixedPoolDriver {
    pub fn new(
        pools: BTreeMap<String, Vec<String>>,
        probe_port: u16,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            pools,
            leases: Mutex::new(HashMap::new()),
            probe_port,
            probe_timeout,
        }
    }

    pub fn platforms(&self) -> BTreeMap<String, usize> {
        self.pools
            .iter()
            .map(|(platform, hosts)| (platform.clone(), hosts.len()))
            .collect()
    }

    fn lease(&self, platform: &str) -> Result<(String, String), Error> {
        let hosts = self.pools.get(platform).ok_or_else(|| {
            Error::Creation(format!("unknown platform {platform}"))
        })?;
        let mut leases = self.leases.lock();
        let host = hosts
            .iter()
            .find(|host| !leases.values().any(|leased| leased == *host))
            .ok_or_else(|| {
                Error::Creation(format!("no free hosts left for platform {platform}"))
            })?
            .clone();
        let id = format!("{platform}-{:08x}", rand::random::<u32>());
        leases.insert(id.clone(), host.clone());
        Ok((id, host))
    }
}

#[async_trait]
impl ProvisioningDriver for FixedPoolDriver {
    async fn create(
        &self,
        platform: &str,
        _dc: &Value,
        progress: mpsc::Sender<Endpoint>,
    ) -> Result<Endpoint, Error> {
        let (id, host) = self.lease(platform)?;
        info!(endpoint = %id, %host, "leased pool host");

        let candidate = Endpoint {
            id: id.clone(),
            ip: Some(host.clone()),
            name: format!("{platform}-{host}"),
            ready: false,
        };
        let _ = progress.send(candidate.clone()).await;

        let addr = format!("{host}:{}", self.probe_port);
        match tokio::time::timeout(self.probe_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(_)) => Ok(Endpoint {
                ready: true,
                ..candidate
            }),
            Ok(Err(err)) => Err(Error::Creation(format!(
                "host {addr} refused the readiness probe: {err}"
            ))),
            Err(_) => Err(Error::Creation(format!(
                "host {addr} did not answer the readiness probe within {:?}",
                self.probe_timeout
            ))),
        }
    }

    async fn delete(&self, endpoint_id: &str) -> Result<(), Error> {
        match self.leases.lock().remove(endpoint_id) {
            Some(host) => {
                debug!(endpoint = %endpoint_id, %host, "released pool host");
                Ok(())
            }
            None => {
                warn!(endpoint = %endpoint_id, "delete for an unknown lease");
                Ok(())
            }
        }
    }
}
