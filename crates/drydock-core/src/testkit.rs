//! Shared fixtures for the crate's unit tests: a scriptable provisioning
//! driver and session builders wired to in-memory collaborators.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::audit::{AuditSink, InMemoryAudit};
use crate::capabilities::DesiredCapabilities;
use crate::driver::{Endpoint, ProvisioningDriver};
use crate::session::Session;
use crate::store::{InMemorySessionStore, SessionStore};
use crate::Error;

pub(crate) fn ready_endpoint(id: &str) -> Endpoint {
    Endpoint {
        id: id.to_string(),
        ip: Some("127.0.0.1".to_string()),
        name: format!("{id}-vm"),
        ready: true,
    }
}

pub(crate) fn half_baked_endpoint(id: &str) -> Endpoint {
    Endpoint {
        id: id.to_string(),
        ip: None,
        name: format!("{id}-vm"),
        ready: false,
    }
}

/// One scripted `create` outcome.
pub(crate) enum Attempt {
    /// Push the candidates, then fail with `Error::Creation`.
    Fail { candidates: Vec<Endpoint> },
    /// Push the candidates, then resolve with the endpoint.
    Succeed {
        candidates: Vec<Endpoint>,
        endpoint: Endpoint,
    },
}

/// Driver that replays a fixed plan of attempts and records deletions.
pub(crate) struct ScriptedDriver {
    plan: Mutex<VecDeque<Attempt>>,
    deletes: Mutex<Vec<String>>,
}

impl ScriptedDriver {
    pub(crate) fn new(plan: Vec<Attempt>) -> Arc<Self> {
        Arc::new(Self {
            plan: Mutex::new(plan.into()),
            deletes: Mutex::new(Vec::new()),
        })
    }

    /// For tests that never reach the driver's create path.
    pub(crate) fn unused() -> Arc<Self> {
        Self::new(Vec::new())
    }

    pub(crate) fn deleted(&self) -> Vec<String> {
        self.deletes.lock().clone()
    }
}

#[async_trait]
impl ProvisioningDriver for ScriptedDriver {
    async fn create(
        &self,
        _platform: &str,
        _dc: &Value,
        progress: mpsc::Sender<Endpoint>,
    ) -> Result<Endpoint, Error> {
        let attempt = self
            .plan
            .lock()
            .pop_front()
            .unwrap_or(Attempt::Fail { candidates: vec![] });
        match attempt {
            Attempt::Fail { candidates } => {
                for candidate in candidates {
                    let _ = progress.send(candidate).await;
                }
                Err(Error::Creation("scripted provisioning failure".into()))
            }
            Attempt::Succeed {
                candidates,
                endpoint,
            } => {
                for candidate in candidates {
                    let _ = progress.send(candidate).await;
                }
                Ok(endpoint)
            }
        }
    }

    async fn delete(&self, endpoint_id: &str) -> Result<(), Error> {
        self.deletes.lock().push(endpoint_id.to_string());
        Ok(())
    }
}

pub(crate) fn test_caps() -> DesiredCapabilities {
    DesiredCapabilities::from_value(&json!({ "platform": "ubuntu-14.04-x64" }))
}

pub(crate) fn make_session(driver: Arc<ScriptedDriver>) -> Arc<Session> {
    let store: Arc<dyn SessionStore> = InMemorySessionStore::new();
    make_session_in(store, driver)
}

pub(crate) fn make_session_in(
    store: Arc<dyn SessionStore>,
    driver: Arc<ScriptedDriver>,
) -> Arc<Session> {
    let audit: Arc<dyn AuditSink> = Arc::new(InMemoryAudit::default());
    let session = Session::new(test_caps(), driver, Arc::clone(&store), audit);
    store.register(Arc::clone(&session));
    session
}

pub(crate) fn make_session_with_audit(
    driver: Arc<ScriptedDriver>,
    audit: Arc<InMemoryAudit>,
) -> Arc<Session> {
    let store: Arc<dyn SessionStore> = InMemorySessionStore::new();
    let session = Session::new(test_caps(), driver, Arc::clone(&store), audit);
    store.register(Arc::clone(&session));
    session
}
