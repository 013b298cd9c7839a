use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::acquisition::{self, AcquisitionConfig, AcquisitionEvent};
use crate::audit::AuditSink;
use crate::capabilities::DesiredCapabilities;
use crate::driver::ProvisioningDriver;
use crate::proxy::{self, ProxyResponse, RequestSpec};
use crate::session::{Session, SessionInfo, Status};
use crate::store::SessionStore;
use crate::watcher;
use crate::Error;

#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub acquisition: AcquisitionConfig,
    pub endpoint_port: u16,
}

/// Facade over the session engine: opens sessions (driving acquisition
/// through the watcher), resolves them for callers and forwards proxied
/// commands. All collaborators are injected.
pub struct SessionService {
    driver: Arc<dyn ProvisioningDriver>,
    store: Arc<dyn SessionStore>,
    audit: Arc<dyn AuditSink>,
    http: reqwest::Client,
    config: ServiceConfig,
}

impl SessionService {
    pub fn new(
        driver: Arc<dyn ProvisioningDriver>,
        store: Arc<dyn SessionStore>,
        audit: Arc<dyn AuditSink>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            driver,
            store,
            audit,
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Creates a session and acquires an endpoint for it, surfacing
    /// acquisition progress through the watcher so the flow aborts as soon
    /// as the client disconnects or the session turns terminal.
    ///
    /// The acquisition task itself is decoupled from the caller: a late
    /// provisioning success against an already-dead session releases the
    /// fresh endpoint instead of leaking it.
    pub async fn open_session(
        &self,
        dc: Value,
        client_gone: CancellationToken,
    ) -> Result<Arc<Session>, Error> {
        let caps = DesiredCapabilities::from_value(&dc);
        let platform = caps.platform.clone().ok_or_else(|| {
            Error::Creation("desired capabilities did not name a platform".into())
        })?;

        let session = Session::new(
            caps,
            Arc::clone(&self.driver),
            Arc::clone(&self.store),
            Arc::clone(&self.audit),
        );
        self.store.register(Arc::clone(&session));
        info!(
            session = %session.id(),
            name = %session.name(),
            %platform,
            "new session"
        );

        let (events_tx, events_rx) = mpsc::channel(16);
        let driver = Arc::clone(&self.driver);
        let acquisition_config = self.config.acquisition.clone();
        let task_session = Arc::clone(&session);
        tokio::spawn(async move {
            let result = acquisition::acquire(
                &driver,
                task_session.id(),
                task_session.platform(),
                task_session.desired_capabilities(),
                &events_tx,
                &acquisition_config,
            )
            .await;
            match result {
                Ok(endpoint) => {
                    if let Err(err) = task_session.run(endpoint.clone()).await {
                        warn!(
                            session = %task_session.id(),
                            error = %err,
                            "session turned terminal before its endpoint was ready; releasing it"
                        );
                        if let Err(del_err) = driver.delete(&endpoint.id).await {
                            warn!(
                                session = %task_session.id(),
                                endpoint = %endpoint.name,
                                error = %del_err,
                                "failed to release late endpoint"
                            );
                        }
                    }
                }
                Err(err) => {
                    task_session
                        .failed(
                            Some(err.to_string()),
                            Some("endpoint acquisition failed".into()),
                        )
                        .await;
                }
            }
        });

        let watched = watcher::watch(
            ReceiverStream::new(events_rx),
            Arc::clone(&session),
            client_gone,
        );
        tokio::pin!(watched);
        while let Some(item) = watched.next().await {
            match item {
                Ok(AcquisitionEvent::Candidate(endpoint)) => {
                    debug!(
                        session = %session.id(),
                        candidate = %endpoint.name,
                        "endpoint candidate"
                    );
                }
                Ok(AcquisitionEvent::Ready(endpoint)) => {
                    debug!(
                        session = %session.id(),
                        endpoint = %endpoint.name,
                        "endpoint ready"
                    );
                }
                Err(err) => {
                    session
                        .failed(
                            Some(err.to_string()),
                            Some("session aborted during endpoint acquisition".into()),
                        )
                        .await;
                    return Err(err);
                }
            }
        }

        if session.status() == Status::Running {
            Ok(session)
        } else {
            Err(Error::Creation(
                session
                    .error()
                    .unwrap_or_else(|| "endpoint acquisition failed".into()),
            ))
        }
    }

    /// Resolves an active session; missing and closed sessions are
    /// indistinguishable to callers.
    pub async fn get_session(&self, id: Uuid) -> Result<Arc<Session>, Error> {
        match self.store.load(id).await {
            Some(session) if !session.is_closed() => Ok(session),
            _ => Err(Error::SessionClosed(format!(
                "there is no active session {id}"
            ))),
        }
    }

    pub async fn proxy(&self, id: Uuid, request: RequestSpec) -> Result<ProxyResponse, Error> {
        let session = self.get_session(id).await?;
        proxy::forward(&session, &self.http, self.config.endpoint_port, request).await
    }

    pub async fn close_session(&self, id: Uuid) -> Result<(), Error> {
        let session = self.get_session(id).await?;
        session.succeed().await;
        Ok(())
    }

    pub async fn list_active(&self) -> Vec<SessionInfo> {
        self.store
            .list_active()
            .await
            .iter()
            .map(|session| session.info())
            .collect()
    }
}
