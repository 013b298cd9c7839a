use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::AuditSink;
use crate::capabilities::DesiredCapabilities;
use crate::driver::{Endpoint, ProvisioningDriver};
use crate::store::SessionStore;
use crate::Error;

/// Session status. Transitions are monotonic:
/// `Waiting -> Running -> {Succeed, Failed}` and never reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Waiting,
    Running,
    Succeed,
    Failed,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Waiting => "waiting",
            Status::Running => "running",
            Status::Succeed => "succeed",
            Status::Failed => "failed",
        };
        f.write_str(s)
    }
}

struct SessionState {
    status: Status,
    modified_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
    endpoint: Option<Endpoint>,
    error: Option<String>,
    reason: Option<String>,
}

/// One browser-automation run, bound to at most one endpoint at a time.
///
/// The entity only carries invariant-preserving mutators; proxying and
/// acquisition live in their own modules. Mutable state sits behind a single
/// mutex so every terminal read-modify-write is guarded, while `closed` and
/// `timeouted` are mirrored into atomics for the lock-free polls the proxy
/// performs mid-flight. Collaborators are injected at construction; the
/// driver releases the bound endpoint exactly once on close.
pub struct Session {
    id: Uuid,
    name: String,
    platform: String,
    take_screenshot: bool,
    run_script: Option<String>,
    dc: Value,
    created_at: DateTime<Utc>,
    closed: AtomicBool,
    timeouted: AtomicBool,
    state: Mutex<SessionState>,
    driver: Arc<dyn ProvisioningDriver>,
    store: Arc<dyn SessionStore>,
    audit: Arc<dyn AuditSink>,
}

// Derive is off the table with trait-object collaborators in the struct.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("platform", &self.platform)
            .field("status", &self.status())
            .field("closed", &self.is_closed())
            .field("timeouted", &self.is_timeouted())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(
        caps: DesiredCapabilities,
        driver: Arc<dyn ProvisioningDriver>,
        store: Arc<dyn SessionStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Arc<Self> {
        let id = Uuid::new_v4();
        let name = caps
            .name
            .unwrap_or_else(|| format!("Unnamed session {id}"));
        let now = Utc::now();
        Arc::new(Self {
            id,
            name,
            platform: caps.platform.unwrap_or_default(),
            take_screenshot: caps.take_screenshot,
            run_script: caps.run_script,
            dc: caps.raw,
            created_at: now,
            closed: AtomicBool::new(false),
            timeouted: AtomicBool::new(false),
            state: Mutex::new(SessionState {
                status: Status::Waiting,
                modified_at: now,
                deleted_at: None,
                endpoint: None,
                error: None,
                reason: None,
            }),
            driver,
            store,
            audit,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn take_screenshot(&self) -> bool {
        self.take_screenshot
    }

    pub fn run_script(&self) -> Option<&str> {
        self.run_script.as_deref()
    }

    pub fn desired_capabilities(&self) -> &Value {
        &self.dc
    }

    pub fn status(&self) -> Status {
        self.state.lock().status
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_timeouted(&self) -> bool {
        self.timeouted.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<String> {
        self.state.lock().reason.clone()
    }

    pub fn error(&self) -> Option<String> {
        self.state.lock().error.clone()
    }

    pub fn endpoint(&self) -> Option<Endpoint> {
        self.state.lock().endpoint.clone()
    }

    pub fn endpoint_ip(&self) -> Option<String> {
        self.state.lock().endpoint.as_ref().and_then(|e| e.ip.clone())
    }

    pub(crate) fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }

    pub fn modified_at(&self) -> DateTime<Utc> {
        self.state.lock().modified_at
    }

    /// Resets the inactivity clock. Called at binding and at the start of
    /// every proxied command; the reaper relies exclusively on this field.
    pub fn restart_timer(&self) {
        self.state.lock().modified_at = Utc::now();
    }

    pub fn inactivity(&self) -> Duration {
        (Utc::now() - self.modified_at()).to_std().unwrap_or_default()
    }

    pub fn duration(&self) -> Duration {
        (Utc::now() - self.created_at).to_std().unwrap_or_default()
    }

    /// Binds `endpoint` and moves the session to `Running`.
    pub async fn run(&self, endpoint: Endpoint) -> Result<(), Error> {
        let (name, ip) = (endpoint.name.clone(), endpoint.ip.clone().unwrap_or_default());
        {
            let mut st = self.state.lock();
            if self.closed.load(Ordering::SeqCst) || st.status != Status::Waiting {
                return Err(Error::InvalidTransition(format!(
                    "session {} cannot start running from status {}",
                    self.id, st.status
                )));
            }
            if st.endpoint.is_some() {
                return Err(Error::InvalidTransition(format!(
                    "session {} already has an endpoint bound",
                    self.id
                )));
            }
            st.modified_at = Utc::now();
            st.status = Status::Running;
            st.endpoint = Some(endpoint);
        }
        if let Err(err) = self.store.save(self).await {
            warn!(session = %self.id, error = %err, "failed to persist running session");
        }
        info!(session = %self.id, endpoint = %name, %ip, "session starting");
        Ok(())
    }

    pub async fn succeed(&self) {
        if !self.close(Status::Succeed, None, None).await {
            warn!(session = %self.id, "succeed() on an already closed session");
        }
    }

    /// Terminal failure path. Calling it on an already closed session logs a
    /// warning and no-ops: the state mutation is genuinely skipped and the
    /// endpoint is not released twice.
    pub async fn failed(&self, error: Option<String>, reason: Option<String>) {
        if !self.close(Status::Failed, error.clone(), reason.clone()).await {
            warn!(
                session = %self.id,
                prior_reason = %self.reason().unwrap_or_default(),
                error = %error.unwrap_or_default(),
                reason = %reason.unwrap_or_default(),
                "failed() on an already closed session"
            );
        }
    }

    /// Forces the timeout path: marks the session timeouted and fails it
    /// with an inactivity reason. Safe to call concurrently with an
    /// in-flight proxy command and with a racing `failed()`.
    pub async fn timeout(&self) {
        self.timeouted.store(true, Ordering::SeqCst);
        let reason = format!(
            "Session timeout. No activity since {}",
            self.modified_at()
        );
        self.failed(None, Some(reason)).await;
    }

    /// Shared terminal path. The whole read-modify-write happens under the
    /// session mutex and is gated on the `closed` flag, so concurrent
    /// `failed()`/`timeout()` calls produce exactly one close side effect.
    /// Returns false when the session was already closed.
    async fn close(
        &self,
        status: Status,
        error: Option<String>,
        reason: Option<String>,
    ) -> bool {
        let (released, reason_line) = {
            let mut st = self.state.lock();
            if self.closed.swap(true, Ordering::SeqCst) {
                return false;
            }
            st.status = status;
            if error.is_some() {
                st.error = error;
            }
            if reason.is_some() {
                st.reason = reason;
            }
            st.deleted_at = Some(Utc::now());
            (st.endpoint.take(), st.reason.clone())
        };
        if let Some(endpoint) = released {
            info!(session = %self.id, endpoint = %endpoint.name, "releasing endpoint");
            if let Err(err) = self.driver.delete(&endpoint.id).await {
                warn!(session = %self.id, error = %err, "endpoint release failed");
            }
        }
        if let Err(err) = self.store.save(self).await {
            warn!(session = %self.id, error = %err, "failed to persist closed session");
        }
        info!(
            session = %self.id,
            %status,
            reason = %reason_line.unwrap_or_default(),
            "session closed"
        );
        true
    }

    pub fn info(&self) -> SessionInfo {
        let st = self.state.lock();
        SessionInfo {
            id: self.id,
            name: self.name.clone(),
            status: st.status,
            platform: self.platform.clone(),
            take_screenshot: self.take_screenshot,
            duration: (Utc::now() - self.created_at)
                .to_std()
                .unwrap_or_default()
                .as_secs_f64(),
            inactivity: (Utc::now() - st.modified_at)
                .to_std()
                .unwrap_or_default()
                .as_secs_f64(),
            endpoint: st.endpoint.as_ref().map(|e| EndpointInfo {
                id: e.id.clone(),
                ip: e.ip.clone(),
                name: e.name.clone(),
            }),
        }
    }

    pub fn record(&self) -> SessionRecord {
        let st = self.state.lock();
        SessionRecord {
            id: self.id,
            name: self.name.clone(),
            platform: self.platform.clone(),
            take_screenshot: self.take_screenshot,
            run_script: self.run_script.clone(),
            status: st.status,
            created_at: self.created_at,
            modified_at: st.modified_at,
            deleted_at: st.deleted_at,
            closed: self.closed.load(Ordering::SeqCst),
            timeouted: self.timeouted.load(Ordering::SeqCst),
            error: st.error.clone(),
            reason: st.reason.clone(),
            endpoint_name: st.endpoint.as_ref().map(|e| e.name.clone()),
        }
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, by: Duration) {
        let mut st = self.state.lock();
        st.modified_at = Utc::now() - chrono::Duration::from_std(by).unwrap();
    }
}

/// Serializable live snapshot, exposed over the API.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub name: String,
    pub status: Status,
    pub platform: String,
    pub take_screenshot: bool,
    pub duration: f64,
    pub inactivity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<EndpointInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EndpointInfo {
    pub id: String,
    pub ip: Option<String>,
    pub name: String,
}

/// Durable snapshot handed to session stores and archives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: Uuid,
    pub name: String,
    pub platform: String,
    pub take_screenshot: bool,
    pub run_script: Option<String>,
    pub status: Status,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub closed: bool,
    pub timeouted: bool,
    pub error: Option<String>,
    pub reason: Option<String>,
    pub endpoint_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{make_session, ready_endpoint, ScriptedDriver};

    #[tokio::test]
    async fn lifecycle_is_monotonic() {
        let driver = ScriptedDriver::unused();
        let session = make_session(driver.clone());
        assert_eq!(session.status(), Status::Waiting);

        session.run(ready_endpoint("ep-0")).await.unwrap();
        assert_eq!(session.status(), Status::Running);

        session.succeed().await;
        assert_eq!(session.status(), Status::Succeed);
        assert!(session.is_closed());

        // A terminal session refuses to run again.
        let err = session.run(ready_endpoint("ep-1")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidTransition(_)));
        assert_eq!(session.status(), Status::Succeed);
    }

    #[tokio::test]
    async fn rebinding_an_endpoint_is_refused() {
        let driver = ScriptedDriver::unused();
        let session = make_session(driver.clone());
        session.run(ready_endpoint("ep-0")).await.unwrap();
        let err = session.run(ready_endpoint("ep-1")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn double_failed_releases_endpoint_once() {
        let driver = ScriptedDriver::unused();
        let session = make_session(driver.clone());
        session.run(ready_endpoint("ep-0")).await.unwrap();

        session.failed(Some("boom".into()), Some("first".into())).await;
        session.failed(Some("boom again".into()), Some("second".into())).await;

        assert_eq!(session.status(), Status::Failed);
        assert_eq!(session.error().as_deref(), Some("boom"));
        assert_eq!(session.reason().as_deref(), Some("first"));
        assert_eq!(driver.deleted(), vec!["ep-0".to_string()]);
    }

    #[tokio::test]
    async fn timeout_sets_flag_status_and_reason() {
        let driver = ScriptedDriver::unused();
        let session = make_session(driver.clone());
        session.run(ready_endpoint("ep-0")).await.unwrap();
        let modified = session.modified_at();

        session.timeout().await;

        assert!(session.is_timeouted());
        assert_eq!(session.status(), Status::Failed);
        let reason = session.reason().unwrap();
        assert!(reason.starts_with("Session timeout. No activity since"));
        assert!(reason.contains(&modified.to_string()));
        assert_eq!(driver.deleted().len(), 1);
    }

    #[tokio::test]
    async fn timeout_after_close_is_a_no_op() {
        let driver = ScriptedDriver::unused();
        let session = make_session(driver.clone());
        session.run(ready_endpoint("ep-0")).await.unwrap();
        session.succeed().await;

        session.timeout().await;

        assert_eq!(session.status(), Status::Succeed);
        assert_eq!(driver.deleted().len(), 1);
    }

    #[tokio::test]
    async fn unnamed_sessions_get_a_default_name() {
        let driver = ScriptedDriver::unused();
        let session = make_session(driver);
        assert_eq!(
            session.name(),
            format!("Unnamed session {}", session.id())
        );
    }

    #[tokio::test]
    async fn debug_output_carries_identity_and_state() {
        let driver = ScriptedDriver::unused();
        let session = make_session(driver);
        session.run(ready_endpoint("ep-0")).await.unwrap();

        let rendered = format!("{session:?}");
        assert!(rendered.contains(&session.id().to_string()));
        assert!(rendered.contains("Running"));
    }

    #[tokio::test]
    async fn run_refreshes_the_inactivity_clock() {
        let driver = ScriptedDriver::unused();
        let session = make_session(driver);
        session.backdate(Duration::from_secs(300));
        assert!(session.inactivity() >= Duration::from_secs(299));

        session.run(ready_endpoint("ep-0")).await.unwrap();
        assert!(session.inactivity() < Duration::from_secs(1));
    }
}
