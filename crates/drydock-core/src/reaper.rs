use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::store::SessionStore;

/// Background loop forcing the timeout path on sessions whose inactivity
/// exceeds the configured threshold. One instance runs for the process
/// lifetime; stopping is cooperative.
pub struct Reaper {
    store: Arc<dyn SessionStore>,
    session_timeout: Duration,
    tick: Duration,
}

impl Reaper {
    pub fn new(store: Arc<dyn SessionStore>, session_timeout: Duration) -> Self {
        Self {
            store,
            session_timeout,
            tick: Duration::from_secs(1),
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn spawn(self) -> ReaperHandle {
        let stop = CancellationToken::new();
        let token = stop.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.tick);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => self.sweep().await,
                }
            }
            info!("session reaper stopped");
        });
        ReaperHandle { stop, handle }
    }

    async fn sweep(&self) {
        // Sessions may close between listing and action; timeout() on a
        // terminal session is a no-op.
        for session in self.store.list_active().await {
            if session.inactivity() > self.session_timeout {
                info!(
                    session = %session.id(),
                    inactivity_secs = session.inactivity().as_secs(),
                    "session exceeded the inactivity limit"
                );
                session.timeout().await;
            }
        }
    }
}

pub struct ReaperHandle {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl ReaperHandle {
    /// Cooperative stop: flags the loop and joins it.
    pub async fn stop(self) {
        self.stop.cancel();
        let _ = self.handle.await;
    }
}
