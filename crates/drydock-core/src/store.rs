use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::session::{Session, SessionRecord};
use crate::Error;

/// Capability over session storage. The live map is the registry of active
/// sessions the reaper scans; `save` persists a snapshot on every state
/// transition.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Adds a freshly created session to the active registry.
    fn register(&self, session: Arc<Session>);

    async fn save(&self, session: &Session) -> Result<(), Error>;

    async fn load(&self, id: Uuid) -> Option<Arc<Session>>;

    async fn list_active(&self) -> Vec<Arc<Session>>;
}

/// In-process store: a `DashMap` of live sessions plus an archive of
/// terminal records. Saving a closed session evicts it from the live map,
/// which also breaks the session<->store reference cycle created by
/// constructor injection.
#[derive(Default)]
pub struct InMemorySessionStore {
    live: DashMap<Uuid, Arc<Session>>,
    records: DashMap<Uuid, SessionRecord>,
}

impl InMemorySessionStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, id: Uuid) -> Option<SessionRecord> {
        self.records.get(&id).map(|r| r.clone())
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    fn register(&self, session: Arc<Session>) {
        self.live.insert(session.id(), session);
    }

    async fn save(&self, session: &Session) -> Result<(), Error> {
        self.records.insert(session.id(), session.record());
        if session.is_closed() {
            self.live.remove(&session.id());
        }
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Option<Arc<Session>> {
        self.live.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    async fn list_active(&self) -> Vec<Arc<Session>> {
        self.live
            .iter()
            .filter(|entry| !entry.value().is_closed())
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}
