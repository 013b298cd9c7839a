use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One control-line/body pair recorded for a proxied command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditStep {
    pub session_id: Uuid,
    pub control_line: String,
    pub body: String,
    pub recorded_at: DateTime<Utc>,
}

/// Capability over the audit trail a session leaves behind. Sinks must not
/// fail the request flow; implementations log their own errors.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append_step(&self, session_id: Uuid, control_line: &str, body: &str);
}

#[derive(Default)]
pub struct InMemoryAudit {
    steps: Mutex<Vec<AuditStep>>,
}

impl InMemoryAudit {
    pub fn steps_for(&self, session_id: Uuid) -> Vec<AuditStep> {
        self.steps
            .lock()
            .iter()
            .filter(|s| s.session_id == session_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AuditSink for InMemoryAudit {
    async fn append_step(&self, session_id: Uuid, control_line: &str, body: &str) {
        self.steps.lock().push(AuditStep {
            session_id,
            control_line: control_line.to_string(),
            body: body.to_string(),
            recorded_at: Utc::now(),
        });
    }
}
