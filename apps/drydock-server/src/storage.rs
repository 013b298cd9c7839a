use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use drydock_core::audit::{AuditSink, AuditStep};
use redis::aio::ConnectionManager;
use redis::Client;
use tracing::warn;
use uuid::Uuid;

/// Audit sink that appends proxied-command steps to a per-session Redis list
/// with a TTL. Redis failures are logged and swallowed so a flaky store never
/// breaks a live session.
#[derive(Clone)]
pub struct RedisAudit {
    redis: ConnectionManager,
    ttl_seconds: u64,
}

impl RedisAudit {
    pub async fn new(redis_url: &str, ttl_seconds: u64) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let redis = ConnectionManager::new(client).await?;
        Ok(Self { redis, ttl_seconds })
    }

    fn steps_key(session_id: Uuid) -> String {
        format!("session:{session_id}:steps")
    }
}

#[async_trait]
impl AuditSink for RedisAudit {
    async fn append_step(&self, session_id: Uuid, control_line: &str, body: &str) {
        let step = AuditStep {
            session_id,
            control_line: control_line.to_string(),
            body: body.to_string(),
            recorded_at: Utc::now(),
        };
        let serialized = serde_json::to_string(&step).unwrap_or_else(|_| "{}".into());
        let key = Self::steps_key(session_id);

        let mut conn = self.redis.clone();
        let result: redis::RedisResult<()> = redis::pipe()
            .rpush(&key, serialized)
            .ignore()
            .expire(&key, self.ttl_seconds as i64)
            .ignore()
            .query_async(&mut conn)
            .await;
        if let Err(err) = result {
            warn!(session = %session_id, error = %err, "failed to record audit step");
        }
    }
}
