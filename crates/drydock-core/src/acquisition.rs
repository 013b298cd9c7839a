use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::driver::{Endpoint, ProvisioningDriver};
use crate::Error;

#[derive(Debug, Clone)]
pub struct AcquisitionConfig {
    pub max_attempts: u32,
    pub wait_increment: Duration,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            wait_increment: Duration::from_secs(10),
        }
    }
}

/// Progress emitted while obtaining an endpoint. `Ready` is the designated
/// terminal item; consumers must treat everything before it as heartbeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionEvent {
    Candidate(Endpoint),
    Ready(Endpoint),
}

/// Obtains a ready endpoint from the provisioning driver within a bounded
/// number of attempts, with linear backoff between them.
///
/// Candidates the driver surfaces mid-attempt are forwarded to `events` and
/// tracked; when an attempt fails, a tracked non-ready candidate is deleted
/// before any retry. Leaking a half-provisioned endpoint is a correctness
/// bug, not a cosmetic one.
pub async fn acquire(
    driver: &Arc<dyn ProvisioningDriver>,
    session_id: Uuid,
    platform: &str,
    dc: &Value,
    events: &mpsc::Sender<AcquisitionEvent>,
    config: &AcquisitionConfig,
) -> Result<Endpoint, Error> {
    let mut attempt = 0u32;
    let mut wait_time = Duration::ZERO;

    loop {
        attempt += 1;
        wait_time += config.wait_increment;
        info!(session = %session_id, attempt, "trying to get an endpoint");

        let (candidate_tx, mut candidate_rx) = mpsc::channel::<Endpoint>(8);
        let mut last_candidate: Option<Endpoint> = None;

        let create = driver.create(platform, dc, candidate_tx);
        tokio::pin!(create);
        let outcome = loop {
            tokio::select! {
                result = &mut create => break result,
                Some(candidate) = candidate_rx.recv() => {
                    last_candidate = Some(candidate.clone());
                    let _ = events.send(AcquisitionEvent::Candidate(candidate)).await;
                }
            }
        };
        while let Ok(candidate) = candidate_rx.try_recv() {
            last_candidate = Some(candidate.clone());
            let _ = events.send(AcquisitionEvent::Candidate(candidate)).await;
        }

        match outcome {
            Ok(endpoint) => {
                info!(
                    session = %session_id,
                    attempt,
                    endpoint = %endpoint.name,
                    "endpoint acquisition succeeded"
                );
                let _ = events.send(AcquisitionEvent::Ready(endpoint.clone())).await;
                return Ok(endpoint);
            }
            Err(err) => {
                warn!(
                    session = %session_id,
                    attempt,
                    error = %err,
                    "endpoint acquisition attempt failed"
                );
                if let Some(candidate) = last_candidate.take() {
                    if !driver.ready(&candidate).await {
                        if let Err(del_err) = driver.delete(&candidate.id).await {
                            warn!(
                                session = %session_id,
                                endpoint = %candidate.name,
                                error = %del_err,
                                "failed to clean up half-provisioned endpoint"
                            );
                        }
                    }
                }
                if attempt < config.max_attempts {
                    tokio::time::sleep(wait_time).await;
                } else {
                    return Err(err);
                }
            }
        }
    }
}
