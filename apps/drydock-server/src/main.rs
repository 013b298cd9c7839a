use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use drydock_core::audit::{AuditSink, InMemoryAudit};
use drydock_core::driver::ProvisioningDriver;
use drydock_core::reaper::Reaper;
use drydock_core::service::{ServiceConfig, SessionService};
use drydock_core::store::{InMemorySessionStore, SessionStore};
use tokio::signal;
use tracing::info;

mod config;
mod handlers;
mod pool;
mod storage;
mod telemetry;

use config::Config;
use handlers::AppState;
use pool::FixedPoolDriver;
use storage::RedisAudit;
use telemetry::Telemetry;

#[derive(Debug, Parser)]
#[command(
    name = "drydock-server",
    author,
    version,
    about = "WebDriver session hub with pooled endpoints"
)]
struct Cli {
    /// Port for the HTTP listener.
    #[arg(long, env = "DRYDOCK_PORT", default_value_t = 9000)]
    port: u16,

    /// Redis connection URI for the audit trail. Audit stays in memory when
    /// unset.
    #[arg(long, env = "DRYDOCK_REDIS_URL")]
    redis_url: Option<String>,

    /// Sessions idle for longer than this are reaped.
    #[arg(long, env = "DRYDOCK_SESSION_TIMEOUT_SECS", default_value_t = 60)]
    session_timeout_secs: u64,

    /// Provisioning attempts before a session creation fails.
    #[arg(long, env = "DRYDOCK_ENDPOINT_ATTEMPTS", default_value_t = 3)]
    endpoint_attempts: u32,

    /// Linear backoff increment between provisioning attempts.
    #[arg(long, env = "DRYDOCK_ENDPOINT_WAIT_INCREMENT_SECS", default_value_t = 10)]
    endpoint_wait_increment_secs: u64,

    /// Port the endpoints' automation server listens on.
    #[arg(long, env = "DRYDOCK_ENDPOINT_PORT", default_value_t = 4455)]
    endpoint_port: u16,

    /// Timeout for the TCP readiness probe against a leased host.
    #[arg(long, env = "DRYDOCK_PROBE_TIMEOUT_SECS", default_value_t = 5)]
    probe_timeout_secs: u64,

    /// TTL applied to each session's audit trail in Redis.
    #[arg(long, env = "DRYDOCK_AUDIT_TTL_SECS", default_value_t = 86_400)]
    audit_ttl_secs: u64,

    /// Host pools per platform, e.g.
    /// "ubuntu-14.04-x64=10.0.0.5,10.0.0.6;windows-7=10.0.1.2".
    #[arg(long, env = "DRYDOCK_PLATFORM_POOLS", default_value = "")]
    platform_pools: String,
}

impl TryFrom<Cli> for Config {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        Ok(Config {
            port: cli.port,
            redis_url: cli.redis_url,
            session_timeout: Duration::from_secs(cli.session_timeout_secs),
            endpoint_attempts: cli.endpoint_attempts,
            endpoint_wait_increment: Duration::from_secs(cli.endpoint_wait_increment_secs),
            endpoint_port: cli.endpoint_port,
            probe_timeout: Duration::from_secs(cli.probe_timeout_secs),
            audit_ttl_seconds: cli.audit_ttl_secs,
            platform_pools: config::parse_pools(&cli.platform_pools)?,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = Telemetry::init()?;
    let config: Config = Cli::parse().try_into()?;

    let driver = Arc::new(FixedPoolDriver::new(
        config.platform_pools.clone(),
        config.endpoint_port,
        config.probe_timeout,
    ));
    let platforms = driver.platforms();
    info!(
        port = config.port,
        platforms = platforms.len(),
        "starting drydock"
    );

    let store: Arc<dyn SessionStore> = InMemorySessionStore::new();
    let audit: Arc<dyn AuditSink> = match &config.redis_url {
        Some(url) => {
            let audit = RedisAudit::new(url, config.audit_ttl_seconds)
                .await
                .context("failed to connect to Redis")?;
            info!(redis = %url, "audit trail backed by Redis");
            Arc::new(audit)
        }
        None => Arc::new(InMemoryAudit::default()),
    };

    let provisioning: Arc<dyn ProvisioningDriver> = driver.clone();
    let service = Arc::new(SessionService::new(
        provisioning,
        Arc::clone(&store),
        audit,
        ServiceConfig {
            acquisition: config.acquisition(),
            endpoint_port: config.endpoint_port,
        },
    ));

    let reaper = Reaper::new(Arc::clone(&store), config.session_timeout).spawn();

    let app = handlers::router(AppState {
        service,
        platforms,
        metrics: telemetry.metrics_handle(),
    });

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "drydock listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("server error")?;

    reaper.stop().await;
    Ok(())
}
