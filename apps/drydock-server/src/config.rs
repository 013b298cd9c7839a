use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{bail, Context};
use drydock_core::acquisition::AcquisitionConfig;

/// Resolved server configuration, assembled from the CLI in `main`.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub redis_url: Option<String>,
    pub session_timeout: Duration,
    pub endpoint_attempts: u32,
    pub endpoint_wait_increment: Duration,
    pub endpoint_port: u16,
    pub probe_timeout: Duration,
    pub audit_ttl_seconds: u64,
    pub platform_pools: BTreeMap<String, Vec<String>>,
}

impl Config {
    pub fn acquisition(&self) -> AcquisitionConfig {
        AcquisitionConfig {
            max_attempts: self.endpoint_attempts,
            wait_increment: self.endpoint_wait_increment,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 9000,
            redis_url: None,
            session_timeout: Duration::from_secs(60),
            endpoint_attempts: 3,
            endpoint_wait_increment: Duration::from_secs(10),
            endpoint_port: 4455,
            probe_timeout: Duration::from_secs(5),
            audit_ttl_seconds: 86_400,
            platform_pools: BTreeMap::new(),
        }
    }
}

/// Parses a pool definition of the form
/// `ubuntu-14.04-x64=10.0.0.5,10.0.0.6;windows-7=10.0.1.2`.
/// Platforms without hosts are rejected; surrounding whitespace is ignored.
pub fn parse_pools(raw: &str) -> anyhow::Result<BTreeMap<String, Vec<String>>> {
    let mut pools = BTreeMap::new();
    for entry in raw.split(';') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (platform, hosts) = entry
            .split_once('=')
            .with_context(|| format!("pool entry {entry:?} is missing '='"))?;
        let platform = platform.trim();
        let hosts: Vec<String> = hosts
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .collect();
        if platform.is_empty() || hosts.is_empty() {
            bail!("pool entry {entry:?} needs a platform and at least one host");
        }
        pools.insert(platform.to_string(), hosts);
    }
    Ok(pools)
}
