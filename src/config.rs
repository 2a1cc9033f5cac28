// src/config.rs

//! Client configuration.

use crate::errors::SentinelPoolError;
use crate::notify::ReplayDiagnostics;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tokio::fs;

#[derive(Clone, Deserialize)]
pub struct ClientConfig {
    /// Bootstrap sentinel address, `host:port`. Must identify itself as
    /// having the sentinel role.
    pub sentinel_addr: String,

    /// Logical name of the monitored master.
    pub master_name: String,

    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Pool-level delay before retrying a failed connection attempt.
    #[serde(with = "humantime_serde", default = "default_retry_delay")]
    pub retry_delay: Duration,

    /// Fixed wait at the top of every resolution-loop iteration. This is
    /// the system's only rate limiter against an unreachable sentinel set.
    #[serde(with = "humantime_serde", default = "default_resync_delay")]
    pub resync_delay: Duration,

    /// Hook invoked for each subscription that fails to replay after a
    /// resolution cycle. Not part of the file format.
    #[serde(skip)]
    pub replay_diagnostics: Option<ReplayDiagnostics>,
}

fn default_pool_size() -> usize {
    10
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_resync_delay() -> Duration {
    Duration::from_millis(100)
}

impl ClientConfig {
    /// A configuration with defaults for everything but the endpoints.
    pub fn new(sentinel_addr: impl Into<String>, master_name: impl Into<String>) -> Self {
        Self {
            sentinel_addr: sentinel_addr.into(),
            master_name: master_name.into(),
            pool_size: default_pool_size(),
            retry_delay: default_retry_delay(),
            resync_delay: default_resync_delay(),
            replay_diagnostics: None,
        }
    }

    /// Loads the configuration from a TOML file.
    pub async fn from_file(path: &str) -> Result<Self, SentinelPoolError> {
        let content = fs::read_to_string(path).await?;
        let config: ClientConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn with_replay_diagnostics(mut self, diagnostics: ReplayDiagnostics) -> Self {
        self.replay_diagnostics = Some(diagnostics);
        self
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("sentinel_addr", &self.sentinel_addr)
            .field("master_name", &self.master_name)
            .field("pool_size", &self.pool_size)
            .field("retry_delay", &self.retry_delay)
            .field("resync_delay", &self.resync_delay)
            .field("replay_diagnostics", &self.replay_diagnostics.is_some())
            .finish()
    }
}
