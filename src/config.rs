use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::endpoint::EndpointNormalizer;
use crate::error::ConfigError;

// ─── Monitor settings ────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Upper bound on distinct (endpoint, context) buckets
    #[serde(default = "default_max_keys")]
    pub max_keys: usize,

    /// Latency samples kept per bucket for percentile estimation
    #[serde(default = "default_reservoir_size")]
    pub reservoir_size: usize,

    /// Calls still pending after this long are finalized as timeouts
    #[serde(default = "default_settle_timeout_ms")]
    pub settle_timeout_ms: u64,

    /// Buckets idle for longer than this are evicted (0 = never)
    #[serde(default = "default_bucket_ttl_ms")]
    pub bucket_ttl_ms: u64,

    /// Records waiting for the aggregator; overflow is dropped
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How often the watchdog scans pending calls and idle buckets
    #[serde(default = "default_watchdog_interval_ms")]
    pub watchdog_interval_ms: u64,

    /// Settled calls kept in the live feed (0 = feed off)
    #[serde(default = "default_recent_capacity")]
    pub recent_capacity: usize,

    /// How long a call stays in the live feed
    #[serde(default = "default_recent_max_age_ms")]
    pub recent_max_age_ms: u64,
}

fn default_max_keys() -> usize {
    1000
}
fn default_reservoir_size() -> usize {
    256
}
fn default_settle_timeout_ms() -> u64 {
    30_000
}
fn default_bucket_ttl_ms() -> u64 {
    3_600_000
}
fn default_queue_capacity() -> usize {
    4096
}
fn default_watchdog_interval_ms() -> u64 {
    250
}
fn default_recent_capacity() -> usize {
    10
}
fn default_recent_max_age_ms() -> u64 {
    5_000
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_keys: default_max_keys(),
            reservoir_size: default_reservoir_size(),
            settle_timeout_ms: default_settle_timeout_ms(),
            bucket_ttl_ms: default_bucket_ttl_ms(),
            queue_capacity: default_queue_capacity(),
            watchdog_interval_ms: default_watchdog_interval_ms(),
            recent_capacity: default_recent_capacity(),
            recent_max_age_ms: default_recent_max_age_ms(),
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_keys == 0 {
            return Err(ConfigError::Zero("max_keys"));
        }
        if self.reservoir_size == 0 {
            return Err(ConfigError::Zero("reservoir_size"));
        }
        if self.settle_timeout_ms == 0 {
            return Err(ConfigError::Zero("settle_timeout_ms"));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Zero("queue_capacity"));
        }
        if self.watchdog_interval_ms == 0 {
            return Err(ConfigError::Zero("watchdog_interval_ms"));
        }
        Ok(())
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.settle_timeout_ms)
    }

    pub fn bucket_ttl(&self) -> Option<Duration> {
        (self.bucket_ttl_ms > 0).then(|| Duration::from_millis(self.bucket_ttl_ms))
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }

    pub fn recent_max_age(&self) -> Duration {
        Duration::from_millis(self.recent_max_age_ms)
    }
}

// ─── Binary settings ─────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Port → backend label, e.g. "3001" → "SQLSERVER"
    #[serde(default)]
    pub backends: HashMap<String, String>,

    /// Replace numeric / UUID path segments with `:id` in endpoint keys
    #[serde(default)]
    pub collapse_ids: bool,

    /// URLs the probe workers call through the instrumented entry point
    #[serde(default)]
    pub probe_targets: Vec<String>,
}

fn default_listen_addr() -> String {
    "0.0.0.0:3000".into()
}

impl AppConfig {
    /// Optional `observatory.toml`, overridden by `OBSERVATORY__*` env vars.
    pub fn load() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name("observatory").required(false))
            .add_source(
                config::Environment::with_prefix("OBSERVATORY")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("probe_targets")
                    .try_parsing(true),
            )
            .build()
            .context("read configuration sources")?;

        let app: Self = cfg
            .try_deserialize()
            .context("deserialize configuration")?;
        app.monitor.validate().context("validate monitor settings")?;
        Ok(app)
    }

    pub fn normalizer(&self) -> Result<EndpointNormalizer, ConfigError> {
        let mut backends = HashMap::with_capacity(self.backends.len());
        for (port, label) in &self.backends {
            let port: u16 = port
                .parse()
                .map_err(|_| ConfigError::BackendPort(port.clone()))?;
            backends.insert(port, label.clone());
        }
        Ok(EndpointNormalizer::new(backends, self.collapse_ids))
    }
}
