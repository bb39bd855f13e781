//! Configuration schema definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub broadcast: BroadcastConfig,

    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub reconnect: ReconnectConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Configuration for an application key on a hosted cluster, with
    /// defaults everywhere else.
    pub fn new(app_key: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            broadcast: BroadcastConfig {
                app_key: app_key.into(),
                cluster: cluster.into(),
                ..BroadcastConfig::default()
            },
            ..Self::default()
        }
    }
}

/// Broadcasting service endpoint and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Static application key.
    #[serde(default)]
    pub app_key: String,

    /// Cluster identifier, e.g. `mt1` or `eu`.
    #[serde(default = "default_cluster")]
    pub cluster: String,

    /// Host of a self-hosted compatible server; replaces the cluster host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Use `wss://`. Only disable for local development servers.
    #[serde(default = "default_force_tls")]
    pub force_tls: bool,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            app_key: String::new(),
            cluster: default_cluster(),
            host: None,
            port: None,
            force_tls: default_force_tls(),
        }
    }
}

fn default_cluster() -> String {
    "mt1".to_string()
}

fn default_force_tls() -> bool {
    true
}

/// Connection timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle time before the client pings. The server's advertised value wins
    /// when it is smaller.
    #[serde(default = "default_activity_timeout")]
    pub activity_timeout_secs: u64,

    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_secs: u64,
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn activity_timeout(&self) -> Duration {
        Duration::from_secs(self.activity_timeout_secs)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            activity_timeout_secs: default_activity_timeout(),
            pong_timeout_secs: default_pong_timeout(),
        }
    }
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_activity_timeout() -> u64 {
    120
}

fn default_pong_timeout() -> u64 {
    30
}

/// Reconnect backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Fraction of each delay randomised in both directions (0.0 - 1.0).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

fn default_initial_delay() -> u64 {
    1_000
}

fn default_max_delay() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.2
}

/// Logging output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is not set.
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    /// Directory for daily rolling log files. Console only when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            directory: None,
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}
