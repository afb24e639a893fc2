use serde::Deserialize;
use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use crate::error::{TelemetryError, TelemetryResult};

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TelemetryConfig {
    pub experiment_name: String,
    pub mode: String,
    pub duration_secs: u64,
    pub benchmark_receivers: usize,
    pub broadcast: BroadcastConfig,
    pub source: SourceConfig,
    pub receiver: ReceiverConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BroadcastConfig {
    pub host: String,
    pub port: u16,
    pub write_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SourceConfig {
    pub period_ms: u64,
    pub amplitude: f64,
    pub frequency_hz: f64,
    pub queue_capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReceiverConfig {
    pub host: String,
    pub port: u16,
    pub capacity: usize,
    pub smoothing_window: usize,
    pub connect_timeout_ms: u64,
    /// Silence on an open link longer than this counts as a lost connection.
    pub idle_timeout_ms: u64,
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
    pub refresh_ms: u64,
    pub display_secs: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub database_url: String,
    pub http_bind: String,
    pub max_connections: u32,
    pub relay: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            experiment_name: "ecg_relay".to_string(),
            mode: "async".to_string(),
            duration_secs: 10,
            benchmark_receivers: 4,
            broadcast: BroadcastConfig::default(),
            source: SourceConfig::default(),
            receiver: ReceiverConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 65432,
            write_timeout_ms: 250,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            period_ms: 200,
            amplitude: 1.0,
            frequency_hz: 1.0,
            queue_capacity: 64,
        }
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 65432,
            capacity: 500,
            smoothing_window: 5,
            connect_timeout_ms: 2_000,
            idle_timeout_ms: 2_000,
            retry_initial_ms: 500,
            retry_max_ms: 5_000,
            refresh_ms: 100,
            display_secs: 10.0,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://ecg_data.db?mode=rwc".to_string(),
            http_bind: "0.0.0.0:5000".to_string(),
            max_connections: 5,
            relay: true,
        }
    }
}

/// Bounded exponential back-off between reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    pub fn next(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }
}

pub fn load_config(path: impl AsRef<Path>) -> TelemetryResult<TelemetryConfig> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| {
        TelemetryError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
    })?;
    TelemetryConfig::from_toml_str(&content)
}

impl TelemetryConfig {
    pub fn from_toml_str(content: &str) -> TelemetryResult<Self> {
        let config: TelemetryConfig =
            toml::from_str(content).map_err(|e| TelemetryError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TelemetryResult<()> {
        self.broadcast.socket_addr()?;
        self.receiver.socket_addr()?;
        self.store
            .http_bind
            .parse::<SocketAddr>()
            .map_err(|e| invalid(format!("store.http_bind {:?}: {}", self.store.http_bind, e)))?;

        if self.broadcast.write_timeout_ms == 0 {
            return Err(invalid("broadcast.write_timeout_ms must be positive"));
        }
        if self.source.period_ms == 0 {
            return Err(invalid("source.period_ms must be positive"));
        }
        if !self.source.amplitude.is_finite() || !self.source.frequency_hz.is_finite() {
            return Err(invalid("source waveform parameters must be finite"));
        }
        if self.receiver.capacity == 0 {
            return Err(invalid("receiver.capacity must be at least 1"));
        }
        if self.receiver.connect_timeout_ms == 0 {
            return Err(invalid("receiver.connect_timeout_ms must be positive"));
        }
        if self.receiver.idle_timeout_ms == 0 {
            return Err(invalid("receiver.idle_timeout_ms must be positive"));
        }
        if self.receiver.retry_initial_ms == 0
            || self.receiver.retry_initial_ms > self.receiver.retry_max_ms
        {
            return Err(invalid(
                "receiver retry delays must satisfy 0 < retry_initial_ms <= retry_max_ms",
            ));
        }
        match self.mode.as_str() {
            "threaded" | "async" => Ok(()),
            other => Err(invalid(format!("unknown mode {other:?}"))),
        }
    }

    pub fn period(&self) -> Duration {
        Duration::from_millis(self.source.period_ms)
    }
}

impl BroadcastConfig {
    pub fn socket_addr(&self) -> TelemetryResult<SocketAddr> {
        resolve(&self.host, self.port)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl ReceiverConfig {
    pub fn socket_addr(&self) -> TelemetryResult<SocketAddr> {
        resolve(&self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial: Duration::from_millis(self.retry_initial_ms),
            max: Duration::from_millis(self.retry_max_ms),
        }
    }
}

fn resolve(host: &str, port: u16) -> TelemetryResult<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| invalid(format!("unresolvable address {host}:{port}")))
}

fn invalid(message: impl Into<String>) -> TelemetryError {
    TelemetryError::InvalidConfig(message.into())
}
