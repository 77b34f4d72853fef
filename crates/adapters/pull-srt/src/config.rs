//! Configuration for the SRT pull adapter
//!
//! Configuration can be loaded from a TOML file and/or environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::demux::ts::TS_PACKET_SIZE;

/// Main configuration for the SRT pull service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// SRT connection defaults
    #[serde(default)]
    pub srt: SrtDefaults,

    /// Reconnect behaviour
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Stream motor (scheduler) settings
    #[serde(default)]
    pub motor: MotorConfig,

    /// Streams to pull
    #[serde(default)]
    pub streams: Vec<StreamConfig>,
}

/// Defaults applied when a locator does not override them
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SrtDefaults {
    /// Port used when the locator has none
    #[serde(default = "default_srt_port")]
    pub port: u16,

    /// Latency budget in milliseconds (TSBPD delay)
    #[serde(default = "default_latency_ms")]
    pub latency_ms: u32,

    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Receive buffer size in bytes
    #[serde(default = "default_recv_buffer_size")]
    pub recv_buffer_size: usize,
}

fn default_srt_port() -> u16 {
    9000
}

fn default_latency_ms() -> u32 {
    120
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_recv_buffer_size() -> usize {
    TS_PACKET_SIZE * 7 * 16
}

impl Default for SrtDefaults {
    fn default() -> Self {
        Self {
            port: default_srt_port(),
            latency_ms: default_latency_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            recv_buffer_size: default_recv_buffer_size(),
        }
    }
}

/// Reconnection behaviour after a connection loss
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectConfig {
    /// Maximum reconnect attempts before the session gives up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first reconnect attempt (milliseconds)
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,

    /// Multiplier for exponential backoff
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f32,

    /// Maximum delay between attempts (milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    10
}

fn default_delay_ms() -> u64 {
    1000
}

fn default_backoff_multiplier() -> f32 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    5000
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl ReconnectConfig {
    /// Calculate the advisory delay before the given attempt (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = (attempt - 1).min(31) as i32;
        let delay = self.delay_ms as f64 * (self.backoff_multiplier as f64).powi(exponent);
        Duration::from_millis((delay as u64).min(self.max_delay_ms))
    }
}

/// Stream motor configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MotorConfig {
    /// Interval between processing cycles (milliseconds)
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

fn default_interval_ms() -> u64 {
    10
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
        }
    }
}

impl MotorConfig {
    /// Cycle interval as a duration
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

/// One stream to pull
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamConfig {
    /// Stream name published downstream
    pub name: String,

    /// Candidate locators, tried in order
    pub urls: Vec<String>,

    /// Per-stream overrides
    #[serde(default)]
    pub properties: PullStreamProperties,
}

/// Per-stream overrides of the adapter defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PullStreamProperties {
    /// Latency budget override (milliseconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u32>,

    /// Connection timeout override (milliseconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,

    /// Reconnect ceiling override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_reconnect_attempts: Option<u32>,
}

impl PullStreamProperties {
    /// Apply the overrides on top of adapter-wide defaults
    pub fn apply(&self, srt: &SrtDefaults, reconnect: &ReconnectConfig) -> (SrtDefaults, ReconnectConfig) {
        let mut srt = srt.clone();
        let mut reconnect = reconnect.clone();

        if let Some(latency) = self.latency_ms {
            srt.latency_ms = latency;
        }
        if let Some(timeout) = self.connect_timeout_ms {
            srt.connect_timeout_ms = timeout;
        }
        if let Some(max) = self.max_reconnect_attempts {
            reconnect.max_attempts = max;
        }

        (srt, reconnect)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(config)
    }

    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup (environment-shaped)
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        // SRT
        if let Some(p) = lookup("PULL_SRT_DEFAULT_PORT").and_then(|v| v.parse().ok()) {
            config.srt.port = p;
        }
        if let Some(l) = lookup("PULL_SRT_LATENCY_MS").and_then(|v| v.parse().ok()) {
            config.srt.latency_ms = l;
        }
        if let Some(t) = lookup("PULL_SRT_CONNECT_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            config.srt.connect_timeout_ms = t;
        }
        if let Some(s) = lookup("PULL_SRT_RECV_BUFFER_SIZE").and_then(|v| v.parse().ok()) {
            config.srt.recv_buffer_size = s;
        }

        // Reconnect
        if let Some(m) = lookup("PULL_SRT_MAX_RECONNECTS").and_then(|v| v.parse().ok()) {
            config.reconnect.max_attempts = m;
        }
        if let Some(d) = lookup("PULL_SRT_RECONNECT_DELAY_MS").and_then(|v| v.parse().ok()) {
            config.reconnect.delay_ms = d;
        }

        // Motor
        if let Some(i) = lookup("PULL_SRT_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            config.motor.interval_ms = i;
        }

        // Single stream from env
        if let Some(urls) = lookup("PULL_SRT_URLS") {
            let urls: Vec<String> = urls
                .split(',')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(str::to_string)
                .collect();
            if !urls.is_empty() {
                config.streams.push(StreamConfig {
                    name: lookup("PULL_SRT_STREAM_NAME").unwrap_or_else(|| "default".to_string()),
                    urls,
                    properties: PullStreamProperties::default(),
                });
            }
        }

        config
    }

    /// Load configuration from file if it exists, otherwise from environment
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self, ConfigError> {
        if let Some(p) = path {
            if p.as_ref().exists() {
                return Self::from_file(p);
            }
        }
        Ok(Self::from_env())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
