//! Application configuration.

use crate::error::{AppError, AppResult};
use fixhub_api::SessionMonitorConfig;
use fixhub_ws::{ReconnectPolicy, StreamConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Path of the event feed relative to the hub origin.
const STREAM_PATH: &str = "/ws/messages";

/// Session polling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Automatic poll interval (ms). Default: 5,000.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Delay before re-reading sessions after a disconnect (ms). Default: 500.
    #[serde(default = "default_disconnect_refresh_delay_ms")]
    pub disconnect_refresh_delay_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_disconnect_refresh_delay_ms() -> u64 {
    500
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            disconnect_refresh_delay_ms: default_disconnect_refresh_delay_ms(),
        }
    }
}

/// Reconnection of the event feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_reconnect_enabled")]
    pub enabled: bool,
    /// Default: 1,000.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Default: 30,000.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// 0 = unlimited.
    #[serde(default)]
    pub max_attempts: u32,
}

fn default_reconnect_enabled() -> bool {
    true
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: default_reconnect_enabled(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: 0,
        }
    }
}

/// Event feed configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSettings {
    /// Events retained. Default: 100.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Quiet period before a ping (ms). Default: 30,000.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Pong deadline (ms). Default: 10,000.
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

fn default_capacity() -> usize {
    fixhub_ws::DEFAULT_CAPACITY
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    10_000
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// `watch` summary interval (ms). Default: 10,000.
    #[serde(default = "default_summary_interval_ms")]
    pub summary_interval_ms: u64,
}

fn default_summary_interval_ms() -> u64 {
    10_000
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            summary_interval_ms: default_summary_interval_ms(),
        }
    }
}

/// Console configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Hub REST origin.
    #[serde(default = "default_hub_url")]
    pub hub_url: String,
    /// Event feed URL. Derived from `hub_url` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,
    /// Per-request timeout (ms). Default: 10,000.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Where the credential is persisted between runs.
    #[serde(default = "default_credential_file")]
    pub credential_file: PathBuf,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub stream: StreamSettings,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

fn default_hub_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_credential_file() -> PathBuf {
    PathBuf::from(".fixhub/credential.json")
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            hub_url: default_hub_url(),
            ws_url: None,
            request_timeout_ms: default_request_timeout_ms(),
            credential_file: default_credential_file(),
            sessions: SessionsConfig::default(),
            stream: StreamSettings::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration. Path: `path` > `FIXHUB_CONFIG` > default.
    /// A missing file yields defaults.
    pub fn load(path: Option<String>) -> AppResult<Self> {
        let config_path = path
            .or_else(|| std::env::var("FIXHUB_CONFIG").ok())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

        if Path::new(&config_path).exists() {
            Self::from_file(&config_path)
        } else {
            tracing::warn!(path = %config_path, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the timers and clients cannot run with.
    pub fn validate(&self) -> AppResult<()> {
        let non_zero = [
            ("request_timeout_ms", self.request_timeout_ms),
            ("sessions.poll_interval_ms", self.sessions.poll_interval_ms),
            ("stream.heartbeat_interval_ms", self.stream.heartbeat_interval_ms),
            ("stream.heartbeat_timeout_ms", self.stream.heartbeat_timeout_ms),
            ("telemetry.summary_interval_ms", self.telemetry.summary_interval_ms),
        ];
        if let Some((field, _)) = non_zero.iter().find(|(_, value)| *value == 0) {
            return Err(AppError::Config(format!("{field} must be greater than 0")));
        }
        if self.stream.capacity == 0 {
            return Err(AppError::Config(
                "stream.capacity must be greater than 0".to_string(),
            ));
        }
        let reconnect = &self.stream.reconnect;
        if reconnect.enabled && reconnect.base_delay_ms > reconnect.max_delay_ms {
            return Err(AppError::Config(format!(
                "stream.reconnect.base_delay_ms ({}) exceeds max_delay_ms ({})",
                reconnect.base_delay_ms, reconnect.max_delay_ms
            )));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Event feed URL: `ws_url`, or `hub_url` with a WebSocket scheme and
    /// the `/ws/messages` path.
    pub fn stream_url(&self) -> AppResult<String> {
        if let Some(url) = &self.ws_url {
            return Ok(url.clone());
        }

        let base = self.hub_url.trim_end_matches('/');
        let derived = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            return Err(AppError::Config(format!(
                "Cannot derive ws_url from hub_url {}",
                self.hub_url
            )));
        };
        Ok(format!("{derived}{STREAM_PATH}"))
    }

    pub fn session_monitor_config(&self) -> SessionMonitorConfig {
        SessionMonitorConfig {
            poll_interval: Duration::from_millis(self.sessions.poll_interval_ms),
            follow_up_delay: Duration::from_millis(self.sessions.disconnect_refresh_delay_ms),
        }
    }

    pub fn stream_config(&self) -> AppResult<StreamConfig> {
        let reconnect = &self.stream.reconnect;
        Ok(StreamConfig {
            url: self.stream_url()?,
            capacity: self.stream.capacity,
            heartbeat_interval: Duration::from_millis(self.stream.heartbeat_interval_ms),
            heartbeat_timeout: Duration::from_millis(self.stream.heartbeat_timeout_ms),
            reconnect: ReconnectPolicy {
                enabled: reconnect.enabled,
                base_delay: Duration::from_millis(reconnect.base_delay_ms),
                max_delay: Duration::from_millis(reconnect.max_delay_ms),
                max_attempts: reconnect.max_attempts,
            },
        })
    }

    pub fn summary_interval(&self) -> Duration {
        Duration::from_millis(self.telemetry.summary_interval_ms)
    }
}
