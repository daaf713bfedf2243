//! Timing and endpoint configuration for the stream client.

use std::time::Duration;

use quest_core::types::JobId;

use crate::reconnect::ReconnectPolicy;

/// Connection manager configuration.
///
/// `Default` matches the production report server; override via
/// environment variables with [`StreamConfig::from_env`].
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// WebSocket base URL of the report server, e.g. `ws://localhost:8000`.
    pub ws_base: String,
    /// How long a channel may stay in `Connecting` before it is abandoned.
    pub connect_timeout: Duration,
    /// Interval between keepalive pings on an open channel.
    pub heartbeat_interval: Duration,
    /// Retry policy after an unexpected close.
    pub reconnect: ReconnectPolicy,
    /// A job still `InProgress` after this long is failed locally.
    pub stall_timeout: Duration,
    /// Delay between report completion and the automatic disconnect.
    pub completion_disconnect_delay: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ws_base: "ws://localhost:8000".into(),
            connect_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            reconnect: ReconnectPolicy::default(),
            stall_timeout: Duration::from_secs(600),
            completion_disconnect_delay: Duration::from_secs(2),
        }
    }
}

impl StreamConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default                 |
    /// |------------------------------|-------------------------|
    /// | `QUEST_STREAM_URL`           | `http://localhost:8000` |
    /// | `QUEST_CONNECT_TIMEOUT_SECS` | `10`                    |
    /// | `QUEST_HEARTBEAT_SECS`       | `30`                    |
    /// | `QUEST_RECONNECT_DELAY_SECS` | `3`                     |
    /// | `QUEST_MAX_RECONNECTS`       | `3`                     |
    /// | `QUEST_STALL_TIMEOUT_SECS`   | `600`                   |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let stream_url =
            lookup("QUEST_STREAM_URL").unwrap_or_else(|| "http://localhost:8000".into());

        Ok(Self {
            ws_base: websocket_base(&stream_url)?,
            connect_timeout: secs(&lookup, "QUEST_CONNECT_TIMEOUT_SECS", defaults.connect_timeout)?,
            heartbeat_interval: secs(&lookup, "QUEST_HEARTBEAT_SECS", defaults.heartbeat_interval)?,
            reconnect: ReconnectPolicy {
                delay: secs(&lookup, "QUEST_RECONNECT_DELAY_SECS", defaults.reconnect.delay)?,
                max_attempts: parse(
                    &lookup,
                    "QUEST_MAX_RECONNECTS",
                    defaults.reconnect.max_attempts,
                )?,
            },
            stall_timeout: secs(&lookup, "QUEST_STALL_TIMEOUT_SECS", defaults.stall_timeout)?,
            completion_disconnect_delay: defaults.completion_disconnect_delay,
        })
    }

    /// Report channel URL for a job.
    pub fn channel_url(&self, job_id: &JobId) -> String {
        format!("{}/ws/reports/{}", self.ws_base, job_id)
    }
}

/// Completion coordinator delays.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Pause between the success notification and the redirect.
    pub redirect_delay: Duration,
    /// Pause between the redirect and the final cleanup.
    pub cleanup_after_redirect: Duration,
    /// How long a disconnected job is given to come back before cleanup.
    pub disconnect_grace: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            redirect_delay: Duration::from_millis(1500),
            cleanup_after_redirect: Duration::from_secs(10),
            disconnect_grace: Duration::from_secs(5),
        }
    }
}

/// Turn an HTTP(S) base URL into the matching WebSocket base.
///
/// `ws://` and `wss://` bases are accepted unchanged. A trailing slash is
/// dropped.
pub fn websocket_base(url: &str) -> Result<String, ConfigError> {
    let url = url.trim().trim_end_matches('/');
    let converted = if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if url.starts_with("ws://") || url.starts_with("wss://") {
        url.to_string()
    } else {
        return Err(ConfigError::InvalidUrl(url.to_string()));
    };
    Ok(converted)
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}

/// Whole seconds; zero is rejected.
fn secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match lookup(key) {
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(n) if n > 0 => Ok(Duration::from_secs(n)),
            _ => Err(ConfigError::Invalid { key, value: raw }),
        },
        None => Ok(default),
    }
}

/// Invalid configuration value.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} has invalid value '{value}'")]
    Invalid { key: &'static str, value: String },

    #[error("'{0}' is not an http(s) or ws(s) URL")]
    InvalidUrl(String),
}
