use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::constants::{
    DEFAULT_BASE_URL, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_AUTO_RECONNECTS,
    DEFAULT_PLAYBACK_BASE, DEFAULT_PLAYBACK_MAX, DEFAULT_PLAYBACK_PER_CHAR,
    DEFAULT_RECONNECT_DELAY, DEFAULT_RELAY_LISTEN,
};

pub const DEFAULT_SOURCE_URL: &str = "https://d-id-public-bucket.s3.amazonaws.com/alice.jpg";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// Forwarding endpoint; when set, every vendor call goes through it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay_url: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            relay_url: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FlavorKind {
    #[default]
    Talks,
    Agent,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct StreamConfig {
    pub flavor: FlavorKind,
    /// Required for the agent flavor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Presenter image for talk streams.
    pub source_url: String,
    pub voice_provider: String,
    pub voice_id: String,
    pub voice_style: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            flavor: FlavorKind::Talks,
            agent_id: None,
            source_url: DEFAULT_SOURCE_URL.to_string(),
            voice_provider: "microsoft".to_string(),
            voice_id: "en-US-JennyNeural".to_string(),
            voice_style: "cheerful".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    pub connect_timeout_secs: u64,
    pub reconnect_delay_secs: u64,
    pub max_auto_reconnects: u32,
    /// Spoken once when the first session comes up
    #[serde(skip_serializing_if = "Option::is_none")]
    pub greeting: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT.as_secs(),
            reconnect_delay_secs: DEFAULT_RECONNECT_DELAY.as_secs(),
            max_auto_reconnects: DEFAULT_MAX_AUTO_RECONNECTS,
            greeting: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct TransportConfig {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_attempts: crate::transport::DEFAULT_MAX_ATTEMPTS,
            backoff_base_ms: crate::transport::DEFAULT_BACKOFF_BASE.as_millis() as u64,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct PlaybackConfig {
    pub base_ms: u64,
    pub per_char_ms: u64,
    pub max_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            base_ms: DEFAULT_PLAYBACK_BASE.as_millis() as u64,
            per_char_ms: DEFAULT_PLAYBACK_PER_CHAR.as_millis() as u64,
            max_ms: DEFAULT_PLAYBACK_MAX.as_millis() as u64,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RelayConfig {
    pub listen: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_RELAY_LISTEN.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub stream: StreamConfig,
    pub session: SessionConfig,
    pub transport: TransportConfig,
    pub playback: PlaybackConfig,
    pub relay: RelayConfig,
}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
///
/// # Examples
/// - Unix: `/home/user/.config/talkhead/config.toml` → `~/.config/talkhead/config.toml`
/// - macOS: `/Users/user/Library/Application Support/...` → `~/Library/Application Support/...`
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
