//! Shared constants used across the application

use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.d-id.com";
pub const DEFAULT_RELAY_LISTEN: &str = "127.0.0.1:8787";
pub const RELAY_PATH: &str = "/api/relay";

/// Connecting and AwaitingAnswer together must finish within this bound.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(45);
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_AUTO_RECONNECTS: u32 = 3;

pub const DEFAULT_PLAYBACK_BASE: Duration = Duration::from_millis(1500);
pub const DEFAULT_PLAYBACK_PER_CHAR: Duration = Duration::from_millis(60);
pub const DEFAULT_PLAYBACK_MAX: Duration = Duration::from_millis(8000);

pub const KEYRING_SERVICE: &str = "talkhead";
pub const KEYRING_ACCOUNT: &str = "api-key";
/// Checked in order before the keyring.
pub const API_KEY_ENV_VARS: [&str; 2] = ["TALKHEAD_API_KEY", "DID_API_KEY"];
