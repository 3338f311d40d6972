//! Turning the on-disk config into runtime settings.

use std::time::Duration;

use crate::core::config::data::{Config, FlavorKind};
use crate::core::config::io::ConfigError;
use crate::core::dispatcher::PlaybackEstimate;
use crate::core::session::SessionSettings;
use crate::signaling::{StreamFlavor, VoiceSettings};
use crate::transport::RetryPolicy;

impl Config {
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            connect_timeout: Duration::from_secs(self.session.connect_timeout_secs),
            reconnect_delay: Duration::from_secs(self.session.reconnect_delay_secs),
            max_auto_reconnects: self.session.max_auto_reconnects,
            greeting: self
                .session
                .greeting
                .clone()
                .filter(|text| !text.trim().is_empty()),
            playback: self.playback_estimate(),
        }
    }

    pub fn playback_estimate(&self) -> PlaybackEstimate {
        PlaybackEstimate {
            base: Duration::from_millis(self.playback.base_ms),
            per_char: Duration::from_millis(self.playback.per_char_ms),
            max: Duration::from_millis(self.playback.max_ms),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.transport.max_attempts,
            Duration::from_millis(self.transport.backoff_base_ms),
        )
    }

    pub fn stream_flavor(&self) -> Result<StreamFlavor, ConfigError> {
        match self.stream.flavor {
            FlavorKind::Talks => {
                if self.stream.source_url.trim().is_empty() {
                    return Err(ConfigError::Invalid {
                        field: "stream.source_url",
                        reason: "talk streams need a presenter image".to_string(),
                    });
                }
                Ok(StreamFlavor::Talks {
                    source_url: self.stream.source_url.clone(),
                    voice: VoiceSettings {
                        provider: self.stream.voice_provider.clone(),
                        voice_id: self.stream.voice_id.clone(),
                        style: self.stream.voice_style.clone(),
                    },
                })
            }
            FlavorKind::Agent => match self.stream.agent_id.as_deref().map(str::trim) {
                Some(agent_id) if !agent_id.is_empty() => Ok(StreamFlavor::Agent {
                    agent_id: agent_id.to_string(),
                }),
                _ => Err(ConfigError::Invalid {
                    field: "stream.agent_id",
                    reason: "required when stream.flavor = \"agent\"".to_string(),
                }),
            },
        }
    }
}
