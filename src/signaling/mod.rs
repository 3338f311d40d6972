//! Vendor signaling calls, sequenced by the session manager.
//!
//! The [`Signaling`] trait is the boundary the rest of the crate talks to;
//! [`VendorSignaling`] maps it onto the streaming API's REST paths for the
//! two stream flavors (plain talk streams and agent streams with a chat).

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::api::{
    AgentChatMessage, AgentChatRequest, CreateAgentStreamRequest, CreateChatResponse,
    CreateStreamResponse, CreateTalkStreamRequest, IceCandidate, IceCandidateRequest, IceServer,
    SdpAnswerRequest, SessionDescription, SessionRef, TalkConfig, TalkStreamMessage, TextScript,
    VoiceConfig, VoiceProvider,
};
use crate::transport::{Endpoint, TransportClient, TransportError};
use crate::utils::url::encode_segment;

/// Remote-assigned identifiers of one streaming negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamIds {
    pub stream_id: String,
    pub session_id: String,
}

/// Everything the create-stream call hands back.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteStream {
    pub ids: StreamIds,
    pub offer: SessionDescription,
    pub ice_servers: Vec<IceServer>,
}

/// Where "speak" requests go once the channel is open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTarget {
    pub ids: StreamIds,
    /// Chat id for agent streams; talk streams speak on the stream itself.
    pub chat_id: Option<String>,
}

/// What the vendor said about a sent message.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SendReceipt {
    /// Playback length, when the response reports one.
    pub duration: Option<Duration>,
}

impl SendReceipt {
    pub fn from_response(body: &Value) -> Self {
        let duration = body
            .get("duration")
            .and_then(Value::as_f64)
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64);
        Self { duration }
    }
}

#[async_trait]
/// Remote signaling endpoint contract. Request/response shapes are the
/// implementation's business; callers rely only on the sequencing.
pub trait Signaling: Send + Sync {
    async fn create_stream(&self) -> Result<RemoteStream, TransportError>;

    async fn submit_answer(
        &self,
        ids: &StreamIds,
        answer: &SessionDescription,
    ) -> Result<(), TransportError>;

    /// `None` signals end of candidates.
    async fn submit_ice(
        &self,
        ids: &StreamIds,
        candidate: Option<&IceCandidate>,
    ) -> Result<(), TransportError>;

    async fn open_channel(&self, ids: &StreamIds) -> Result<ChannelTarget, TransportError>;

    async fn send_message(
        &self,
        target: &ChannelTarget,
        text: &str,
    ) -> Result<SendReceipt, TransportError>;

    async fn delete_stream(&self, ids: &StreamIds) -> Result<(), TransportError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceSettings {
    pub provider: String,
    pub voice_id: String,
    pub style: String,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            provider: "microsoft".to_string(),
            voice_id: "en-US-JennyNeural".to_string(),
            style: "cheerful".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFlavor {
    Talks {
        source_url: String,
        voice: VoiceSettings,
    },
    Agent {
        agent_id: String,
    },
}

impl StreamFlavor {
    fn streams_path(&self) -> String {
        match self {
            StreamFlavor::Talks { .. } => "/talks/streams".to_string(),
            StreamFlavor::Agent { agent_id } => {
                format!("/agents/{}/streams", encode_segment(agent_id))
            }
        }
    }

    fn stream_path(&self, ids: &StreamIds) -> String {
        format!("{}/{}", self.streams_path(), encode_segment(&ids.stream_id))
    }
}

pub struct VendorSignaling {
    transport: TransportClient,
    flavor: StreamFlavor,
}

fn to_payload<T: Serialize>(body: &T) -> Result<Value, TransportError> {
    serde_json::to_value(body).map_err(|err| TransportError::Decode(err.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(
    endpoint: &Endpoint,
    value: Value,
) -> Result<T, TransportError> {
    serde_json::from_value(value)
        .map_err(|err| TransportError::Decode(format!("{endpoint}: {err}")))
}

impl VendorSignaling {
    pub fn new(transport: TransportClient, flavor: StreamFlavor) -> Self {
        Self { transport, flavor }
    }

    pub fn flavor(&self) -> &StreamFlavor {
        &self.flavor
    }

    fn create_payload(&self) -> Result<Value, TransportError> {
        match &self.flavor {
            StreamFlavor::Talks { source_url, .. } => to_payload(&CreateTalkStreamRequest {
                source_url: source_url.as_str(),
            }),
            StreamFlavor::Agent { .. } => to_payload(&CreateAgentStreamRequest {
                compatibility_mode: "on",
                fluent: true,
            }),
        }
    }

    fn message_request(
        &self,
        target: &ChannelTarget,
        text: &str,
    ) -> Result<(Endpoint, Value), TransportError> {
        match (&self.flavor, target.chat_id.as_deref()) {
            (StreamFlavor::Talks { voice, .. }, _) => {
                let body = TalkStreamMessage {
                    script: TextScript {
                        kind: "text",
                        input: text,
                        provider: VoiceProvider {
                            kind: &voice.provider,
                            voice_id: &voice.voice_id,
                            voice_config: VoiceConfig {
                                style: &voice.style,
                            },
                        },
                    },
                    config: TalkConfig {
                        fluent: true,
                        pad_audio: 0.0,
                        stitch: true,
                        align_driver: true,
                    },
                    session_id: &target.ids.session_id,
                };
                Ok((
                    Endpoint::post(self.flavor.stream_path(&target.ids)),
                    to_payload(&body)?,
                ))
            }
            (StreamFlavor::Agent { agent_id }, Some(chat_id)) => {
                let body = AgentChatRequest {
                    stream_id: &target.ids.stream_id,
                    session_id: &target.ids.session_id,
                    messages: vec![AgentChatMessage {
                        role: "user",
                        content: text,
                        created_at: Utc::now().to_rfc3339(),
                    }],
                };
                Ok((
                    Endpoint::post(format!(
                        "/agents/{}/chat/{}",
                        encode_segment(agent_id),
                        encode_segment(chat_id)
                    )),
                    to_payload(&body)?,
                ))
            }
            (StreamFlavor::Agent { .. }, None) => Err(TransportError::Decode(
                "agent stream has no open chat".to_string(),
            )),
        }
    }
}

#[async_trait]
impl Signaling for VendorSignaling {
    async fn create_stream(&self) -> Result<RemoteStream, TransportError> {
        let endpoint = Endpoint::post(self.flavor.streams_path());
        let payload = self.create_payload()?;
        let value = self.transport.call(&endpoint, Some(&payload)).await?;
        let created: CreateStreamResponse = decode(&endpoint, value)?;
        debug!(stream_id = %created.id, ice_servers = created.ice_servers.len(), "Stream created");
        Ok(RemoteStream {
            ids: StreamIds {
                stream_id: created.id,
                session_id: created.session_id,
            },
            offer: created.offer,
            ice_servers: created.ice_servers,
        })
    }

    async fn submit_answer(
        &self,
        ids: &StreamIds,
        answer: &SessionDescription,
    ) -> Result<(), TransportError> {
        let endpoint = Endpoint::post(format!("{}/sdp", self.flavor.stream_path(ids)));
        let payload = to_payload(&SdpAnswerRequest {
            answer,
            session_id: &ids.session_id,
        })?;
        self.transport.call(&endpoint, Some(&payload)).await?;
        Ok(())
    }

    async fn submit_ice(
        &self,
        ids: &StreamIds,
        candidate: Option<&IceCandidate>,
    ) -> Result<(), TransportError> {
        let endpoint = Endpoint::post(format!("{}/ice", self.flavor.stream_path(ids)));
        let payload = to_payload(&IceCandidateRequest {
            candidate,
            session_id: &ids.session_id,
        })?;
        self.transport.call(&endpoint, Some(&payload)).await?;
        Ok(())
    }

    async fn open_channel(&self, ids: &StreamIds) -> Result<ChannelTarget, TransportError> {
        let chat_id = match &self.flavor {
            StreamFlavor::Talks { .. } => None,
            StreamFlavor::Agent { agent_id } => {
                let endpoint = Endpoint::post(format!("/agents/{}/chat", encode_segment(agent_id)));
                let value = self
                    .transport
                    .call(&endpoint, Some(&Value::Object(Default::default())))
                    .await?;
                let chat: CreateChatResponse = decode(&endpoint, value)?;
                debug!(chat_id = %chat.id, "Agent chat opened");
                Some(chat.id)
            }
        };
        Ok(ChannelTarget {
            ids: ids.clone(),
            chat_id,
        })
    }

    async fn send_message(
        &self,
        target: &ChannelTarget,
        text: &str,
    ) -> Result<SendReceipt, TransportError> {
        let (endpoint, payload) = self.message_request(target, text)?;
        let value = self.transport.call(&endpoint, Some(&payload)).await?;
        Ok(SendReceipt::from_response(&value))
    }

    async fn delete_stream(&self, ids: &StreamIds) -> Result<(), TransportError> {
        let endpoint = Endpoint::delete(self.flavor.stream_path(ids));
        let payload = to_payload(&SessionRef {
            session_id: &ids.session_id,
        })?;
        self.transport.call(&endpoint, Some(&payload)).await?;
        Ok(())
    }
}
