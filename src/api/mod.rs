//! Wire payloads for the streaming avatar API and the forwarding envelope.
//!
//! Only the fields the session lifecycle depends on are modelled; anything
//! else in vendor responses is ignored on decode.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// SDP role of a session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }

    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }
}

/// `urls` is either a single string or a list in vendor payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IceUrls {
    One(String),
    Many(Vec<String>),
}

impl IceUrls {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            IceUrls::One(url) => vec![url.clone()],
            IceUrls::Many(urls) => urls.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: IceUrls,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// A locally gathered ICE candidate, in the browser's `RTCIceCandidateInit` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
}

/// Response to a create-stream call.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateStreamResponse {
    pub id: String,
    pub session_id: String,
    pub offer: SessionDescription,
    #[serde(default)]
    pub ice_servers: Vec<IceServer>,
}

#[derive(Debug, Serialize)]
pub struct CreateTalkStreamRequest<'a> {
    pub source_url: &'a str,
}

#[derive(Debug, Serialize)]
pub struct CreateAgentStreamRequest {
    pub compatibility_mode: &'static str,
    pub fluent: bool,
}

#[derive(Debug, Serialize)]
pub struct SdpAnswerRequest<'a> {
    pub answer: &'a SessionDescription,
    pub session_id: &'a str,
}

#[derive(Debug, Serialize)]
pub struct IceCandidateRequest<'a> {
    #[serde(flatten)]
    pub candidate: Option<&'a IceCandidate>,
    pub session_id: &'a str,
}

#[derive(Debug, Serialize)]
pub struct SessionRef<'a> {
    pub session_id: &'a str,
}

#[derive(Debug, Serialize)]
pub struct VoiceConfig<'a> {
    pub style: &'a str,
}

#[derive(Debug, Serialize)]
pub struct VoiceProvider<'a> {
    #[serde(rename = "type")]
    pub kind: &'a str,
    pub voice_id: &'a str,
    pub voice_config: VoiceConfig<'a>,
}

#[derive(Debug, Serialize)]
pub struct TextScript<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub input: &'a str,
    pub provider: VoiceProvider<'a>,
}

#[derive(Debug, Serialize)]
pub struct TalkConfig {
    pub fluent: bool,
    pub pad_audio: f32,
    pub stitch: bool,
    pub align_driver: bool,
}

#[derive(Debug, Serialize)]
pub struct TalkStreamMessage<'a> {
    pub script: TextScript<'a>,
    pub config: TalkConfig,
    pub session_id: &'a str,
}

#[derive(Debug, Serialize)]
pub struct AgentChatMessage<'a> {
    pub role: &'static str,
    pub content: &'a str,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct AgentChatRequest<'a> {
    pub stream_id: &'a str,
    pub session_id: &'a str,
    pub messages: Vec<AgentChatMessage<'a>>,
}

#[derive(Debug, Deserialize)]
pub struct CreateChatResponse {
    pub id: String,
}

/// Request accepted by the same-origin forwarding endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayRequest {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_relay_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

fn default_relay_method() -> String {
    "GET".to_string()
}

/// Parses a response body as JSON, keeping it as a JSON string when it is not.
pub fn json_or_text(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}
