use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use super::http::JSON_CONTENT_TYPE;
use super::{Endpoint, Exchange, TransportError};
use crate::api::{json_or_text, RelayRequest};

/// Routes every call through a same-origin forwarding endpoint.
///
/// The endpoint holds the vendor credential, so no auth header is sent from
/// here. Relayed non-2xx statuses come back as [`TransportError::Status`]
/// exactly as a direct call would produce them.
pub struct RelayExchange {
    client: reqwest::Client,
    relay_url: String,
}

impl RelayExchange {
    pub fn new(client: reqwest::Client, relay_url: impl Into<String>) -> Self {
        Self {
            client,
            relay_url: relay_url.into(),
        }
    }

    pub(crate) fn envelope(endpoint: &Endpoint, payload: Option<&Value>) -> RelayRequest {
        RelayRequest {
            path: Some(format!("/{}", endpoint.path.trim_start_matches('/'))),
            method: endpoint.method.as_str().to_string(),
            headers: HashMap::new(),
            body: payload.cloned(),
        }
    }
}

/// Pulls the upstream body back out of a relay error reply.
pub(crate) fn relayed_error_body(body: &Value) -> String {
    match body {
        Value::Object(map) => map
            .get("details")
            .or_else(|| map.get("error"))
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_else(|| body.to_string()),
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl Exchange for RelayExchange {
    async fn exchange(
        &self,
        endpoint: &Endpoint,
        payload: Option<&Value>,
    ) -> Result<Value, TransportError> {
        let envelope = Self::envelope(endpoint, payload);
        let response = self
            .client
            .post(&self.relay_url)
            .header("Content-Type", JSON_CONTENT_TYPE)
            .json(&envelope)
            .send()
            .await
            .map_err(|err| TransportError::Network(format!("relay unreachable: {err}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| TransportError::Relay(err.to_string()))?;
        let body = json_or_text(&text);

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: relayed_error_body(&body),
            });
        }

        Ok(body)
    }
}
