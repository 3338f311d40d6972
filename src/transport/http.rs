use async_trait::async_trait;
use serde_json::Value;

use super::{Endpoint, Exchange, Method, TransportError};
use crate::api::json_or_text;
use crate::utils::auth::add_basic_auth;
use crate::utils::url::construct_api_url;

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Calls the vendor API directly.
pub struct DirectExchange {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl DirectExchange {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    pub(crate) fn build_request(
        &self,
        endpoint: &Endpoint,
        payload: Option<&Value>,
    ) -> reqwest::RequestBuilder {
        let url = construct_api_url(&self.base_url, &endpoint.path);
        let request = match endpoint.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
            Method::Delete => self.client.delete(url),
        };
        let request = add_basic_auth(request, &self.api_key)
            .header("Accept", JSON_CONTENT_TYPE)
            .header("Content-Type", JSON_CONTENT_TYPE);

        match payload {
            Some(body) => request.json(body),
            None => request,
        }
    }
}

#[async_trait]
impl Exchange for DirectExchange {
    async fn exchange(
        &self,
        endpoint: &Endpoint,
        payload: Option<&Value>,
    ) -> Result<Value, TransportError> {
        let response = self.build_request(endpoint, payload).send().await?;
        let status = response.status();
        let body = response.text().await;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: body.unwrap_or_else(|_| "<no body>".to_string()),
            });
        }

        // A body cut off mid-read is a network fault, so it stays retryable.
        let text = body.map_err(|err| {
            TransportError::Network(format!("response body unreadable: {err}"))
        })?;
        Ok(json_or_text(&text))
    }
}
