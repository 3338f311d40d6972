//! Same-origin forwarding endpoint.
//!
//! Accepts `{path, method, headers, body}` envelopes, adds the vendor
//! credential and replays them against the vendor API, handing the upstream
//! status and body back unchanged. Clients that cannot hold the key (or call
//! the vendor cross-origin) point `api.relay_url` here.

use std::error::Error;
use std::net::SocketAddr;

use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::api::RelayRequest;
use crate::core::constants::RELAY_PATH;
use crate::transport::http::JSON_CONTENT_TYPE;
use crate::utils::auth::basic_auth_value;
use crate::utils::url::construct_api_url;

#[derive(Clone)]
pub struct RelayState {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl RelayState {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, api_key)
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RelayBody {
    Json(Value),
    Text(String),
}

/// What the endpoint answers for one envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayReply {
    pub status: u16,
    pub body: RelayBody,
}

impl RelayReply {
    fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: RelayBody::Json(json!({ "error": message.into() })),
        }
    }
}

impl IntoResponse for RelayReply {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::BAD_GATEWAY);
        match self.body {
            RelayBody::Json(value) => (status, Json(value)).into_response(),
            RelayBody::Text(text) => (status, text).into_response(),
        }
    }
}

fn outgoing_headers(api_key: &str, extra: &std::collections::HashMap<String, String>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&basic_auth_value(api_key)) {
        headers.insert(AUTHORIZATION, value);
    }
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));

    // Caller headers are applied last and replace the defaults.
    for (name, value) in extra {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(header = %name, "dropping unusable relay header"),
        }
    }
    headers
}

/// Replays one envelope against the vendor API.
pub async fn forward(state: &RelayState, request: RelayRequest) -> RelayReply {
    let Some(api_key) = state.api_key.as_deref() else {
        return RelayReply::error(500, "API key missing");
    };
    let path = match request.path.as_deref() {
        Some(path) if path.starts_with('/') => path,
        _ => return RelayReply::error(400, "Path required"),
    };
    let method = match reqwest::Method::from_bytes(request.method.to_ascii_uppercase().as_bytes()) {
        Ok(method) => method,
        Err(_) => return RelayReply::error(400, format!("Unsupported method: {}", request.method)),
    };

    let url = construct_api_url(&state.base_url, path);
    debug!(%method, %url, "relaying");

    let mut builder = state
        .client
        .request(method.clone(), &url)
        .headers(outgoing_headers(api_key, &request.headers));
    if method != reqwest::Method::GET {
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
    }

    let response = match builder.send().await {
        Ok(response) => response,
        Err(err) => {
            warn!(%url, error = %err, "relay upstream unreachable");
            return RelayReply::error(502, err.to_string());
        }
    };

    let status = response.status().as_u16();
    let text = match response.text().await {
        Ok(text) => text,
        Err(err) => return RelayReply::error(502, err.to_string()),
    };

    if !(200..300).contains(&status) {
        info!(status, %url, "upstream returned an error");
        return RelayReply {
            status,
            body: RelayBody::Json(json!({
                "error": format!("Upstream error: {status}"),
                "details": text,
            })),
        };
    }

    RelayReply {
        status,
        body: classify_body(text),
    }
}

/// JSON when the body parses as JSON (string literals included), raw text
/// otherwise. Empty bodies stay empty.
fn classify_body(text: String) -> RelayBody {
    match serde_json::from_str::<Value>(&text) {
        Ok(value) => RelayBody::Json(value),
        Err(_) => RelayBody::Text(text),
    }
}

async fn relay(
    Extension(state): Extension<RelayState>,
    Json(request): Json<RelayRequest>,
) -> RelayReply {
    forward(&state, request).await
}

pub fn health_body() -> Value {
    json!({
        "status": "OK",
        "message": "talkhead relay is running",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })
}

async fn health() -> Json<Value> {
    Json(health_body())
}

async fn fallback(uri: Uri) -> (StatusCode, String) {
    (StatusCode::NOT_FOUND, format!("No route for {uri}"))
}

pub fn router(state: RelayState) -> Router {
    Router::new()
        .route(RELAY_PATH, post(relay))
        .route("/health", get(health))
        .fallback(fallback)
        .layer(Extension(state))
}

/// Serves until Ctrl+C.
pub async fn serve(state: RelayState, listen: SocketAddr) -> Result<(), Box<dyn Error>> {
    let server = axum::Server::try_bind(&listen)?.serve(router(state).into_make_service());
    info!(addr = %server.local_addr(), path = RELAY_PATH, "relay listening");

    let graceful = server.with_graceful_shutdown(async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "no Ctrl+C handler; relay runs until killed");
            std::future::pending::<()>().await;
        }
    });
    graceful.await?;
    info!("relay stopped");
    Ok(())
}
