//! Transport client shared by every signaling call.
//!
//! An [`Exchange`] performs exactly one request/response round trip, either
//! straight to the vendor ([`http::DirectExchange`]) or through a same-origin
//! forwarding endpoint ([`relay::RelayExchange`]). [`TransportClient`] layers
//! the retry/backoff policy on top so callers never see which one is in use.

use async_trait::async_trait;
use serde_json::Value;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub mod http;
pub mod relay;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Vendor-relative request target, e.g. `POST /talks/streams`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub method: Method,
    pub path: String,
}

impl Endpoint {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
        }
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            method: Method::Delete,
            path: path.into(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// Failures surfaced by a single exchange or by an exhausted retry loop.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportError {
    /// The remote (or the relay on its behalf) answered with a non-2xx status.
    Status { status: u16, body: String },
    /// The request never produced a response.
    Network(String),
    /// A 2xx response whose body did not have the expected shape.
    Decode(String),
    /// The forwarding endpoint itself could not be used.
    Relay(String),
}

impl TransportError {
    /// Validation failures (4xx other than 429) and undecodable bodies are
    /// returned immediately; everything else is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Status { status, .. } => {
                *status == 429 || !(400..500).contains(status)
            }
            TransportError::Network(_) | TransportError::Relay(_) => true,
            TransportError::Decode(_) => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Status { status, body } if body.trim().is_empty() => {
                write!(f, "HTTP {status}")
            }
            TransportError::Status { status, body } => write!(f, "HTTP {status}: {}", body.trim()),
            TransportError::Network(msg) => write!(f, "network error: {msg}"),
            TransportError::Decode(msg) => write!(f, "unexpected response: {msg}"),
            TransportError::Relay(msg) => write!(f, "relay error: {msg}"),
        }
    }
}

impl StdError for TransportError {}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            TransportError::Decode(err.to_string())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

#[async_trait]
/// One request/response round trip, no retries.
pub trait Exchange: Send + Sync {
    async fn exchange(&self, endpoint: &Endpoint, payload: Option<&Value>)
        -> Result<Value, TransportError>;
}

/// Exponential backoff: attempt `n` (zero based) waits `base * 2^n` before the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_base: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base,
        }
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.backoff_base.saturating_mul(factor)
    }
}

/// Retrying front for an [`Exchange`]. Stateless across calls; cheap to clone.
#[derive(Clone)]
pub struct TransportClient {
    exchange: Arc<dyn Exchange>,
    policy: RetryPolicy,
}

impl TransportClient {
    pub fn new(exchange: Arc<dyn Exchange>, policy: RetryPolicy) -> Self {
        Self { exchange, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub async fn call(
        &self,
        endpoint: &Endpoint,
        payload: Option<&Value>,
    ) -> Result<Value, TransportError> {
        let mut attempt = 0;
        loop {
            debug!(%endpoint, attempt = attempt + 1, max = self.policy.max_attempts, "Transport call");
            match self.exchange.exchange(endpoint, payload).await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => {
                    debug!(%endpoint, error = %err, "Transport call failed, not retryable");
                    return Err(err);
                }
                Err(err) if attempt + 1 >= self.policy.max_attempts => {
                    warn!(%endpoint, attempts = attempt + 1, error = %err, "Transport retries exhausted");
                    return Err(err);
                }
                Err(err) => {
                    let wait = self.policy.delay_after(attempt);
                    debug!(
                        %endpoint,
                        attempt = attempt + 1,
                        wait_ms = wait.as_millis() as u64,
                        error = %err,
                        "Transport call failed, backing off"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }
}
