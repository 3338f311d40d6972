//! Authentication utilities for vendor API requests
//!
//! The streaming API uses HTTP Basic authorization with the key exactly as
//! issued (`<encoded user>:<secret>`); it is never re-encoded.

/// Build the `Authorization` header value for an API key
pub fn basic_auth_value(api_key: &str) -> String {
    format!("Basic {}", api_key.trim())
}

/// Add the vendor authorization header to an HTTP request
pub fn add_basic_auth(request: reqwest::RequestBuilder, api_key: &str) -> reqwest::RequestBuilder {
    request.header("Authorization", basic_auth_value(api_key))
}
