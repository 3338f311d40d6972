//! URL utilities for consistent endpoint construction
//!
//! Base URLs come from user configuration and may carry trailing slashes;
//! vendor ids are opaque strings that end up inside request paths.

/// Normalize a base URL by removing trailing slashes
///
/// # Examples
///
/// ```
/// use talkhead::utils::url::normalize_base_url;
///
/// assert_eq!(normalize_base_url("https://api.d-id.com/"), "https://api.d-id.com");
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// Join a base URL and an endpoint path without doubling or dropping slashes
///
/// # Examples
///
/// ```
/// use talkhead::utils::url::construct_api_url;
///
/// assert_eq!(
///     construct_api_url("https://api.d-id.com/", "/talks/streams"),
///     "https://api.d-id.com/talks/streams"
/// );
/// ```
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    let normalized_base = normalize_base_url(base_url);
    let endpoint = endpoint.trim_start_matches('/');
    format!("{}/{}", normalized_base, endpoint)
}

/// Percent-encode a single path segment
///
/// Remote-assigned stream, agent and chat ids are spliced into paths, so
/// anything outside the RFC 3986 unreserved set is escaped.
pub fn encode_segment(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}
