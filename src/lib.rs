//! talkhead drives a real-time talking avatar over WebRTC.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the session state machine, the ordered message dispatcher
//!   and the [`core::avatar::Avatar`] handle callers hold, plus configuration
//!   and credential storage.
//! - [`peer`] wraps the WebRTC peer connection: offer/answer negotiation and
//!   trickled ICE. A real backend lives behind the `webrtc` feature.
//! - [`signaling`] sequences the vendor's streaming endpoints (create stream,
//!   submit answer, ICE, send message, delete).
//! - [`transport`] performs the HTTP calls, directly or through the
//!   forwarding endpoint, with retry and backoff.
//! - [`relay`] is that forwarding endpoint as an HTTP service.
//! - [`api`] defines the wire payloads.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
pub mod peer;
pub mod relay;
pub mod signaling;
pub mod transport;
pub mod utils;
