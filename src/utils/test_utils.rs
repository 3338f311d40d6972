use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::api::{IceCandidate, IceServer, SessionDescription};
use crate::peer::{ConnectionEvent, IceConnectionState, NegotiationError, PeerConnection, PeerFactory, PeerHandle};
use crate::signaling::{ChannelTarget, RemoteStream, SendReceipt, Signaling, StreamIds};
use crate::transport::{Endpoint, Exchange, TransportError};

pub const SAMPLE_SDP: &str = "v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";

pub fn sample_offer() -> SessionDescription {
    SessionDescription::offer(SAMPLE_SDP)
}

/// Replays canned responses in order and records every request.
/// Once the script runs dry every call answers `Value::Null`.
pub struct ScriptedExchange {
    responses: Mutex<VecDeque<Result<Value, TransportError>>>,
    calls: Mutex<Vec<(Endpoint, Option<Value>)>>,
}

impl ScriptedExchange {
    pub fn new(responses: Vec<Result<Value, TransportError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(Endpoint, Option<Value>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Exchange for ScriptedExchange {
    async fn exchange(
        &self,
        endpoint: &Endpoint,
        payload: Option<&Value>,
    ) -> Result<Value, TransportError> {
        self.calls
            .lock()
            .unwrap()
            .push((endpoint.clone(), payload.cloned()));
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(Value::Null))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalCall {
    CreateStream,
    SubmitAnswer(String),
    /// Candidate line, `None` for end-of-candidates.
    SubmitIce(Option<String>),
    OpenChannel(String),
    SendMessage(String),
    DeleteStream(String),
}

/// In-memory signaling endpoint. Stream `n` is `strm_n` / `sess_n`.
pub struct FakeSignaling {
    calls: Mutex<Vec<SignalCall>>,
    streams: AtomicUsize,
    create_failures: Mutex<VecDeque<TransportError>>,
    send_failures: Mutex<VecDeque<TransportError>>,
    stall_create: AtomicBool,
    offer: Mutex<SessionDescription>,
    chat_id: Mutex<Option<String>>,
    send_duration: Mutex<Option<Duration>>,
}

impl FakeSignaling {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            streams: AtomicUsize::new(0),
            create_failures: Mutex::new(VecDeque::new()),
            send_failures: Mutex::new(VecDeque::new()),
            stall_create: AtomicBool::new(false),
            offer: Mutex::new(sample_offer()),
            chat_id: Mutex::new(None),
            send_duration: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> Vec<SignalCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SignalCall::SendMessage(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn deleted_streams(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SignalCall::DeleteStream(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn fail_next_create(&self, err: TransportError) {
        self.create_failures.lock().unwrap().push_back(err);
    }

    pub fn fail_next_send(&self, err: TransportError) {
        self.send_failures.lock().unwrap().push_back(err);
    }

    /// Create-stream calls never complete from now on.
    pub fn stall_create(&self) {
        self.stall_create.store(true, Ordering::SeqCst);
    }

    pub fn set_offer(&self, offer: SessionDescription) {
        *self.offer.lock().unwrap() = offer;
    }

    pub fn set_chat_id(&self, chat_id: &str) {
        *self.chat_id.lock().unwrap() = Some(chat_id.to_string());
    }

    pub fn set_send_duration(&self, duration: Option<Duration>) {
        *self.send_duration.lock().unwrap() = duration;
    }

    fn record(&self, call: SignalCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Signaling for FakeSignaling {
    async fn create_stream(&self) -> Result<RemoteStream, TransportError> {
        self.record(SignalCall::CreateStream);
        if self.stall_create.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if let Some(err) = self.create_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        let n = self.streams.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(RemoteStream {
            ids: StreamIds {
                stream_id: format!("strm_{n}"),
                session_id: format!("sess_{n}"),
            },
            offer: self.offer.lock().unwrap().clone(),
            ice_servers: Vec::new(),
        })
    }

    async fn submit_answer(
        &self,
        ids: &StreamIds,
        _answer: &SessionDescription,
    ) -> Result<(), TransportError> {
        self.record(SignalCall::SubmitAnswer(ids.stream_id.clone()));
        Ok(())
    }

    async fn submit_ice(
        &self,
        _ids: &StreamIds,
        candidate: Option<&IceCandidate>,
    ) -> Result<(), TransportError> {
        self.record(SignalCall::SubmitIce(
            candidate.map(|candidate| candidate.candidate.clone()),
        ));
        Ok(())
    }

    async fn open_channel(&self, ids: &StreamIds) -> Result<ChannelTarget, TransportError> {
        self.record(SignalCall::OpenChannel(ids.stream_id.clone()));
        Ok(ChannelTarget {
            ids: ids.clone(),
            chat_id: self.chat_id.lock().unwrap().clone(),
        })
    }

    async fn send_message(
        &self,
        _target: &ChannelTarget,
        text: &str,
    ) -> Result<SendReceipt, TransportError> {
        self.record(SignalCall::SendMessage(text.to_string()));
        if let Some(err) = self.send_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(SendReceipt {
            duration: *self.send_duration.lock().unwrap(),
        })
    }

    async fn delete_stream(&self, ids: &StreamIds) -> Result<(), TransportError> {
        self.record(SignalCall::DeleteStream(ids.stream_id.clone()));
        Ok(())
    }
}

/// Peer whose events are pushed by the test.
pub struct ScriptedPeer {
    events: mpsc::UnboundedSender<ConnectionEvent>,
    auto_connect: bool,
    remote_offer: Mutex<Option<SessionDescription>>,
    closes: AtomicUsize,
}

impl ScriptedPeer {
    pub fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }

    pub fn emit_state(&self, state: IceConnectionState) {
        self.emit(ConnectionEvent::IceStateChange(state));
    }

    pub fn remote_offer(&self) -> Option<SessionDescription> {
        self.remote_offer.lock().unwrap().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerConnection for ScriptedPeer {
    async fn set_remote_offer(&self, offer: &SessionDescription) -> Result<(), NegotiationError> {
        *self.remote_offer.lock().unwrap() = Some(offer.clone());
        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        if self.auto_connect {
            self.emit(ConnectionEvent::IceCandidate(Some(IceCandidate {
                candidate: "candidate:1 1 udp 2122260223 192.0.2.1 50000 typ host".to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
            })));
            self.emit(ConnectionEvent::IceCandidate(None));
            self.emit_state(IceConnectionState::Checking);
            self.emit_state(IceConnectionState::Connected);
        }
        Ok(SessionDescription::answer(SAMPLE_SDP))
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out [`ScriptedPeer`]s and keeps them so tests can drive them.
pub struct ScriptedPeerFactory {
    auto_connect: AtomicBool,
    peers: Mutex<Vec<Arc<ScriptedPeer>>>,
}

impl ScriptedPeerFactory {
    /// Peers stay silent until the test emits events.
    pub fn manual() -> Self {
        Self {
            auto_connect: AtomicBool::new(false),
            peers: Mutex::new(Vec::new()),
        }
    }

    /// Peers report a gathered candidate and `Connected` as soon as the answer exists.
    pub fn auto_connect() -> Self {
        let factory = Self::manual();
        factory.set_auto_connect(true);
        factory
    }

    pub fn set_auto_connect(&self, enabled: bool) {
        self.auto_connect.store(enabled, Ordering::SeqCst);
    }

    pub fn created(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    pub fn peer(&self, index: usize) -> Arc<ScriptedPeer> {
        self.peers.lock().unwrap()[index].clone()
    }

    pub fn last_peer(&self) -> Arc<ScriptedPeer> {
        let peers = self.peers.lock().unwrap();
        peers[peers.len() - 1].clone()
    }
}

#[async_trait]
impl PeerFactory for ScriptedPeerFactory {
    async fn create(&self, _ice_servers: &[IceServer]) -> Result<PeerHandle, NegotiationError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let peer = Arc::new(ScriptedPeer {
            events: tx,
            auto_connect: self.auto_connect.load(Ordering::SeqCst),
            remote_offer: Mutex::new(None),
            closes: AtomicUsize::new(0),
        });
        self.peers.lock().unwrap().push(peer.clone());
        Ok(PeerHandle {
            connection: peer,
            events: rx,
        })
    }
}
