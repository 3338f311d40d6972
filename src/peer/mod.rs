//! Peer connection abstraction and the controller that drives one link.
//!
//! The session manager never touches a WebRTC stack directly. It asks a
//! [`PeerFactory`] for a fresh [`PeerConnection`] plus its event stream, and
//! a [`PeerController`] turns that into the open/close contract: remote offer
//! in, local answer out, local candidates trickled to signaling in order,
//! every [`ConnectionEvent`] handed to the registered observer exactly once.

use async_trait::async_trait;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::{IceCandidate, IceServer, SdpKind, SessionDescription};
use crate::signaling::{Signaling, StreamIds};

#[cfg(feature = "webrtc")]
pub mod rtc;

/// ICE connection state as reported by the underlying stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl IceConnectionState {
    pub fn is_up(self) -> bool {
        matches!(self, IceConnectionState::Connected | IceConnectionState::Completed)
    }

    pub fn is_lost(self) -> bool {
        matches!(self, IceConnectionState::Disconnected | IceConnectionState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub kind: String,
    pub id: String,
}

/// Transient notification from a peer link. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// A locally gathered candidate; `None` once gathering is complete.
    IceCandidate(Option<IceCandidate>),
    IceStateChange(IceConnectionState),
    Track(TrackInfo),
    SdpAnswerReady(SessionDescription),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    MalformedOffer(String),
    Stack(String),
    /// The controller was closed while the link was being opened.
    Closed,
}

impl fmt::Display for NegotiationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NegotiationError::MalformedOffer(reason) => write!(f, "malformed remote offer: {reason}"),
            NegotiationError::Stack(reason) => write!(f, "peer connection error: {reason}"),
            NegotiationError::Closed => write!(f, "peer link closed during negotiation"),
        }
    }
}

impl StdError for NegotiationError {}

#[async_trait]
/// One underlying peer connection.
pub trait PeerConnection: Send + Sync {
    async fn set_remote_offer(&self, offer: &SessionDescription) -> Result<(), NegotiationError>;

    /// Creates the local answer and applies it as the local description.
    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError>;

    async fn close(&self);
}

/// A fresh connection and the receiving half of its event subscription.
pub struct PeerHandle {
    pub connection: Arc<dyn PeerConnection>,
    pub events: mpsc::UnboundedReceiver<ConnectionEvent>,
}

#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create(&self, ice_servers: &[IceServer]) -> Result<PeerHandle, NegotiationError>;
}

/// Receives every event of the link it was registered on, in generation order.
pub type EventObserver = Arc<dyn Fn(ConnectionEvent) + Send + Sync>;

/// Rejects offers that can not possibly be applied.
pub fn validate_offer(offer: &SessionDescription) -> Result<(), NegotiationError> {
    if offer.kind != SdpKind::Offer {
        return Err(NegotiationError::MalformedOffer(format!(
            "expected an offer, got {:?}",
            offer.kind
        )));
    }
    if !offer.sdp.trim_start().starts_with("v=") {
        return Err(NegotiationError::MalformedOffer(
            "SDP does not start with a version line".to_string(),
        ));
    }
    Ok(())
}

/// Owns at most one peer connection. Cloning shares the same link, so a
/// handshake task can open it while the session manager keeps the power to
/// close it.
#[derive(Clone)]
pub struct PeerController {
    factory: Arc<dyn PeerFactory>,
    connection: Arc<Mutex<Option<Arc<dyn PeerConnection>>>>,
    cancel: CancellationToken,
}

impl PeerController {
    pub fn new(factory: Arc<dyn PeerFactory>) -> Self {
        Self {
            factory,
            connection: Arc::new(Mutex::new(None)),
            cancel: CancellationToken::new(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Create the connection, apply the remote offer and return the local answer.
    ///
    /// Local candidates are posted to `signaling` for `ids` one at a time in
    /// generation order; the end-of-candidates signal goes out once.
    pub async fn open(
        &self,
        offer: &SessionDescription,
        ice_servers: &[IceServer],
        signaling: Arc<dyn Signaling>,
        ids: StreamIds,
        observer: EventObserver,
    ) -> Result<SessionDescription, NegotiationError> {
        validate_offer(offer)?;
        if self.is_closed() {
            return Err(NegotiationError::Closed);
        }

        let PeerHandle { connection, events } = self.factory.create(ice_servers).await?;
        {
            let mut slot = self.connection.lock().await;
            if self.is_closed() {
                drop(slot);
                connection.close().await;
                return Err(NegotiationError::Closed);
            }
            if let Some(previous) = slot.replace(connection.clone()) {
                previous.close().await;
            }
        }

        let candidates = spawn_trickle(signaling, ids, self.cancel.clone());
        spawn_event_pump(events, candidates, observer.clone(), self.cancel.clone());

        connection.set_remote_offer(offer).await?;
        let answer = connection.create_answer().await?;
        debug!("Local answer created");
        observer(ConnectionEvent::SdpAnswerReady(answer.clone()));
        Ok(answer)
    }

    /// Release the link. Safe on a never-opened or already-closed controller.
    pub async fn close(&self) {
        self.cancel.cancel();
        let connection = self.connection.lock().await.take();
        if let Some(connection) = connection {
            debug!("Closing peer connection");
            connection.close().await;
        }
    }
}

fn spawn_event_pump(
    mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
    candidates: mpsc::UnboundedSender<Option<IceCandidate>>,
    observer: EventObserver,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            if let ConnectionEvent::IceCandidate(candidate) = &event {
                let _ = candidates.send(candidate.clone());
            }
            observer(event);
        }
    });
}

/// Posts candidates strictly one after another. Runs apart from the event
/// pump so slow signaling never delays connection-state events.
fn spawn_trickle(
    signaling: Arc<dyn Signaling>,
    ids: StreamIds,
    cancel: CancellationToken,
) -> mpsc::UnboundedSender<Option<IceCandidate>> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Option<IceCandidate>>();
    tokio::spawn(async move {
        let mut gathering_done = false;
        loop {
            let candidate = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = rx.recv() => match next {
                    Some(candidate) => candidate,
                    None => break,
                },
            };
            match candidate {
                Some(candidate) => {
                    if gathering_done {
                        debug!("Ignoring candidate gathered after end-of-candidates");
                        continue;
                    }
                    if let Err(err) = signaling.submit_ice(&ids, Some(&candidate)).await {
                        warn!(stream_id = %ids.stream_id, error = %err, "Failed to send ICE candidate");
                    }
                }
                None => {
                    if std::mem::replace(&mut gathering_done, true) {
                        continue;
                    }
                    debug!(stream_id = %ids.stream_id, "ICE gathering complete");
                    if let Err(err) = signaling.submit_ice(&ids, None).await {
                        warn!(stream_id = %ids.stream_id, error = %err, "Failed to send end-of-candidates");
                    }
                }
            }
        }
    });
    tx
}
