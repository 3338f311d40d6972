//! Session lifecycle state machine.
//!
//! [`SessionManager`] owns every piece of mutable session state and is only
//! ever driven from the avatar's actor task, one input at a time. Network
//! calls, peer events and timers run elsewhere and report back as [`Input`]s
//! tagged with the epoch they were started under; anything tagged with an
//! older epoch belongs to a torn-down session and is dropped.

use chrono::{DateTime, Utc};
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::constants::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_AUTO_RECONNECTS, DEFAULT_RECONNECT_DELAY};
use super::dispatcher::{
    Dispatcher, MessageId, MessageIds, PendingMessage, PlaybackEstimate, PlaybackOutcome,
    PlayedMessage,
};
use crate::peer::{ConnectionEvent, EventObserver, NegotiationError, PeerController, PeerFactory};
use crate::signaling::{ChannelTarget, SendReceipt, Signaling, StreamIds};
use crate::transport::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Connecting,
    AwaitingAnswer,
    Connected,
    Disconnected,
    Failed,
}

impl SessionState {
    pub fn name(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::AwaitingAnswer => "awaiting-answer",
            SessionState::Connected => "connected",
            SessionState::Disconnected => "disconnected",
            SessionState::Failed => "failed",
        }
    }

    /// Covered by the connection-establishment timeout.
    pub fn is_establishing(self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::AwaitingAnswer)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reason attached to a transition into `Failed`.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// A signaling call failed after its retries were used up.
    Transport(TransportError),
    Negotiation(NegotiationError),
    /// The link was not up within the connection timeout.
    Timeout(Duration),
    /// Automatic reconnects ran out; only a manual reconnect continues.
    Exhausted { attempts: u32 },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Transport(err) => write!(f, "signaling failed: {err}"),
            SessionError::Negotiation(err) => write!(f, "negotiation failed: {err}"),
            SessionError::Timeout(bound) => {
                write!(f, "connection not established within {}s", bound.as_secs())
            }
            SessionError::Exhausted { attempts } => {
                write!(f, "gave up after {attempts} automatic reconnect attempts")
            }
        }
    }
}

impl StdError for SessionError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            SessionError::Transport(err) => Some(err),
            SessionError::Negotiation(err) => Some(err),
            SessionError::Timeout(_) | SessionError::Exhausted { .. } => None,
        }
    }
}

/// Delivered on every state transition.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub previous: SessionState,
    pub state: SessionState,
    pub error: Option<SessionError>,
    pub retry_count: u32,
}

/// The remote half of one negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub ids: StreamIds,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub retry_count: u32,
    pub session_id: Option<String>,
    pub stream_id: Option<String>,
    pub pending: usize,
    pub created_at: Option<DateTime<Utc>>,
    pub last_transition_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub connect_timeout: Duration,
    pub reconnect_delay: Duration,
    pub max_auto_reconnects: u32,
    /// Spoken once, ahead of the queue, the first time the link is ready.
    pub greeting: Option<String>,
    pub playback: PlaybackEstimate,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_auto_reconnects: DEFAULT_MAX_AUTO_RECONNECTS,
            greeting: None,
            playback: PlaybackEstimate::default(),
        }
    }
}

pub type PlayedCallback = Box<dyn FnMut(&PlayedMessage) + Send>;
pub type StateCallback = Box<dyn FnMut(&StateChange) + Send>;

/// Caller requests, forwarded by the `Avatar` handle.
pub(crate) enum Command {
    Initialize,
    Speak(PendingMessage),
    Reconnect,
    Close(oneshot::Sender<()>),
    OnPlayed(PlayedCallback),
    OnStateChange(StateCallback),
    Snapshot(oneshot::Sender<SessionSnapshot>),
    RearmGreeting,
}

#[derive(Debug)]
pub(crate) enum HandshakeStep {
    StreamCreated(StreamIds),
    AnswerSubmitted,
    ChannelOpened(ChannelTarget),
    Failed(SessionError),
}

/// Results of work running outside the actor.
#[derive(Debug)]
pub(crate) enum Input {
    Handshake {
        epoch: u64,
        step: HandshakeStep,
    },
    Peer {
        epoch: u64,
        event: ConnectionEvent,
    },
    ConnectTimedOut {
        epoch: u64,
    },
    ReconnectDue {
        epoch: u64,
    },
    MessageSent {
        epoch: u64,
        id: MessageId,
        result: Result<SendReceipt, TransportError>,
    },
    PlaybackElapsed {
        epoch: u64,
        id: MessageId,
    },
}

/// What is left of a torn-down link, released off the actor task.
struct Residual {
    link: Option<PeerController>,
    ids: Option<StreamIds>,
}

impl Residual {
    async fn release(self, signaling: Arc<dyn Signaling>) {
        if let Some(link) = self.link {
            link.close().await;
        }
        if let Some(ids) = self.ids {
            delete_quietly(signaling.as_ref(), &ids).await;
        }
    }
}

async fn delete_quietly(signaling: &dyn Signaling, ids: &StreamIds) {
    match signaling.delete_stream(ids).await {
        Ok(()) => debug!(stream_id = %ids.stream_id, "Remote stream released"),
        Err(err) => warn!(stream_id = %ids.stream_id, error = %err, "Failed to release remote stream"),
    }
}

fn spawn_timer(
    inputs: mpsc::UnboundedSender<Input>,
    cancel: CancellationToken,
    delay: Duration,
    input: Input,
) {
    tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(delay) => {
                let _ = inputs.send(input);
            }
        }
    });
}

/// Create stream, open the local link, submit the answer, open the channel.
/// Each step is reported as it completes; the first failure ends the run.
async fn run_handshake(
    epoch: u64,
    signaling: Arc<dyn Signaling>,
    link: PeerController,
    inputs: mpsc::UnboundedSender<Input>,
) {
    let post = |step: HandshakeStep| {
        let _ = inputs.send(Input::Handshake { epoch, step });
    };

    let stream = match signaling.create_stream().await {
        Ok(stream) => stream,
        Err(err) => return post(HandshakeStep::Failed(SessionError::Transport(err))),
    };
    post(HandshakeStep::StreamCreated(stream.ids.clone()));

    let peer_inputs = inputs.clone();
    let observer: EventObserver = Arc::new(move |event| {
        let _ = peer_inputs.send(Input::Peer { epoch, event });
    });
    let answer = match link
        .open(
            &stream.offer,
            &stream.ice_servers,
            signaling.clone(),
            stream.ids.clone(),
            observer,
        )
        .await
    {
        Ok(answer) => answer,
        Err(err) => return post(HandshakeStep::Failed(SessionError::Negotiation(err))),
    };

    if let Err(err) = signaling.submit_answer(&stream.ids, &answer).await {
        return post(HandshakeStep::Failed(SessionError::Transport(err)));
    }
    post(HandshakeStep::AnswerSubmitted);

    match signaling.open_channel(&stream.ids).await {
        Ok(target) => post(HandshakeStep::ChannelOpened(target)),
        Err(err) => post(HandshakeStep::Failed(SessionError::Transport(err))),
    }
}

pub(crate) struct SessionManager {
    settings: SessionSettings,
    signaling: Arc<dyn Signaling>,
    peers: Arc<dyn PeerFactory>,
    ids: MessageIds,
    inputs: mpsc::UnboundedSender<Input>,

    state: SessionState,
    epoch: u64,
    retry_count: u32,
    last_transition_at: DateTime<Utc>,
    session: Option<Session>,
    channel: Option<ChannelTarget>,
    link: Option<PeerController>,
    /// ICE reported connected/completed for the current link.
    link_up: bool,
    cancel: CancellationToken,
    connect_timer: Option<CancellationToken>,

    dispatcher: Dispatcher,
    played_callbacks: Vec<PlayedCallback>,
    state_callbacks: Vec<StateCallback>,
}

impl SessionManager {
    pub(crate) fn new(
        settings: SessionSettings,
        signaling: Arc<dyn Signaling>,
        peers: Arc<dyn PeerFactory>,
        ids: MessageIds,
        inputs: mpsc::UnboundedSender<Input>,
    ) -> Self {
        Self {
            settings,
            signaling,
            peers,
            ids,
            inputs,
            state: SessionState::Idle,
            epoch: 0,
            retry_count: 0,
            last_transition_at: Utc::now(),
            session: None,
            channel: None,
            link: None,
            link_up: false,
            cancel: CancellationToken::new(),
            connect_timer: None,
            dispatcher: Dispatcher::new(),
            played_callbacks: Vec::new(),
            state_callbacks: Vec::new(),
        }
    }

    pub(crate) fn handle_command(&mut self, command: Command) {
        match command {
            Command::Initialize => {
                if self.state == SessionState::Idle {
                    self.retry_count = 0;
                    self.start_connecting();
                } else {
                    debug!(state = %self.state, "Initialize ignored; session already started");
                }
            }
            Command::Speak(message) => {
                debug!(id = message.id, state = %self.state, "Message accepted");
                self.dispatcher.enqueue(message);
                self.pump();
            }
            Command::Reconnect => {
                info!(state = %self.state, "Manual reconnect requested");
                self.retry_count = 0;
                self.start_connecting();
            }
            Command::Close(reply) => self.close(Some(reply)),
            Command::OnPlayed(callback) => self.played_callbacks.push(callback),
            Command::OnStateChange(callback) => self.state_callbacks.push(callback),
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::RearmGreeting => self.dispatcher.rearm_greeting(),
        }
    }

    pub(crate) fn handle(&mut self, input: Input) {
        match input {
            Input::Handshake { epoch, step } => self.on_handshake(epoch, step),
            Input::Peer { epoch, event } => {
                if epoch == self.epoch {
                    self.on_peer_event(event);
                }
            }
            Input::ConnectTimedOut { epoch } => {
                if epoch == self.epoch && self.state.is_establishing() {
                    self.fail(SessionError::Timeout(self.settings.connect_timeout));
                }
            }
            Input::ReconnectDue { epoch } => {
                if epoch == self.epoch && self.state == SessionState::Disconnected {
                    info!(retry_count = self.retry_count, "Automatic reconnect");
                    self.start_connecting();
                }
            }
            Input::MessageSent { epoch, id, result } => self.on_message_sent(epoch, id, result),
            Input::PlaybackElapsed { epoch, id } => {
                if epoch != self.epoch {
                    return;
                }
                if let Some(message) = self.dispatcher.finish_playing(id) {
                    self.notify_played(message, PlaybackOutcome::Played);
                }
            }
        }
    }

    /// Final teardown when every handle is gone.
    pub(crate) fn shutdown(&mut self) {
        self.close(None);
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            retry_count: self.retry_count,
            session_id: self.session.as_ref().map(|s| s.ids.session_id.clone()),
            stream_id: self.session.as_ref().map(|s| s.ids.stream_id.clone()),
            pending: self.dispatcher.pending(),
            created_at: self.session.as_ref().map(|s| s.created_at),
            last_transition_at: self.last_transition_at,
        }
    }

    fn transition(&mut self, next: SessionState, error: Option<SessionError>) {
        let previous = std::mem::replace(&mut self.state, next);
        self.last_transition_at = Utc::now();
        match &error {
            Some(err) => warn!(from = %previous, to = %next, epoch = self.epoch, error = %err, "Session state changed"),
            None => info!(from = %previous, to = %next, epoch = self.epoch, retry_count = self.retry_count, "Session state changed"),
        }
        let change = StateChange {
            previous,
            state: next,
            error,
            retry_count: self.retry_count,
        };
        for callback in self.state_callbacks.iter_mut() {
            callback(&change);
        }
    }

    fn notify_played(&mut self, message: PendingMessage, outcome: PlaybackOutcome) {
        debug!(id = message.id, outcome = %outcome, "Message finished");
        let played = PlayedMessage {
            id: message.id,
            text: message.text,
            outcome,
        };
        for callback in self.played_callbacks.iter_mut() {
            callback(&played);
        }
    }

    /// Detach from the current link: cancel its timers, invalidate its
    /// in-flight results and report cut-off messages. The queue survives.
    fn release(&mut self) -> Residual {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
        self.connect_timer = None;
        self.epoch += 1;
        self.link_up = false;
        self.channel = None;
        for message in self.dispatcher.interrupt() {
            self.notify_played(message, PlaybackOutcome::Interrupted);
        }
        Residual {
            link: self.link.take(),
            ids: self.session.take().map(|session| session.ids),
        }
    }

    fn teardown(&mut self) {
        let residual = self.release();
        tokio::spawn(residual.release(self.signaling.clone()));
    }

    fn start_connecting(&mut self) {
        self.teardown();
        self.transition(SessionState::Connecting, None);

        let link = PeerController::new(self.peers.clone());
        self.link = Some(link.clone());

        let timer = self.cancel.child_token();
        self.connect_timer = Some(timer.clone());
        spawn_timer(
            self.inputs.clone(),
            timer,
            self.settings.connect_timeout,
            Input::ConnectTimedOut { epoch: self.epoch },
        );

        tokio::spawn(run_handshake(
            self.epoch,
            self.signaling.clone(),
            link,
            self.inputs.clone(),
        ));
    }

    fn fail(&mut self, err: SessionError) {
        self.teardown();
        self.transition(SessionState::Failed, Some(err));
    }

    fn close(&mut self, reply: Option<oneshot::Sender<()>>) {
        let residual = self.release();
        for message in self.dispatcher.drain_queue() {
            self.notify_played(message, PlaybackOutcome::Discarded);
        }
        self.retry_count = 0;
        if self.state != SessionState::Idle {
            self.transition(SessionState::Idle, None);
        }
        let signaling = self.signaling.clone();
        tokio::spawn(async move {
            residual.release(signaling).await;
            if let Some(reply) = reply {
                let _ = reply.send(());
            }
        });
    }

    fn cancel_connect_timer(&mut self) {
        if let Some(timer) = self.connect_timer.take() {
            timer.cancel();
        }
    }

    fn on_handshake(&mut self, epoch: u64, step: HandshakeStep) {
        if epoch != self.epoch {
            if let HandshakeStep::StreamCreated(ids) = step {
                debug!(stream_id = %ids.stream_id, "Releasing stream created for a torn-down session");
                let signaling = self.signaling.clone();
                tokio::spawn(async move { delete_quietly(signaling.as_ref(), &ids).await });
            }
            return;
        }

        match step {
            HandshakeStep::StreamCreated(ids) => {
                debug!(stream_id = %ids.stream_id, session_id = %ids.session_id, "Remote session created");
                self.session = Some(Session {
                    ids,
                    created_at: Utc::now(),
                });
            }
            HandshakeStep::AnswerSubmitted => {
                if self.state == SessionState::Connecting {
                    self.transition(SessionState::AwaitingAnswer, None);
                    if self.link_up {
                        self.enter_connected();
                    }
                }
            }
            HandshakeStep::ChannelOpened(target) => {
                debug!(chat_id = ?target.chat_id, "Message channel open");
                self.channel = Some(target);
                if self.state == SessionState::Connected {
                    self.on_ready();
                }
            }
            HandshakeStep::Failed(err) => match self.state {
                SessionState::Connecting | SessionState::AwaitingAnswer | SessionState::Connected => {
                    self.fail(err)
                }
                _ => debug!(state = %self.state, error = %err, "Handshake failure ignored"),
            },
        }
    }

    fn on_peer_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::IceStateChange(ice) => {
                debug!(ice = ?ice, state = %self.state, "ICE connection state");
                if ice.is_up() {
                    self.link_up = true;
                    if self.state == SessionState::AwaitingAnswer {
                        self.enter_connected();
                    }
                } else if ice.is_lost() {
                    self.link_up = false;
                    if matches!(self.state, SessionState::AwaitingAnswer | SessionState::Connected) {
                        self.on_link_lost();
                    }
                }
            }
            ConnectionEvent::Track(track) => {
                info!(kind = %track.kind, id = %track.id, "Remote media track attached");
            }
            ConnectionEvent::IceCandidate(candidate) => {
                debug!(end_of_candidates = candidate.is_none(), "Local ICE candidate");
            }
            ConnectionEvent::SdpAnswerReady(_) => debug!("Local answer ready"),
        }
    }

    fn enter_connected(&mut self) {
        self.cancel_connect_timer();
        self.retry_count = 0;
        self.transition(SessionState::Connected, None);
        if self.channel.is_some() {
            self.on_ready();
        }
    }

    fn on_link_lost(&mut self) {
        self.cancel_connect_timer();
        if self.retry_count < self.settings.max_auto_reconnects {
            self.retry_count += 1;
            self.transition(SessionState::Disconnected, None);
            spawn_timer(
                self.inputs.clone(),
                self.cancel.child_token(),
                self.settings.reconnect_delay,
                Input::ReconnectDue { epoch: self.epoch },
            );
        } else {
            self.transition(SessionState::Disconnected, None);
            let attempts = self.retry_count;
            self.fail(SessionError::Exhausted { attempts });
        }
    }

    /// Connected with an open channel: greet once, then drain the queue.
    fn on_ready(&mut self) {
        if !self.dispatcher.has_greeted() {
            if let Some(greeting) = self.settings.greeting.clone() {
                self.dispatcher
                    .greet(PendingMessage::new(self.ids.next(), greeting));
            }
        }
        self.pump();
    }

    fn pump(&mut self) {
        if self.state != SessionState::Connected {
            return;
        }
        let Some(target) = self.channel.clone() else {
            return;
        };
        let Some(message) = self.dispatcher.begin_send() else {
            return;
        };

        let epoch = self.epoch;
        let signaling = self.signaling.clone();
        let inputs = self.inputs.clone();
        debug!(id = message.id, epoch, "Sending message");
        tokio::spawn(async move {
            let result = signaling.send_message(&target, &message.text).await;
            let _ = inputs.send(Input::MessageSent {
                epoch,
                id: message.id,
                result,
            });
        });
    }

    fn on_message_sent(
        &mut self,
        epoch: u64,
        id: MessageId,
        result: Result<SendReceipt, TransportError>,
    ) {
        if epoch != self.epoch {
            debug!(id, "Send result from a torn-down session ignored");
            return;
        }
        let Some(message) = self.dispatcher.finish_send(id) else {
            return;
        };
        match result {
            Ok(receipt) => {
                let window = self.settings.playback.resolve(&message.text, receipt.duration);
                debug!(id, window_ms = window.as_millis() as u64, "Message playing");
                self.dispatcher.start_playing(message);
                spawn_timer(
                    self.inputs.clone(),
                    self.cancel.child_token(),
                    window,
                    Input::PlaybackElapsed { epoch, id },
                );
            }
            Err(err) => {
                warn!(id, error = %err, "Failed to send message");
                self.notify_played(message, PlaybackOutcome::SendFailed(err.to_string()));
            }
        }
        self.pump();
    }
}
