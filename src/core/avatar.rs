//! Caller-facing handle for one avatar instance.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::dispatcher::{MessageId, MessageIds, PendingMessage, PlayedMessage};
use super::session::{
    Command, Input, SessionManager, SessionSettings, SessionSnapshot, StateChange,
};
use crate::peer::PeerFactory;
use crate::signaling::Signaling;

/// Cheap to clone; every clone talks to the same session.
///
/// All state lives on a single actor task, so calls never block and
/// callbacks run on that task in the order events are applied. The actor
/// closes the session and exits once the last handle is dropped.
#[derive(Clone)]
pub struct Avatar {
    commands: mpsc::UnboundedSender<Command>,
    ids: MessageIds,
}

impl Avatar {
    /// Start the actor on the current tokio runtime. The session stays
    /// `Idle` until [`Avatar::initialize`].
    pub fn spawn(
        settings: SessionSettings,
        signaling: Arc<dyn Signaling>,
        peers: Arc<dyn PeerFactory>,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
        let ids = MessageIds::default();
        let manager = SessionManager::new(settings, signaling, peers, ids.clone(), inputs_tx);
        tokio::spawn(run(manager, commands_rx, inputs_rx));
        Self {
            commands: commands_tx,
            ids,
        }
    }

    fn send(&self, command: Command) -> bool {
        if self.commands.send(command).is_err() {
            warn!("Avatar actor is no longer running");
            return false;
        }
        true
    }

    pub fn initialize(&self) {
        self.send(Command::Initialize);
    }

    /// Queue `text` to be spoken. The returned id shows up again in exactly
    /// one [`PlayedMessage`].
    pub fn speak(&self, text: impl Into<String>) -> MessageId {
        let message = PendingMessage::new(self.ids.next(), text);
        let id = message.id;
        self.send(Command::Speak(message));
        id
    }

    pub fn on_message_played<F>(&self, callback: F)
    where
        F: FnMut(&PlayedMessage) + Send + 'static,
    {
        self.send(Command::OnPlayed(Box::new(callback)));
    }

    pub fn on_connection_state_changed<F>(&self, callback: F)
    where
        F: FnMut(&StateChange) + Send + 'static,
    {
        self.send(Command::OnStateChange(Box::new(callback)));
    }

    pub fn reconnect(&self) {
        self.send(Command::Reconnect);
    }

    /// Resolves once the link is closed and the remote session released
    /// (or the release attempt failed).
    pub async fn close(&self) {
        let (tx, rx) = oneshot::channel();
        if self.send(Command::Close(tx)) {
            let _ = rx.await;
        }
    }

    pub async fn snapshot(&self) -> Option<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        if !self.send(Command::Snapshot(tx)) {
            return None;
        }
        rx.await.ok()
    }

    /// Allow the greeting to be spoken again the next time the link is ready.
    pub fn rearm_greeting(&self) {
        self.send(Command::RearmGreeting);
    }
}

async fn run(
    mut manager: SessionManager,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut inputs: mpsc::UnboundedReceiver<Input>,
) {
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => manager.handle_command(command),
                None => break,
            },
            Some(input) = inputs.recv() => manager.handle(input),
        }
    }
    manager.shutdown();
    debug!("Avatar actor stopped");
}

#[cfg(test)]
mod tests;
