//! Ordered delivery of "speak" requests.
//!
//! The dispatcher is plain bookkeeping: it never touches the network. The
//! session manager asks it which message goes out next, tells it when a send
//! finished, and asks it which messages to report when a link goes away.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::constants::{DEFAULT_PLAYBACK_BASE, DEFAULT_PLAYBACK_MAX, DEFAULT_PLAYBACK_PER_CHAR};

pub type MessageId = u64;

/// Hands out message ids shared by caller requests and greetings.
#[derive(Debug, Clone, Default)]
pub struct MessageIds(Arc<AtomicU64>);

impl MessageIds {
    pub fn next(&self) -> MessageId {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// One accepted "speak" request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub id: MessageId,
    pub text: String,
    pub enqueued_at: DateTime<Utc>,
}

impl PendingMessage {
    pub fn new(id: MessageId, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
            enqueued_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// Sent, and the playback window elapsed.
    Played,
    /// The send itself failed; the session carries on.
    SendFailed(String),
    /// The link was torn down while the message was being sent or played.
    Interrupted,
    /// Still queued when the avatar was closed.
    Discarded,
}

impl fmt::Display for PlaybackOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackOutcome::Played => f.write_str("played"),
            PlaybackOutcome::SendFailed(reason) => write!(f, "send failed: {reason}"),
            PlaybackOutcome::Interrupted => f.write_str("interrupted"),
            PlaybackOutcome::Discarded => f.write_str("discarded"),
        }
    }
}

/// Delivered exactly once for every accepted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayedMessage {
    pub id: MessageId,
    pub text: String,
    pub outcome: PlaybackOutcome,
}

/// How long a sent message is assumed to play for.
///
/// The vendor reports no completion event, so the window is either the
/// duration hint from the send response (capped at `max`) or
/// `min(max, base + per_char * chars)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackEstimate {
    pub base: Duration,
    pub per_char: Duration,
    pub max: Duration,
}

impl Default for PlaybackEstimate {
    fn default() -> Self {
        Self {
            base: DEFAULT_PLAYBACK_BASE,
            per_char: DEFAULT_PLAYBACK_PER_CHAR,
            max: DEFAULT_PLAYBACK_MAX,
        }
    }
}

impl PlaybackEstimate {
    pub fn for_text(&self, text: &str) -> Duration {
        let chars = u32::try_from(text.chars().count()).unwrap_or(u32::MAX);
        self.base
            .saturating_add(self.per_char.saturating_mul(chars))
            .min(self.max)
    }

    pub fn resolve(&self, text: &str, hint: Option<Duration>) -> Duration {
        match hint {
            Some(duration) => duration.min(self.max),
            None => self.for_text(text),
        }
    }
}

#[derive(Debug, Default)]
pub struct Dispatcher {
    queue: VecDeque<PendingMessage>,
    in_flight: Option<PendingMessage>,
    /// In the order their sends completed.
    playing: VecDeque<PendingMessage>,
    greeted: bool,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, message: PendingMessage) {
        self.queue.push_back(message);
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_sending(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Queue the greeting ahead of everything else, once per latch arming.
    /// Returns whether the greeting was queued.
    pub fn greet(&mut self, message: PendingMessage) -> bool {
        if self.greeted {
            return false;
        }
        self.greeted = true;
        self.queue.push_front(message);
        true
    }

    pub fn rearm_greeting(&mut self) {
        self.greeted = false;
    }

    pub fn has_greeted(&self) -> bool {
        self.greeted
    }

    /// Next message to send, or `None` while a send is outstanding.
    pub fn begin_send(&mut self) -> Option<PendingMessage> {
        if self.in_flight.is_some() {
            return None;
        }
        let next = self.queue.pop_front()?;
        self.in_flight = Some(next.clone());
        Some(next)
    }

    pub fn finish_send(&mut self, id: MessageId) -> Option<PendingMessage> {
        match &self.in_flight {
            Some(message) if message.id == id => self.in_flight.take(),
            _ => None,
        }
    }

    pub fn start_playing(&mut self, message: PendingMessage) {
        self.playing.push_back(message);
    }

    pub fn finish_playing(&mut self, id: MessageId) -> Option<PendingMessage> {
        let index = self.playing.iter().position(|message| message.id == id)?;
        self.playing.remove(index)
    }

    /// Messages cut off by a teardown, in send order. The queue is kept.
    pub fn interrupt(&mut self) -> Vec<PendingMessage> {
        let mut cut: Vec<PendingMessage> = std::mem::take(&mut self.playing).into();
        cut.extend(self.in_flight.take());
        cut
    }

    pub fn drain_queue(&mut self) -> Vec<PendingMessage> {
        self.queue.drain(..).collect()
    }
}
