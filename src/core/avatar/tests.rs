use super::*;
use crate::api::SessionDescription;
use crate::core::dispatcher::PlaybackOutcome;
use crate::core::session::{SessionError, SessionState};
use crate::peer::{IceConnectionState, NegotiationError};
use crate::transport::TransportError;
use crate::utils::test_utils::{sample_offer, FakeSignaling, ScriptedPeerFactory, SignalCall};
use std::sync::Mutex;
use std::time::Duration;

struct Harness {
    avatar: Avatar,
    signaling: Arc<FakeSignaling>,
    peers: Arc<ScriptedPeerFactory>,
    changes: Arc<Mutex<Vec<StateChange>>>,
    played: Arc<Mutex<Vec<PlayedMessage>>>,
}

impl Harness {
    fn new(settings: SessionSettings, peers: ScriptedPeerFactory) -> Self {
        let signaling = Arc::new(FakeSignaling::new());
        let peers = Arc::new(peers);
        let avatar = Avatar::spawn(settings, signaling.clone(), peers.clone());

        let changes = Arc::new(Mutex::new(Vec::new()));
        let sink = changes.clone();
        avatar.on_connection_state_changed(move |change| sink.lock().unwrap().push(change.clone()));

        let played = Arc::new(Mutex::new(Vec::new()));
        let sink = played.clone();
        avatar.on_message_played(move |message| sink.lock().unwrap().push(message.clone()));

        Self {
            avatar,
            signaling,
            peers,
            changes,
            played,
        }
    }

    fn manual() -> Self {
        Self::new(SessionSettings::default(), ScriptedPeerFactory::manual())
    }

    fn auto_connect() -> Self {
        Self::new(SessionSettings::default(), ScriptedPeerFactory::auto_connect())
    }

    fn states(&self) -> Vec<SessionState> {
        self.changes.lock().unwrap().iter().map(|c| c.state).collect()
    }

    fn last_change(&self) -> StateChange {
        self.changes.lock().unwrap().last().cloned().unwrap()
    }

    fn outcomes(&self) -> Vec<(String, PlaybackOutcome)> {
        self.played
            .lock()
            .unwrap()
            .iter()
            .map(|m| (m.text.clone(), m.outcome.clone()))
            .collect()
    }

    async fn state(&self) -> SessionState {
        self.avatar.snapshot().await.unwrap().state
    }

    fn count_creates(&self) -> usize {
        self.signaling
            .calls()
            .iter()
            .filter(|call| **call == SignalCall::CreateStream)
            .count()
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn initialize_reaches_connected() {
    let h = Harness::auto_connect();
    h.avatar.initialize();
    settle().await;

    assert_eq!(
        h.states(),
        vec![
            SessionState::Connecting,
            SessionState::AwaitingAnswer,
            SessionState::Connected
        ]
    );
    let snapshot = h.avatar.snapshot().await.unwrap();
    assert_eq!(snapshot.retry_count, 0);
    assert_eq!(snapshot.stream_id.as_deref(), Some("strm_1"));
    assert_eq!(snapshot.session_id.as_deref(), Some("sess_1"));
    assert!(snapshot.created_at.is_some());

    let calls = h.signaling.calls();
    assert_eq!(calls[0], SignalCall::CreateStream);
    assert!(calls.contains(&SignalCall::SubmitAnswer("strm_1".into())));
    assert!(calls.contains(&SignalCall::OpenChannel("strm_1".into())));
    assert_eq!(
        calls
            .iter()
            .filter(|call| **call == SignalCall::SubmitIce(None))
            .count(),
        1
    );
    assert_eq!(h.peers.peer(0).remote_offer(), Some(sample_offer()));
}

#[tokio::test(start_paused = true)]
async fn initialize_is_ignored_once_started() {
    let h = Harness::auto_connect();
    h.avatar.initialize();
    h.avatar.initialize();
    settle().await;
    h.avatar.initialize();
    settle().await;

    assert_eq!(h.count_creates(), 1);
    assert_eq!(h.state().await, SessionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn speak_while_connecting_is_sent_once_connected() {
    let h = Harness::manual();
    h.avatar.initialize();
    h.avatar.speak("Hi");
    settle().await;

    assert_eq!(h.state().await, SessionState::AwaitingAnswer);
    assert!(h.signaling.sent_texts().is_empty());
    assert_eq!(h.avatar.snapshot().await.unwrap().pending, 1);

    h.peers.peer(0).emit_state(IceConnectionState::Connected);
    settle().await;

    assert_eq!(h.signaling.sent_texts(), vec!["Hi".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn queued_messages_flush_in_submission_order() {
    let h = Harness::manual();
    h.avatar.speak("one");
    h.avatar.initialize();
    h.avatar.speak("two");
    settle().await;
    h.avatar.speak("three");
    h.avatar.speak("four");
    settle().await;

    h.peers.peer(0).emit_state(IceConnectionState::Completed);
    h.avatar.speak("five");
    settle().await;

    assert_eq!(h.signaling.sent_texts(), vec!["one", "two", "three", "four", "five"]);
}

#[tokio::test(start_paused = true)]
async fn played_fires_after_length_heuristic() {
    let h = Harness::auto_connect();
    h.avatar.initialize();
    settle().await;

    let id = h.avatar.speak("Hi");
    settle().await;
    assert!(h.outcomes().is_empty());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(h.outcomes().is_empty());

    tokio::time::sleep(Duration::from_millis(200)).await;
    let played = h.played.lock().unwrap().clone();
    assert_eq!(played.len(), 1);
    assert_eq!(played[0].id, id);
    assert_eq!(played[0].outcome, PlaybackOutcome::Played);
}

#[tokio::test(start_paused = true)]
async fn played_prefers_vendor_duration() {
    let h = Harness::auto_connect();
    h.signaling.set_send_duration(Some(Duration::from_secs(3)));
    h.avatar.initialize();
    settle().await;

    h.avatar.speak("Hi");
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(h.outcomes().is_empty());
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(h.outcomes(), vec![("Hi".to_string(), PlaybackOutcome::Played)]);
}

#[tokio::test(start_paused = true)]
async fn send_failure_is_reported_and_delivery_continues() {
    let h = Harness::auto_connect();
    h.signaling.fail_next_send(TransportError::Status {
        status: 400,
        body: "bad script".into(),
    });
    h.avatar.initialize();
    settle().await;

    h.avatar.speak("broken");
    h.avatar.speak("fine");
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(h.signaling.sent_texts(), vec!["broken", "fine"]);
    let outcomes = h.outcomes();
    assert_eq!(outcomes.len(), 2);
    assert!(matches!(&outcomes[0], (text, PlaybackOutcome::SendFailed(reason)) if text == "broken" && reason.contains("400")));
    assert_eq!(outcomes[1], ("fine".to_string(), PlaybackOutcome::Played));
    assert_eq!(h.state().await, SessionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn greeting_is_spoken_once_across_reconnects() {
    let settings = SessionSettings {
        greeting: Some("Hello!".into()),
        ..Default::default()
    };
    let h = Harness::new(settings, ScriptedPeerFactory::auto_connect());
    h.avatar.speak("queued");
    h.avatar.initialize();
    settle().await;

    assert_eq!(h.signaling.sent_texts(), vec!["Hello!", "queued"]);

    // a replayed "connected" must not re-enter the state or greet again
    h.peers.peer(0).emit_state(IceConnectionState::Connected);
    settle().await;
    let connected = |h: &Harness| h.states().iter().filter(|s| **s == SessionState::Connected).count();
    assert_eq!(connected(&h), 1);

    h.peers.peer(0).emit_state(IceConnectionState::Disconnected);
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(connected(&h), 2);
    assert_eq!(h.signaling.sent_texts(), vec!["Hello!", "queued"]);

    h.avatar.rearm_greeting();
    h.avatar.reconnect();
    settle().await;
    assert_eq!(h.signaling.sent_texts(), vec!["Hello!", "queued", "Hello!"]);
}

#[tokio::test(start_paused = true)]
async fn reconnect_budget_is_bounded() {
    let h = Harness::manual();
    h.avatar.initialize();
    settle().await;

    for expected_retry in 1..=3 {
        assert_eq!(h.state().await, SessionState::AwaitingAnswer);
        h.peers.last_peer().emit_state(IceConnectionState::Failed);
        settle().await;
        let snapshot = h.avatar.snapshot().await.unwrap();
        assert_eq!(snapshot.state, SessionState::Disconnected);
        assert_eq!(snapshot.retry_count, expected_retry);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.avatar.snapshot().await.unwrap().retry_count, expected_retry);
    }

    // fourth loss: no budget left
    h.peers.last_peer().emit_state(IceConnectionState::Failed);
    settle().await;
    let last = h.last_change();
    assert_eq!(last.state, SessionState::Failed);
    assert_eq!(last.error, Some(SessionError::Exhausted { attempts: 3 }));

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.count_creates(), 4);
    assert_eq!(h.peers.created(), 4);
    assert_eq!(
        h.states()
            .iter()
            .filter(|s| **s == SessionState::Disconnected)
            .count(),
        4
    );
    assert_eq!(h.state().await, SessionState::Failed);
}

#[tokio::test(start_paused = true)]
async fn failure_at_last_retry_moves_to_failed_after_one_more_attempt() {
    let h = Harness::manual();
    h.avatar.initialize();
    settle().await;
    for _ in 0..2 {
        h.peers.last_peer().emit_state(IceConnectionState::Failed);
        settle().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
    let snapshot = h.avatar.snapshot().await.unwrap();
    assert_eq!(snapshot.state, SessionState::AwaitingAnswer);
    assert_eq!(snapshot.retry_count, 2);
    let seen = h.changes.lock().unwrap().len();

    h.peers.last_peer().emit_state(IceConnectionState::Failed);
    settle().await;
    assert_eq!(h.state().await, SessionState::Disconnected);

    tokio::time::sleep(Duration::from_secs(5)).await;
    let changes: Vec<StateChange> = h.changes.lock().unwrap()[seen..].to_vec();
    assert_eq!(changes[0].state, SessionState::Disconnected);
    assert_eq!(changes[1].state, SessionState::Connecting);
    assert_eq!(changes[1].retry_count, 3);

    h.peers.last_peer().emit_state(IceConnectionState::Failed);
    settle().await;
    assert_eq!(h.state().await, SessionState::Failed);
}

#[tokio::test(start_paused = true)]
async fn manual_reconnect_from_failed_resets_budget() {
    let h = Harness::manual();
    h.avatar.initialize();
    settle().await;
    for _ in 0..4 {
        h.peers.last_peer().emit_state(IceConnectionState::Failed);
        settle().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
    assert_eq!(h.state().await, SessionState::Failed);
    let seen = h.changes.lock().unwrap().len();

    h.avatar.reconnect();
    settle().await;

    let after: Vec<StateChange> = h.changes.lock().unwrap()[seen..].to_vec();
    assert_eq!(after[0].previous, SessionState::Failed);
    assert_eq!(after[0].state, SessionState::Connecting);
    assert_eq!(after[0].retry_count, 0);
    assert_eq!(h.avatar.snapshot().await.unwrap().retry_count, 0);
}

#[tokio::test(start_paused = true)]
async fn connecting_times_out_after_45_seconds() {
    let h = Harness::manual();
    h.signaling.stall_create();
    h.avatar.initialize();

    tokio::time::sleep(Duration::from_secs(44)).await;
    assert_eq!(h.state().await, SessionState::Connecting);

    tokio::time::sleep(Duration::from_secs(2)).await;
    let last = h.last_change();
    assert_eq!(last.state, SessionState::Failed);
    assert_eq!(last.error, Some(SessionError::Timeout(Duration::from_secs(45))));
    assert_eq!(h.states(), vec![SessionState::Connecting, SessionState::Failed]);
}

#[tokio::test(start_paused = true)]
async fn awaiting_answer_times_out_and_releases_the_link() {
    let h = Harness::manual();
    h.avatar.initialize();
    settle().await;
    assert_eq!(h.state().await, SessionState::AwaitingAnswer);

    tokio::time::sleep(Duration::from_secs(46)).await;

    assert_eq!(h.state().await, SessionState::Failed);
    assert_eq!(h.peers.peer(0).close_count(), 1);
    assert_eq!(h.signaling.deleted_streams(), vec!["strm_1"]);
}

#[tokio::test(start_paused = true)]
async fn connected_cancels_the_connect_timeout() {
    let h = Harness::auto_connect();
    h.avatar.initialize();
    settle().await;

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.state().await, SessionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn malformed_offer_fails_the_session() {
    let h = Harness::manual();
    h.signaling.set_offer(SessionDescription::answer("v=0"));
    h.avatar.initialize();
    settle().await;

    let last = h.last_change();
    assert_eq!(last.state, SessionState::Failed);
    assert!(matches!(
        last.error,
        Some(SessionError::Negotiation(NegotiationError::MalformedOffer(_)))
    ));
    assert_eq!(h.peers.created(), 0);
    assert_eq!(h.signaling.deleted_streams(), vec!["strm_1"]);
}

#[tokio::test(start_paused = true)]
async fn exhausted_transport_fails_the_session() {
    let h = Harness::manual();
    h.signaling.fail_next_create(TransportError::Status {
        status: 401,
        body: "unauthorized".into(),
    });
    h.avatar.initialize();
    settle().await;

    let last = h.last_change();
    assert_eq!(last.state, SessionState::Failed);
    assert!(matches!(last.error, Some(SessionError::Transport(_))));
    assert!(h.signaling.deleted_streams().is_empty());
}

#[tokio::test(start_paused = true)]
async fn close_twice_ends_idle_once() {
    let h = Harness::auto_connect();
    h.avatar.initialize();
    settle().await;

    h.avatar.close().await;
    h.avatar.close().await;

    let snapshot = h.avatar.snapshot().await.unwrap();
    assert_eq!(snapshot.state, SessionState::Idle);
    assert_eq!(snapshot.stream_id, None);
    assert_eq!(
        h.states().iter().filter(|s| **s == SessionState::Idle).count(),
        1
    );
    assert_eq!(h.peers.peer(0).close_count(), 1);
    assert_eq!(h.signaling.deleted_streams(), vec!["strm_1"]);
}

#[tokio::test(start_paused = true)]
async fn close_before_initialize_is_harmless() {
    let h = Harness::manual();
    h.avatar.close().await;
    assert_eq!(h.state().await, SessionState::Idle);
    assert!(h.states().is_empty());
    assert!(h.signaling.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn close_discards_queue_and_interrupts_playback() {
    let h = Harness::manual();
    h.avatar.initialize();
    settle().await;
    h.peers.peer(0).emit_state(IceConnectionState::Connected);
    settle().await;

    h.avatar.speak("playing");
    settle().await;
    h.peers.peer(0).emit_state(IceConnectionState::Disconnected);
    h.avatar.speak("queued one");
    h.avatar.speak("queued two");
    settle().await;
    h.avatar.close().await;

    assert_eq!(
        h.outcomes(),
        vec![
            ("playing".to_string(), PlaybackOutcome::Interrupted),
            ("queued one".to_string(), PlaybackOutcome::Discarded),
            ("queued two".to_string(), PlaybackOutcome::Discarded),
        ]
    );

    // cancelled timers stay silent
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.outcomes().len(), 3);
    assert_eq!(h.count_creates(), 1);
}

#[tokio::test(start_paused = true)]
async fn reconnect_interrupts_playback_but_keeps_the_queue() {
    let h = Harness::auto_connect();
    h.avatar.initialize();
    settle().await;
    h.avatar.speak("first");
    settle().await;

    h.peers.set_auto_connect(false);
    h.avatar.reconnect();
    h.avatar.speak("second");
    settle().await;

    assert_eq!(
        h.outcomes(),
        vec![("first".to_string(), PlaybackOutcome::Interrupted)]
    );
    assert_eq!(h.signaling.sent_texts(), vec!["first"]);
    assert_eq!(h.signaling.deleted_streams(), vec!["strm_1"]);

    h.peers.last_peer().emit_state(IceConnectionState::Connected);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.signaling.sent_texts(), vec!["first", "second"]);
    assert_eq!(h.outcomes().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn events_from_a_replaced_link_are_ignored() {
    let h = Harness::manual();
    h.avatar.initialize();
    settle().await;
    h.avatar.reconnect();
    settle().await;

    let stale = h.peers.peer(0);
    stale.emit_state(IceConnectionState::Connected);
    settle().await;

    assert_eq!(h.state().await, SessionState::AwaitingAnswer);
    assert_eq!(stale.close_count(), 1);
    assert_eq!(h.peers.created(), 2);
}

#[tokio::test(start_paused = true)]
async fn dropping_every_handle_releases_the_session() {
    let h = Harness::auto_connect();
    h.avatar.initialize();
    settle().await;

    let Harness {
        avatar,
        signaling,
        peers,
        ..
    } = h;
    drop(avatar);
    settle().await;

    assert_eq!(peers.peer(0).close_count(), 1);
    assert_eq!(signaling.deleted_streams(), vec!["strm_1"]);
}
