//! Headless "say" command

#![cfg_attr(not(feature = "webrtc"), allow(dead_code))]

use std::collections::HashSet;
use std::error::Error;

use tokio::sync::mpsc;

use crate::core::config::Config;
use crate::core::dispatcher::{MessageId, PlaybackOutcome, PlayedMessage};
use crate::core::session::{SessionState, StateChange};

#[derive(Debug)]
enum SayEvent {
    State(StateChange),
    Played(PlayedMessage),
}

#[cfg(not(feature = "webrtc"))]
pub async fn run_say(_config: &Config, _texts: Vec<String>) -> Result<(), Box<dyn Error>> {
    Err("This build lacks WebRTC support; rebuild with `--features webrtc`.".into())
}

#[cfg(feature = "webrtc")]
pub async fn run_say(config: &Config, texts: Vec<String>) -> Result<(), Box<dyn Error>> {
    use std::sync::Arc;

    use crate::core::avatar::Avatar;
    use crate::peer::rtc::RtcPeerFactory;
    use crate::signaling::VendorSignaling;

    let texts = spoken_texts(texts)?;

    let transport = super::build_transport(config)?;
    let signaling = Arc::new(VendorSignaling::new(transport, config.stream_flavor()?));
    let peers = Arc::new(RtcPeerFactory::new()?);
    let avatar = Avatar::spawn(config.session_settings(), signaling, peers);

    let (tx, rx) = mpsc::unbounded_channel();
    let state_tx = tx.clone();
    avatar.on_connection_state_changed(move |change| {
        let _ = state_tx.send(SayEvent::State(change.clone()));
    });
    avatar.on_message_played(move |played| {
        let _ = tx.send(SayEvent::Played(played.clone()));
    });

    avatar.initialize();
    let waiting: HashSet<MessageId> = texts.into_iter().map(|text| avatar.speak(text)).collect();

    let result = tokio::select! {
        result = wait_for_playback(rx, waiting) => result,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Interrupted.");
            Ok(())
        }
    };

    avatar.close().await;
    result
}

/// Blank arguments are skipped; at least one text must remain.
fn spoken_texts(texts: Vec<String>) -> Result<Vec<String>, Box<dyn Error>> {
    let texts: Vec<String> = texts
        .into_iter()
        .filter(|text| !text.trim().is_empty())
        .collect();
    if texts.is_empty() {
        return Err("Usage: talkhead say <text>...".into());
    }
    Ok(texts)
}

/// Returns once every id in `waiting` has been reported, or the session has
/// failed for good.
async fn wait_for_playback(
    mut events: mpsc::UnboundedReceiver<SayEvent>,
    mut waiting: HashSet<MessageId>,
) -> Result<(), Box<dyn Error>> {
    let mut failures = 0usize;
    while !waiting.is_empty() {
        let Some(event) = events.recv().await else {
            return Err("Avatar session ended unexpectedly".into());
        };
        match event {
            SayEvent::State(change) => {
                eprintln!("{}", describe_state(&change));
                if change.state == SessionState::Failed {
                    let reason = change
                        .error
                        .map(|err| err.to_string())
                        .unwrap_or_else(|| "unknown error".to_string());
                    return Err(format!("Session failed: {reason}").into());
                }
            }
            SayEvent::Played(played) => {
                let tracked = waiting.remove(&played.id);
                if !matches!(played.outcome, PlaybackOutcome::Played) && tracked {
                    failures += 1;
                }
                println!("{}", describe_played(&played));
            }
        }
    }

    if failures > 0 {
        return Err(format!("{failures} message(s) were not spoken").into());
    }
    Ok(())
}

fn describe_state(change: &StateChange) -> String {
    let mut line = format!("• {} → {}", change.previous, change.state);
    if change.retry_count > 0 {
        line.push_str(&format!(" (retry {})", change.retry_count));
    }
    if let Some(err) = &change.error {
        line.push_str(&format!(": {err}"));
    }
    line
}

fn describe_played(played: &PlayedMessage) -> String {
    match &played.outcome {
        PlaybackOutcome::Played => format!("🗣  {}", played.text),
        PlaybackOutcome::SendFailed(reason) => format!("❌ {} ({reason})", played.text),
        PlaybackOutcome::Interrupted => format!("⏹  {} (interrupted)", played.text),
        PlaybackOutcome::Discarded => format!("🗑  {} (discarded)", played.text),
    }
}
