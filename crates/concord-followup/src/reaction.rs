//! Reaction Processor (C12, §4.12): maps inbound emoji reactions to
//! feedback sentiment and drives the follow-up coordinator accordingly.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::warn;

use crate::coordinator::FollowupCoordinator;
use crate::types::FollowupRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionSentiment {
    Positive,
    Negative,
    Neutral,
}

/// Maps a raw emoji to a sentiment. Unrecognized reactions are neutral and
/// ignored rather than treated as negative.
pub fn classify_emoji(raw: &str) -> ReactionSentiment {
    match raw {
        "\u{1F44D}" | "\u{2764}\u{FE0F}" | "\u{2764}" => ReactionSentiment::Positive,
        "\u{1F44E}" => ReactionSentiment::Negative,
        _ => ReactionSentiment::Neutral,
    }
}

#[derive(Debug, Clone)]
pub struct ReactionEvent {
    pub channel_id: String,
    pub external_message_id: String,
    pub reactor_id: String,
    pub reactor_identity_hash: String,
    pub raw_reaction: String,
    pub sentiment: ReactionSentiment,
}

impl ReactionEvent {
    pub fn normalize(
        channel_id: impl Into<String>,
        external_message_id: impl Into<String>,
        reactor_id: impl Into<String>,
        reactor_identity_hash: impl Into<String>,
        raw_reaction: impl Into<String>,
    ) -> Self {
        let raw_reaction = raw_reaction.into();
        let sentiment = classify_emoji(&raw_reaction);
        Self {
            channel_id: channel_id.into(),
            external_message_id: external_message_id.into(),
            reactor_id: reactor_id.into(),
            reactor_identity_hash: reactor_identity_hash.into(),
            raw_reaction,
            sentiment,
        }
    }
}

/// Tracks which (channel, external message, reactor) a reaction event
/// touched, so a later redaction (the reactor removing their reaction) can
/// be undone without needing the original event payload again.
pub struct ReactionProcessor {
    coordinator: Arc<FollowupCoordinator>,
    event_index: Mutex<HashMap<String, (String, String, String)>>,
}

impl ReactionProcessor {
    pub fn new(coordinator: Arc<FollowupCoordinator>) -> Self {
        Self { coordinator, event_index: Mutex::new(HashMap::new()) }
    }

    /// Handle one reaction event. `event_id` identifies this specific
    /// reaction instance for later redaction. Never propagates an error;
    /// downstream failures are logged and swallowed per the gateway's
    /// fail-open policy for reactions.
    pub async fn process(&self, event_id: &str, event: &ReactionEvent, record: FollowupRecord) {
        {
            let mut index = self.event_index.lock().await;
            index.insert(
                event_id.to_string(),
                (event.channel_id.clone(), event.external_message_id.clone(), event.reactor_identity_hash.clone()),
            );
        }

        match event.sentiment {
            ReactionSentiment::Positive => {
                self.coordinator
                    .cancel_followup(&event.channel_id, &event.external_message_id, &event.reactor_identity_hash)
                    .await;
            }
            ReactionSentiment::Negative => {
                let started = self
                    .coordinator
                    .start_followup(
                        record,
                        &event.channel_id,
                        &event.external_message_id,
                        &event.reactor_id,
                        &event.reactor_identity_hash,
                    )
                    .await;
                if !started {
                    warn!(
                        channel_id = %event.channel_id,
                        external_message_id = %event.external_message_id,
                        "could not start feedback follow-up"
                    );
                }
            }
            ReactionSentiment::Neutral => {
                warn!(raw_reaction = %event.raw_reaction, "ignoring neutral reaction");
            }
        }
    }

    /// Handle a reactor removing a previously-processed reaction. Cancels
    /// any follow-up that reaction may have started. Unknown event ids are
    /// ignored.
    pub async fn process_redaction(&self, event_id: &str) {
        let tracked = {
            let mut index = self.event_index.lock().await;
            index.remove(event_id)
        };
        let Some((channel_id, external_message_id, reactor_identity_hash)) = tracked else {
            return;
        };
        self.coordinator.cancel_followup(&channel_id, &external_message_id, &reactor_identity_hash).await;
    }
}
