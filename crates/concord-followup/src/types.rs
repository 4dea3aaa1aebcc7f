use tokio::time::Instant;

/// What `start_followup` needs from the original delivered answer: where
/// to send the prompt/ack, and which internal record a clarification
/// should update.
#[derive(Debug, Clone)]
pub struct FollowupRecord {
    pub internal_message_id: String,
    pub delivery_target: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct PendingFollowup {
    pub reaction_key: String,
    pub external_message_id: String,
    pub record: FollowupRecord,
    pub expires_at: Instant,
}

impl PendingFollowup {
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// `lower(channel_id) :: delivery_target :: reactor_id` (§4.11).
pub(crate) fn context_key(channel_id: &str, delivery_target: &str, reactor_id: &str) -> String {
    format!("{}::{}::{}", channel_id.to_lowercase(), delivery_target, reactor_id)
}

/// `lower(channel_id) :: external_message_id :: reactor_identity_hash` (§4.11).
pub(crate) fn reaction_key(channel_id: &str, external_message_id: &str, reactor_identity_hash: &str) -> String {
    format!("{}::{}::{}", channel_id.to_lowercase(), external_message_id, reactor_identity_hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_lowercase_the_channel_id() {
        assert_eq!(context_key("Matrix", "room:1", "user-1"), "matrix::room:1::user-1");
        assert_eq!(reaction_key("Matrix", "evt-1", "hash-1"), "matrix::evt-1::hash-1");
    }
}
