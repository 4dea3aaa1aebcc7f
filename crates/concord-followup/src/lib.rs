pub mod coordinator;
pub mod reaction;
pub mod types;

pub use coordinator::{FeedbackAnalyzer, FeedbackSink, FollowupCoordinator, PromptSender, FOLLOWUP_ACK, FOLLOWUP_PROMPT};
pub use reaction::{classify_emoji, ReactionEvent, ReactionProcessor, ReactionSentiment};
pub use types::FollowupRecord;
