use thiserror::Error;

/// Errors surfaced by channel plugins and the registry that owns them.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The underlying transport could not be established.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// A message could not be delivered to the remote endpoint.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The channel rejected the supplied credentials or token.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// An operation exceeded its allowed time budget.
    #[error("operation timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The channel-specific configuration is invalid or missing.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Registration under a `channel_id` that is already taken (§4.6).
    #[error("channel '{0}' is already registered")]
    ChannelAlreadyRegistered(String),

    /// Lookup, unregister, or operation against an unknown channel (§4.6).
    #[error("channel '{0}' is not registered")]
    ChannelNotFound(String),

    /// A plugin's `start` failed or timed out during registry startup (§4.6).
    #[error("channel '{channel_id}' failed to start: {reason}")]
    ChannelStartupError { channel_id: String, reason: String },
}

pub type Result<T> = std::result::Result<T, ChannelError>;
