use std::collections::HashMap;

use async_trait::async_trait;
use concord_core::{ChannelId, OutgoingMessage};

use crate::{error::ChannelError, runtime::PluginRuntime, types::HealthStatus};

/// Common interface implemented by every channel adapter (Matrix, Telegram,
/// in-app web widget, …). Implementations must be `Send + Sync` so they can
/// be stored in a [`ChannelRegistry`](crate::registry::ChannelRegistry) and
/// driven from multiple Tokio tasks.
#[async_trait]
pub trait ChannelPlugin: Send + Sync {
    /// Stable identifier for this channel (e.g. `"matrix"`). Used as the
    /// registry key and must be unique across all registered adapters.
    fn channel_id(&self) -> &ChannelId;

    /// Establish the connection to the external service.
    async fn start(&mut self) -> Result<(), ChannelError>;

    /// Gracefully close the connection.
    async fn stop(&mut self) -> Result<(), ChannelError>;

    /// Deliver a response to `target`. Returns `true` on ack.
    async fn send_message(&self, target: &str, message: &OutgoingMessage) -> Result<bool, ChannelError>;

    /// Normalize a native payload, drive it through the gateway (via
    /// [`runtime`](Self::runtime)), and return the resulting response.
    async fn handle_incoming(&self, raw: serde_json::Value) -> Result<OutgoingMessage, ChannelError>;

    /// Recover the native delivery target (chat id, room id, …) from the
    /// `channel_metadata` bag carried on an `IncomingMessage`.
    fn get_delivery_target(&self, channel_metadata: &HashMap<String, serde_json::Value>) -> String;

    /// Report current health without blocking.
    fn health_check(&self) -> HealthStatus;

    /// Channel-specific queued-notice text. Returning `None` means the
    /// dispatcher falls through to the registry-mediated or generic
    /// template (see the Response Dispatcher's three-tier fallback).
    fn format_escalation_message(
        &self,
        _username: &str,
        _escalation_id: &str,
        _support_handle: &str,
    ) -> Option<String> {
        None
    }

    /// Shared-service lookup handle for this plugin instance. Missing
    /// services degrade gracefully — callers must treat `None` the same as
    /// an empty registry (§4.5).
    fn runtime(&self) -> Option<&PluginRuntime> {
        None
    }
}
