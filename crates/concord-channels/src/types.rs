use serde::{Deserialize, Serialize};

/// Health as reported by a plugin's own `health_check` (§4.6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum HealthStatus {
    Healthy,
    Unhealthy { reason: String },
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

/// Opaque handle returned by `ChannelRegistry::register` (§4.6).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistrationHandle(pub String);

impl RegistrationHandle {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for RegistrationHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a registry-wide startup pass when `continue_on_error=true`
/// (§4.6): plugins that failed to start but whose errors were collected
/// rather than propagated.
#[derive(Debug)]
pub struct StartupReport {
    pub started: Vec<concord_core::ChannelId>,
    pub failed: Vec<(concord_core::ChannelId, crate::error::ChannelError)>,
}

impl StartupReport {
    pub fn all_ok(&self) -> bool {
        self.failed.is_empty()
    }
}
