use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use concord_core::{ChannelId, OutgoingMessage};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::{
    channel::ChannelPlugin,
    error::ChannelError,
    types::{HealthStatus, RegistrationHandle, StartupReport},
};

struct Entry {
    plugin: Mutex<Box<dyn ChannelPlugin>>,
    priority: i32,
    /// Set to false the moment `start` fails or times out; a plugin that
    /// never started is never considered healthy regardless of
    /// `health_check` (§4.6).
    started_ok: AtomicBool,
}

/// Owns every registered channel plugin's lifecycle: registration, ordered
/// startup, LIFO shutdown, health aggregation, and targeted restart (§4.6).
///
/// Entries are stored behind `Arc` so a lookup can be cloned out of the
/// `DashMap` shard before any `.await`, instead of holding a `dashmap::Ref`
/// across a suspension point.
pub struct ChannelRegistry {
    entries: DashMap<ChannelId, Arc<Entry>>,
    handle_index: DashMap<String, ChannelId>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self { entries: DashMap::new(), handle_index: DashMap::new() }
    }

    pub fn register(
        &self,
        plugin: Box<dyn ChannelPlugin>,
        priority: i32,
    ) -> Result<RegistrationHandle, ChannelError> {
        let channel_id = plugin.channel_id().clone();
        if self.entries.contains_key(&channel_id) {
            return Err(ChannelError::ChannelAlreadyRegistered(channel_id.to_string()));
        }
        let handle = RegistrationHandle::new();
        self.handle_index.insert(handle.0.clone(), channel_id.clone());
        self.entries.insert(
            channel_id.clone(),
            Arc::new(Entry {
                plugin: Mutex::new(plugin),
                priority,
                started_ok: AtomicBool::new(false),
            }),
        );
        info!(channel = %channel_id, priority, "channel registered");
        Ok(handle)
    }

    /// Unregister by handle or by `channel_id` string — either resolves to
    /// the same entry (§4.6).
    pub fn unregister(&self, handle_or_id: &str) -> Result<(), ChannelError> {
        let channel_id = self
            .handle_index
            .get(handle_or_id)
            .map(|e| e.value().clone())
            .unwrap_or_else(|| ChannelId::from(handle_or_id));

        if self.entries.remove(&channel_id).is_none() {
            return Err(ChannelError::ChannelNotFound(handle_or_id.to_string()));
        }
        self.handle_index.retain(|_, v| v != &channel_id);
        debug!(channel = %channel_id, "channel unregistered");
        Ok(())
    }

    fn entry(&self, channel_id: &ChannelId) -> Result<Arc<Entry>, ChannelError> {
        self.entries
            .get(channel_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| ChannelError::ChannelNotFound(channel_id.to_string()))
    }

    /// Start every registered plugin in ascending priority order, each
    /// bounded by `timeout`. In default mode the first failure aborts and
    /// is returned; with `continue_on_error=true` failures are collected
    /// and every plugin still gets a chance to start (§4.6).
    pub async fn start_all(
        &self,
        timeout: Duration,
        continue_on_error: bool,
    ) -> Result<StartupReport, ChannelError> {
        let mut ordered: Vec<(ChannelId, Arc<Entry>)> =
            self.entries.iter().map(|e| (e.key().clone(), e.value().clone())).collect();
        ordered.sort_by_key(|(_, entry)| entry.priority);

        let mut started = Vec::new();
        let mut failed = Vec::new();

        for (channel_id, entry) in ordered {
            info!(channel = %channel_id, "starting channel");
            let mut plugin = entry.plugin.lock().await;
            let result = tokio::time::timeout(timeout, plugin.start()).await;
            drop(plugin);

            match result {
                Ok(Ok(())) => {
                    entry.started_ok.store(true, Ordering::SeqCst);
                    started.push(channel_id);
                }
                Ok(Err(e)) => {
                    let err = ChannelError::ChannelStartupError {
                        channel_id: channel_id.to_string(),
                        reason: e.to_string(),
                    };
                    if continue_on_error {
                        error!(channel = %channel_id, error = %err, "channel failed to start, continuing");
                        failed.push((channel_id, err));
                    } else {
                        return Err(err);
                    }
                }
                Err(_elapsed) => {
                    let err = ChannelError::ChannelStartupError {
                        channel_id: channel_id.to_string(),
                        reason: format!("start exceeded {}ms", timeout.as_millis()),
                    };
                    if continue_on_error {
                        error!(channel = %channel_id, error = %err, "channel start timed out, continuing");
                        failed.push((channel_id, err));
                    } else {
                        return Err(err);
                    }
                }
            }
        }

        Ok(StartupReport { started, failed })
    }

    /// Stop every plugin in descending priority (reverse of start order).
    /// Errors are logged; every plugin is still given a chance to stop.
    pub async fn stop_all(&self) {
        let mut ordered: Vec<(ChannelId, Arc<Entry>)> =
            self.entries.iter().map(|e| (e.key().clone(), e.value().clone())).collect();
        ordered.sort_by_key(|(_, entry)| std::cmp::Reverse(entry.priority));

        for (channel_id, entry) in ordered {
            info!(channel = %channel_id, "stopping channel");
            let mut plugin = entry.plugin.lock().await;
            if let Err(e) = plugin.stop().await {
                warn!(channel = %channel_id, error = %e, "error while stopping channel");
            }
        }
    }

    /// Stop then start a single plugin (§4.6).
    pub async fn restart(&self, channel_id: &ChannelId, timeout: Duration) -> Result<(), ChannelError> {
        let entry = self.entry(channel_id)?;
        let mut plugin = entry.plugin.lock().await;
        if let Err(e) = plugin.stop().await {
            warn!(channel = %channel_id, error = %e, "error stopping channel during restart");
        }
        let result = tokio::time::timeout(timeout, plugin.start()).await;
        drop(plugin);
        match result {
            Ok(Ok(())) => {
                entry.started_ok.store(true, Ordering::SeqCst);
                Ok(())
            }
            Ok(Err(e)) => Err(ChannelError::ChannelStartupError {
                channel_id: channel_id.to_string(),
                reason: e.to_string(),
            }),
            Err(_elapsed) => Err(ChannelError::ChannelStartupError {
                channel_id: channel_id.to_string(),
                reason: format!("restart exceeded {}ms", timeout.as_millis()),
            }),
        }
    }

    /// A plugin is healthy iff its own `health_check` reports healthy and,
    /// when `start` has run, it did not fail (§4.6).
    pub async fn health_check(&self, channel_id: &ChannelId) -> Result<HealthStatus, ChannelError> {
        let entry = self.entry(channel_id)?;
        let started_ok = entry.started_ok.load(Ordering::SeqCst);
        if !started_ok {
            return Ok(HealthStatus::Unhealthy { reason: "plugin never started successfully".into() });
        }
        let plugin = entry.plugin.lock().await;
        Ok(plugin.health_check())
    }

    pub async fn health_check_all(&self) -> HashMap<ChannelId, HealthStatus> {
        let ids: Vec<ChannelId> = self.entries.iter().map(|e| e.key().clone()).collect();
        let mut result = HashMap::with_capacity(ids.len());
        for id in ids {
            if let Ok(status) = self.health_check(&id).await {
                result.insert(id, status);
            }
        }
        result
    }

    /// Run `f` with exclusive access to the named plugin, if registered.
    pub async fn with_plugin<R>(
        &self,
        channel_id: &ChannelId,
        f: impl FnOnce(&mut Box<dyn ChannelPlugin>) -> R,
    ) -> Result<R, ChannelError> {
        let entry = self.entry(channel_id)?;
        let mut plugin = entry.plugin.lock().await;
        Ok(f(&mut plugin))
    }

    pub fn contains(&self, channel_id: &ChannelId) -> bool {
        self.entries.contains_key(channel_id)
    }

    /// Recover the native delivery target for `channel_metadata` from the
    /// named plugin (used by the Response Dispatcher, §4.9).
    pub async fn get_delivery_target(
        &self,
        channel_id: &ChannelId,
        channel_metadata: &HashMap<String, serde_json::Value>,
    ) -> Result<String, ChannelError> {
        let entry = self.entry(channel_id)?;
        let plugin = entry.plugin.lock().await;
        Ok(plugin.get_delivery_target(channel_metadata))
    }

    /// Deliver `message` to `target` through the named plugin.
    pub async fn send_message(
        &self,
        channel_id: &ChannelId,
        target: &str,
        message: &OutgoingMessage,
    ) -> Result<bool, ChannelError> {
        let entry = self.entry(channel_id)?;
        let plugin = entry.plugin.lock().await;
        plugin.send_message(target, message).await
    }

    /// Ask the named plugin for its own queued-escalation notice text, if
    /// it has one (tier one of the Response Dispatcher's fallback chain).
    pub async fn format_escalation_message(
        &self,
        channel_id: &ChannelId,
        username: &str,
        escalation_id: &str,
        support_handle: &str,
    ) -> Option<String> {
        let entry = self.entry(channel_id).ok()?;
        let plugin = entry.plugin.lock().await;
        plugin.format_escalation_message(username, escalation_id, support_handle)
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
