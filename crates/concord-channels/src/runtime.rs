use std::any::Any;
use std::sync::Arc;

use dashmap::DashMap;

/// Service locator handed to each plugin so it can reach shared services
/// (follow-up coordinator, staff resolver, escalation service) by name
/// without the channels crate depending on those crates directly (§4.5).
///
/// Lookups are optional by design: a plugin running without a registered
/// service for a given name must degrade gracefully rather than fail.
#[derive(Clone, Default)]
pub struct PluginRuntime {
    services: Arc<DashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl PluginRuntime {
    pub fn new() -> Self {
        Self { services: Arc::new(DashMap::new()) }
    }

    pub fn register<T: Any + Send + Sync>(&self, name: impl Into<String>, service: Arc<T>) {
        self.services.insert(name.into(), service as Arc<dyn Any + Send + Sync>);
    }

    /// Resolve a previously registered service by name and type. Returns
    /// `None` both when the name is absent and when the stored type doesn't
    /// match `T` — both are "missing service" as far as a caller is concerned.
    pub fn lookup<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.services.get(name).and_then(|entry| entry.value().clone().downcast::<T>().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo(String);

    #[test]
    fn lookup_returns_registered_service() {
        let runtime = PluginRuntime::new();
        runtime.register("echo", Arc::new(Echo("hi".to_string())));
        let found = runtime.lookup::<Echo>("echo").unwrap();
        assert_eq!(found.0, "hi");
    }

    #[test]
    fn missing_service_returns_none() {
        let runtime = PluginRuntime::new();
        assert!(runtime.lookup::<Echo>("missing").is_none());
    }
}
