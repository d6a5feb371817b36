use std::collections::HashMap;
use std::sync::Arc;

use loom_core::ConfigError;

use super::provider::ContextProvider;
use super::providers;

/// Registry of context providers, keyed by id.
///
/// Constructed and passed explicitly; there is no process-wide instance.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ContextProvider>>,
    order: Vec<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider.
    ///
    /// Re-registering the same instance is a no-op; a different instance
    /// under an existing id is rejected.
    pub fn register(&mut self, provider: Arc<dyn ContextProvider>) -> Result<(), ConfigError> {
        let id = provider.id().trim().to_string();
        if id.is_empty() {
            return Err(ConfigError::MissingProviderId);
        }
        if let Some(existing) = self.providers.get(&id) {
            if Arc::ptr_eq(existing, &provider) {
                return Ok(());
            }
            return Err(ConfigError::DuplicateProvider(id));
        }
        self.order.push(id.clone());
        let _ = self.providers.insert(id, provider);
        Ok(())
    }

    /// Get a provider by id.
    pub fn get(&self, id: &str) -> Option<Arc<dyn ContextProvider>> {
        self.providers.get(id).map(Arc::clone)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.providers.contains_key(id)
    }

    /// All providers in insertion order.
    pub fn entries(&self) -> Vec<(String, Arc<dyn ContextProvider>)> {
        self.order
            .iter()
            .filter_map(|id| self.providers.get(id).map(|p| (id.clone(), Arc::clone(p))))
            .collect()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// A fresh registry holding every built-in provider.
pub fn default_registry() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    for provider in providers::builtin() {
        // Built-in ids are distinct and non-empty.
        if let Err(e) = registry.register(provider) {
            tracing::error!(error = %e, "built-in provider rejected");
        }
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Named(&'static str);

    #[async_trait]
    impl ContextProvider for Named {
        fn id(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn register_and_get() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(Named("tasks"))).unwrap();
        assert!(registry.get("tasks").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn empty_id_rejected() {
        let mut registry = ProviderRegistry::new();
        assert_eq!(
            registry.register(Arc::new(Named("  "))),
            Err(ConfigError::MissingProviderId)
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn same_instance_is_idempotent() {
        let mut registry = ProviderRegistry::new();
        let provider: Arc<dyn ContextProvider> = Arc::new(Named("goals"));
        registry.register(provider.clone()).unwrap();
        registry.register(provider).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.ids(), vec!["goals"]);
    }

    #[test]
    fn different_instance_same_id_rejected() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(Named("goals"))).unwrap();
        assert_eq!(
            registry.register(Arc::new(Named("goals"))),
            Err(ConfigError::DuplicateProvider("goals".into()))
        );
    }

    #[test]
    fn entries_in_insertion_order() {
        let mut registry = ProviderRegistry::new();
        for id in ["zeta", "alpha", "mid"] {
            registry.register(Arc::new(Named(id))).unwrap();
        }
        let ids: Vec<String> = registry.entries().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn default_registry_is_fresh_per_call() {
        let mut first = default_registry();
        let second = default_registry();
        first.register(Arc::new(Named("extra"))).unwrap();
        assert!(first.contains("extra"));
        assert!(!second.contains("extra"));
        for id in [
            "pendingError",
            "userQuery",
            "goals",
            "tasks",
            "taskProgress",
            "memory",
            "reasoning",
            "executions",
            "vault",
            "iteration",
        ] {
            assert!(second.contains(id), "missing {id}");
        }
    }
}
