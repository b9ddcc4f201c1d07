//! Store registry for resolving a configured backend by name.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::store::DocumentStore;
use lockbox_common::{Error, Result};

/// Factory function type for creating stores.
pub type StoreFactory = Box<dyn Fn(Value) -> Result<Arc<dyn DocumentStore>> + Send + Sync>;

/// Registry for document store factories.
pub struct StoreRegistry {
    factories: HashMap<String, StoreFactory>,
}

impl StoreRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Create a registry with the bundled stores (`memory`, `local`).
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        registry.factories.insert(
            "memory".to_string(),
            Box::new(|_config| Ok(Arc::new(crate::memory::MemoryStore::new()))),
        );

        registry.factories.insert(
            "local".to_string(),
            Box::new(|config| {
                let root = config
                    .get("root")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        Error::InvalidInput("Local store requires 'root' path".to_string())
                    })?;
                Ok(Arc::new(crate::local::LocalStore::new(root)?))
            }),
        );

        registry
    }

    /// Register a store factory.
    ///
    /// # Errors
    /// - Returns error if name is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: StoreFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::InvalidInput(format!(
                "Store '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Resolve a store by name and configuration.
    ///
    /// # Errors
    /// - Store not registered
    /// - Configuration invalid
    pub fn resolve(&self, name: &str, config: Value) -> Result<Arc<dyn DocumentStore>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("Store '{}' is not registered", name)))?;
        factory(config)
    }

}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
