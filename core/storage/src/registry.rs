//! Store registry for resolving a record store by name.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::memory::MemoryStore;
use crate::sqlite::SqliteStore;
use crate::store::RecordStore;
use expensync_common::{Error, Result};

/// Builds a store from its JSON configuration.
pub type StoreFactory = Box<dyn Fn(Value) -> Result<Arc<dyn RecordStore>> + Send + Sync>;

/// Record store backends by name.
pub struct StoreRegistry {
    factories: HashMap<String, StoreFactory>,
}

impl StoreRegistry {
    fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a backend. A later registration under the same name replaces
    /// the earlier one.
    pub fn register(&mut self, name: impl Into<String>, factory: StoreFactory) {
        self.factories.insert(name.into(), factory);
    }

    /// Open the backend `name` with `config`.
    ///
    /// # Errors
    /// - `InvalidInput` naming the available backends if `name` is unknown
    /// - Whatever the backend reports for a bad configuration
    pub fn resolve(&self, name: &str, config: Value) -> Result<Arc<dyn RecordStore>> {
        let Some(factory) = self.factories.get(name) else {
            return Err(Error::InvalidInput(format!(
                "Unknown store '{}', expected one of: {}",
                name,
                self.stores().join(", ")
            )));
        };
        factory(config)
    }

    /// Registered backend names, sorted.
    pub fn stores(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Create a registry with the built-in stores.
///
/// - `memory`: no configuration
/// - `sqlite`: `{"path": "<file>"}`, or no path for an in-memory database
pub fn create_default_registry() -> StoreRegistry {
    let mut registry = StoreRegistry::new();

    registry.register(
        "memory",
        Box::new(|_config: Value| Ok(Arc::new(MemoryStore::new()) as Arc<dyn RecordStore>)),
    );

    registry.register(
        "sqlite",
        Box::new(|config: Value| {
            let store = match config.get("path") {
                None | Some(Value::Null) => SqliteStore::in_memory()?,
                Some(Value::String(path)) => SqliteStore::open(path)?,
                Some(other) => {
                    return Err(Error::InvalidInput(format!(
                        "sqlite 'path' must be a string, got {}",
                        other
                    )))
                }
            };
            Ok(Arc::new(store) as Arc<dyn RecordStore>)
        }),
    );

    registry
}
