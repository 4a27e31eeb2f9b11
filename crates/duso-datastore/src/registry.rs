use crate::error::DatastoreError;
use crate::store::{Datastore, DatastoreConfig};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Process-wide mapping from namespace to [`Datastore`]. The first call to
/// create a namespace wins: later calls with the same name and a
/// different configuration silently reuse the existing store, matching
/// the registry's documented "first wins" contract.
#[derive(Default)]
pub struct Registry {
    stores: Mutex<HashMap<String, Arc<Datastore>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the existing store for `namespace`, or creates it with
    /// `config` if this is the first call. If an autosave period is
    /// configured, a background task is spawned that periodically
    /// snapshots the store to disk.
    pub fn get_or_create(
        &self,
        namespace: &str,
        config: DatastoreConfig,
    ) -> Result<Arc<Datastore>, DatastoreError> {
        let mut stores = self.stores.lock();
        if let Some(existing) = stores.get(namespace) {
            return Ok(existing.clone());
        }
        let autosave = config.autosave_period;
        let store = Arc::new(Datastore::new(namespace.to_string(), config)?);
        if let Some(period) = autosave {
            spawn_autosave(Arc::downgrade(&store), period);
        }
        stores.insert(namespace.to_string(), store.clone());
        info!(namespace, "datastore namespace created");
        Ok(store)
    }

    /// Looks up an already-created namespace without creating it.
    pub fn get(&self, namespace: &str) -> Option<Arc<Datastore>> {
        self.stores.lock().get(namespace).cloned()
    }

    /// Saves every namespace that has a persistence path configured.
    /// Called once at process shutdown so in-memory state from the final
    /// interval isn't lost.
    pub fn save_all(&self) {
        for (name, store) in self.stores.lock().iter() {
            if let Err(e) = store.save() {
                if !matches!(e, DatastoreError::NoPersistencePath) {
                    warn!(namespace = name.as_str(), error = %e, "failed to save datastore on shutdown");
                }
            }
        }
    }
}

fn spawn_autosave(store: std::sync::Weak<Datastore>, period: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let Some(store) = store.upgrade() else {
                break;
            };
            if let Err(e) = store.save() {
                warn!(namespace = store.name(), error = %e, "autosave failed");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_config_wins() {
        let registry = Registry::new();
        let a = registry
            .get_or_create("job_A", DatastoreConfig::default())
            .unwrap();
        let b = registry
            .get_or_create(
                "job_A",
                DatastoreConfig {
                    read_only: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        // the second call's `read_only: true` must have been ignored.
        assert!(a.set("k", duso_value::Value::Number(1.0)).is_ok());
    }
}
