use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;

const UPDATE_CHANNEL_CAPACITY: usize = 64;

/// Sent to subscribers whenever an upsert changed at least one mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCacheUpdate {
    pub connection_id: String,
    pub changed: Vec<String>,
}

struct ModelCacheInner {
    entries: Mutex<HashMap<String, String>>,
    updates: broadcast::Sender<ModelCacheUpdate>,
}

/// Model name to connection id mapping shared by resolvers and pickers.
///
/// Entries are only added or overwritten, never removed, and live as long as
/// the last handle.
#[derive(Clone)]
pub struct ModelCache {
    inner: Arc<ModelCacheInner>,
}

impl ModelCache {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(ModelCacheInner {
                entries: Mutex::new(HashMap::new()),
                updates,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, model: &str) -> Option<String> {
        self.lock().get(model).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot of all `(model, connection id)` pairs, sorted by model name.
    pub fn entries(&self) -> Vec<(String, String)> {
        let mut entries: Vec<(String, String)> = self
            .lock()
            .iter()
            .map(|(model, id)| (model.clone(), id.clone()))
            .collect();
        entries.sort();
        entries
    }

    /// Maps every model to `connection_id` and returns the names whose mapping
    /// was added or changed. Subscribers are notified only when that list is
    /// non-empty.
    pub fn upsert_models<S: AsRef<str>>(&self, connection_id: &str, models: &[S]) -> Vec<String> {
        let mut changed = Vec::new();
        {
            let mut entries = self.lock();
            for model in models {
                let model = model.as_ref();
                if entries.get(model).map(String::as_str) == Some(connection_id) {
                    continue;
                }
                entries.insert(model.to_string(), connection_id.to_string());
                changed.push(model.to_string());
            }
        }
        if !changed.is_empty() {
            let _ = self.inner.updates.send(ModelCacheUpdate {
                connection_id: connection_id.to_string(),
                changed: changed.clone(),
            });
        }
        changed
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ModelCacheUpdate> {
        self.inner.updates.subscribe()
    }
}

impl Default for ModelCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCache")
            .field("entries", &self.len())
            .finish()
    }
}
