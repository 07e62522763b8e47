use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::{join_all, BoxFuture, FutureExt, Shared};
use tracing::debug;

use crate::model_cache::ModelCache;
use crate::models::{HttpModelLister, ModelLister, ModelListerRef};
use crate::registry::{cached_connection_models, ConnectionModel};
use crate::types::Connection;

type RefreshFuture = Shared<BoxFuture<'static, ()>>;

struct InflightRefresh {
    generation: u64,
    future: RefreshFuture,
}

/// Answers "which connection serves model X", probing model-listing
/// endpoints only on a cache miss.
pub struct ConnectionResolver {
    cache: ModelCache,
    lister: ModelListerRef,
    inflight: Mutex<HashMap<String, InflightRefresh>>,
    next_generation: AtomicU64,
}

impl ConnectionResolver {
    pub fn new(cache: ModelCache) -> Self {
        Self::with_lister(cache, Arc::new(HttpModelLister::new()))
    }

    pub fn with_lister(cache: ModelCache, lister: ModelListerRef) -> Self {
        Self {
            cache,
            lister,
            inflight: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    /// Cache-only lookup; never touches the network.
    pub fn resolve_cached(&self, connections: &[Connection], model: &str) -> Option<Connection> {
        let connection_id = self.cache.get(model)?;
        connections
            .iter()
            .find(|connection| connection.id() == connection_id)
            .cloned()
    }

    /// Returns the connection serving `model`, refreshing the cache from every
    /// connection when the cached answer is missing or points at a connection
    /// that is no longer configured. `None` means no connection serves it.
    pub async fn resolve_connection_for_model(
        &self,
        connections: &[Connection],
        model: &str,
    ) -> Option<Connection> {
        if let Some(connection) = self.resolve_cached(connections, model) {
            return Some(connection);
        }
        if connections.is_empty() {
            return None;
        }

        debug!(model = %model, connections = connections.len(), "model cache miss");
        self.refresh(connections).await;
        self.resolve_cached(connections, model)
    }

    /// Probes every connection concurrently and records what each one serves.
    ///
    /// Failed probes are logged and skipped. Overlapping calls for the same
    /// connection set share a single round of probes.
    pub async fn refresh(&self, connections: &[Connection]) {
        let key = connection_set_key(connections);
        let (generation, future) = {
            let mut inflight = self.lock_inflight();
            if let Some(existing) = inflight.get(&key) {
                (existing.generation, existing.future.clone())
            } else {
                let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
                let future = probe_all(
                    self.cache.clone(),
                    Arc::clone(&self.lister),
                    connections.to_vec(),
                )
                .boxed()
                .shared();
                inflight.insert(
                    key.clone(),
                    InflightRefresh {
                        generation,
                        future: future.clone(),
                    },
                );
                (generation, future)
            }
        };

        future.await;

        let mut inflight = self.lock_inflight();
        if inflight
            .get(&key)
            .is_some_and(|entry| entry.generation == generation)
        {
            inflight.remove(&key);
        }
    }

    /// Picker view of the current cache.
    pub fn cached_connection_models(&self, connections: &[Connection]) -> Vec<ConnectionModel> {
        cached_connection_models(&self.cache, connections)
    }

    pub async fn get_all_available_models_and_update_cache(
        &self,
        connections: &[Connection],
    ) -> Vec<ConnectionModel> {
        self.refresh(connections).await;
        self.cached_connection_models(connections)
    }

    fn lock_inflight(&self) -> MutexGuard<'_, HashMap<String, InflightRefresh>> {
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn connection_set_key(connections: &[Connection]) -> String {
    connections
        .iter()
        .map(Connection::id)
        .collect::<Vec<_>>()
        .join("\n")
}

async fn probe_all(cache: ModelCache, lister: ModelListerRef, connections: Vec<Connection>) {
    let probes = connections
        .iter()
        .map(|connection| probe(&cache, lister.as_ref(), connection));
    join_all(probes).await;
}

async fn probe(cache: &ModelCache, lister: &dyn ModelLister, connection: &Connection) {
    let connection_id = connection.id();
    match lister.list_models(connection).await {
        Ok(models) => {
            let changed = cache.upsert_models(&connection_id, &models);
            debug!(
                connection = %connection_id,
                models = models.len(),
                changed = changed.len(),
                "model probe finished"
            );
        }
        Err(error) => {
            debug!(connection = %connection_id, error = %error, "model probe failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_set_key_is_order_sensitive() {
        let a = Connection::openai("https://a", "");
        let b = Connection::openai("https://b", "");
        assert_ne!(
            connection_set_key(&[a.clone(), b.clone()]),
            connection_set_key(&[b, a])
        );
    }

    #[test]
    fn resolve_cached_ignores_unconfigured_connections() {
        let cache = ModelCache::new();
        cache.upsert_models("OpenAIhttps://elsewhere", &["m"]);
        let resolver = ConnectionResolver::new(cache);
        assert!(resolver
            .resolve_cached(&[Connection::openai("https://a", "")], "m")
            .is_none());
    }
}
