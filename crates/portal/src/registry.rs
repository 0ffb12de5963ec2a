//! Per-client resolver registry
//!
//! Every browser client gets its own backend client, namespaced store and
//! session resolver. Entries idle longer than the configured timeout are
//! dropped by a periodic sweep.

use campus_common::{
    backend::{Backend, BackendFactory},
    config::AppConfig,
    errors::Result,
    metrics,
    storage::{MemoryStore, StoreFactory},
    SessionResolver,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

struct Entry {
    resolver: SessionResolver,
    last_seen: Instant,
}

pub struct ClientRegistry {
    clients: RwLock<HashMap<Uuid, Entry>>,
    backends: BackendFactory,
    stores: StoreFactory,
    config: Arc<AppConfig>,
}

impl ClientRegistry {
    pub fn new(config: Arc<AppConfig>, backends: BackendFactory, stores: StoreFactory) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            backends,
            stores,
            config,
        }
    }

    /// Resolver for `client_id`, created and bootstrapped on first sight
    pub async fn get_or_create(&self, client_id: Uuid) -> Result<SessionResolver> {
        let mut clients = self.clients.write().await;
        if let Some(entry) = clients.get_mut(&client_id) {
            entry.last_seen = Instant::now();
            return Ok(entry.resolver.clone());
        }

        let store = self.stores.open(&client_id.to_string());
        let resolver = SessionResolver::from_config((self.backends)(store.clone()), store, &self.config)?;

        // Subscribe before the first load so no auth event is missed
        resolver.start();
        let loader = resolver.clone();
        tokio::spawn(async move { loader.load_session().await });

        clients.insert(
            client_id,
            Entry {
                resolver: resolver.clone(),
                last_seen: Instant::now(),
            },
        );
        metrics::set_active_clients(clients.len());
        debug!(client_id = %client_id, "Registered client");

        Ok(resolver)
    }

    /// Drop clients not seen for `idle`; returns how many were removed
    pub async fn evict_idle(&self, idle: Duration) -> usize {
        let mut clients = self.clients.write().await;
        let before = clients.len();
        clients.retain(|_, entry| entry.last_seen.elapsed() < idle);
        let evicted = before - clients.len();

        metrics::set_active_clients(clients.len());
        if evicted > 0 {
            info!(evicted, remaining = clients.len(), "Evicted idle clients");
        }
        evicted
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Backend client for health probes
    pub fn probe(&self) -> Arc<dyn Backend> {
        (self.backends)(Arc::new(MemoryStore::new()))
    }

    pub fn stores(&self) -> &StoreFactory {
        &self.stores
    }
}
