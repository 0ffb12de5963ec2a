//! Client-side persisted state
//!
//! Provides:
//! - The `LocalStore` abstraction over a small string key/value store
//! - An in-memory store (tests, single-process portals)
//! - A Redis-backed store namespaced per client
//!
//! Values are read optimistically: absence and parse failures fall back
//! to defaults at the call site, never to an error.

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use crate::config::StorageConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Keys written by the resolver and settings service
pub mod keys {
    /// `"true"` while a demo identity is active
    pub const DEMO_FLAG: &str = "using_demo_account";

    /// Role of the active demo identity
    pub const DEMO_ROLE: &str = "demo_account_role";

    /// Index of the active demo identity
    pub const DEMO_INDEX: &str = "demo_account_index";

    pub const LAST_ACTIVE_ROLE: &str = "last_active_role";

    pub const LAST_ACTIVE_SCHOOL: &str = "last_active_school";

    /// Prefix of the per-user settings blobs
    pub const USER_SETTINGS: &str = "user_settings";

    /// Backend session held by the hosted client
    pub const AUTH_SESSION: &str = "auth_session";

    /// Keys that describe the demo identity
    pub const DEMO_KEYS: [&str; 3] = [DEMO_FLAG, DEMO_ROLE, DEMO_INDEX];

    /// Everything cleared on sign-out
    pub const SESSION_KEYS: [&str; 5] = [DEMO_FLAG, DEMO_ROLE, DEMO_INDEX, LAST_ACTIVE_ROLE, LAST_ACTIVE_SCHOOL];

    /// JSON blob of one user's settings
    pub fn user_settings(user_id: &str) -> String {
        format!("{}:{}", USER_SETTINGS, user_id)
    }
}

/// String key/value store scoped to one browser client
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Read a value
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a value; removing an absent key is not an error
    async fn remove(&self, key: &str) -> Result<()>;

    /// Check connectivity
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Read a JSON value, treating absence and malformed data as `None`
pub async fn get_json<T: DeserializeOwned>(store: &dyn LocalStore, key: &str) -> Option<T> {
    match store.get(key).await {
        Ok(Some(text)) => match serde_json::from_str(&text) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(key = key, error = %e, "Ignoring unparsable stored value");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            debug!(key = key, error = %e, "Store read failed");
            None
        }
    }
}

/// Write a JSON value
pub async fn set_json<T: Serialize>(store: &dyn LocalStore, key: &str, value: &T) -> Result<()> {
    let text = serde_json::to_string(value)?;
    store.set(key, &text).await
}

/// Opens one store per browser client
///
/// Reopening the same client yields the same contents, so an evicted
/// client finds its persisted state again.
#[derive(Clone)]
pub enum StoreFactory {
    Memory(Arc<Mutex<HashMap<String, Arc<MemoryStore>>>>),
    Redis(RedisStore),
}

impl StoreFactory {
    /// Build the factory described by the storage configuration
    pub async fn from_config(config: &StorageConfig) -> Result<Self> {
        match config.kind.as_str() {
            "memory" => Ok(StoreFactory::memory()),
            "redis" => Ok(StoreFactory::Redis(RedisStore::connect(config).await?)),
            other => Err(AppError::Configuration {
                message: format!("unknown storage kind '{}'", other),
            }),
        }
    }

    /// Process-local stores kept for the life of the factory
    pub fn memory() -> Self {
        StoreFactory::Memory(Arc::new(Mutex::new(HashMap::new())))
    }

    /// Store namespaced to `client`
    pub fn open(&self, client: &str) -> Arc<dyn LocalStore> {
        match self {
            StoreFactory::Memory(stores) => {
                let mut stores = stores.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                let store: Arc<dyn LocalStore> = stores.entry(client.to_string()).or_default().clone();
                store
            }
            StoreFactory::Redis(root) => Arc::new(root.scoped(client)),
        }
    }

    /// Check connectivity of the shared backing store
    pub async fn ping(&self) -> Result<()> {
        match self {
            StoreFactory::Memory(_) => Ok(()),
            StoreFactory::Redis(root) => root.ping().await,
        }
    }
}
