//! Redis-backed store
//!
//! Keys are laid out as `<prefix>:<client>:<key>` and expire after the
//! configured TTL so abandoned clients do not accumulate.

use super::LocalStore;
use crate::config::StorageConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use tracing::debug;

/// Redis store client; cloning shares the multiplexed connection
#[derive(Clone)]
pub struct RedisStore {
    connection: MultiplexedConnection,
    namespace: String,
    ttl_secs: u64,
}

impl RedisStore {
    /// Connect using the storage configuration; the result is unscoped
    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        let client = Client::open(config.redis_url.as_str())
            .map_err(|e| AppError::Storage {
                message: format!("Failed to create Redis client: {}", e)
            })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::Storage {
                message: format!("Failed to connect to Redis: {}", e),
            })?;

        Ok(Self {
            connection,
            namespace: config.key_prefix.clone(),
            ttl_secs: config.ttl_secs,
        })
    }

    /// Store whose keys live under this store's namespace plus `client`
    pub fn scoped(&self, client: &str) -> Self {
        Self {
            connection: self.connection.clone(),
            namespace: format!("{}:{}", self.namespace, client),
            ttl_secs: self.ttl_secs,
        }
    }

    /// Build a prefixed key
    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }
}

#[async_trait]
impl LocalStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let full_key = self.key(key);
        let mut conn = self.connection.clone();

        let value: Option<String> = conn.get(&full_key).await
            .map_err(|e| AppError::Storage {
                message: format!("Failed to get key '{}': {}", full_key, e),
            })?;

        debug!(key = %full_key, hit = value.is_some(), "Store get");
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let full_key = self.key(key);
        let mut conn = self.connection.clone();

        conn.set_ex::<_, _, ()>(&full_key, value, self.ttl_secs)
            .await
            .map_err(|e| AppError::Storage {
                message: format!("Failed to set key '{}': {}", full_key, e),
            })?;

        debug!(key = %full_key, ttl_secs = self.ttl_secs, "Store set");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let full_key = self.key(key);
        let mut conn = self.connection.clone();

        let deleted: i32 = conn.del(&full_key).await
            .map_err(|e| AppError::Storage {
                message: format!("Failed to delete key '{}': {}", full_key, e),
            })?;

        debug!(key = %full_key, deleted = deleted > 0, "Store delete");
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| AppError::Storage {
                message: format!("Redis ping failed: {}", e),
            })?;
        Ok(())
    }
}
