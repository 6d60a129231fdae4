//! Visited-request store
//!
//! Provides:
//! - `VisitedStore` trait keyed by a request fingerprint
//! - Redis-backed implementation with TTL and key prefix
//! - In-memory implementation for tests and single-process runs

use crate::config::VisitedConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// "Already visited" store used by the fetch layer
#[async_trait]
pub trait VisitedStore: Send + Sync {
    /// Whether the fingerprint was recorded before
    async fn is_visited(&self, key: &str) -> Result<bool>;

    /// Record the fingerprint
    async fn mark_visited(&self, key: &str) -> Result<()>;
}

/// Redis visited store
pub struct RedisVisitedStore {
    connection: Mutex<ConnectionManager>,
    key_prefix: String,
    ttl_secs: u64,
}

impl RedisVisitedStore {
    /// Connect to Redis
    pub async fn new(url: &str, config: &VisitedConfig) -> Result<Self> {
        let client = Client::open(url).map_err(|e| AppError::CacheError {
            message: format!("Failed to create Redis client: {}", e),
        })?;

        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to connect to Redis: {}", e),
            })?;

        Ok(Self {
            connection: Mutex::new(connection),
            key_prefix: config.key_prefix.clone(),
            ttl_secs: config.ttl_secs,
        })
    }

    /// Build a prefixed key
    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }
}

#[async_trait]
impl VisitedStore for RedisVisitedStore {
    async fn is_visited(&self, key: &str) -> Result<bool> {
        let full_key = self.key(key);
        let mut conn = self.connection.lock().await;

        let exists: bool = conn.exists(&full_key).await.map_err(|e| AppError::CacheError {
            message: format!("Failed to check key '{}': {}", full_key, e),
        })?;

        debug!(key = %full_key, exists, "Visited lookup");
        Ok(exists)
    }

    async fn mark_visited(&self, key: &str) -> Result<()> {
        let full_key = self.key(key);
        let mut conn = self.connection.lock().await;

        conn.set_ex::<_, _, ()>(&full_key, 1u8, self.ttl_secs)
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to set key '{}': {}", full_key, e),
            })?;

        Ok(())
    }
}

/// In-process visited store
#[derive(Default)]
pub struct MemoryVisitedStore {
    keys: RwLock<HashSet<String>>,
}

impl MemoryVisitedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.keys.read().await.len()
    }
}

#[async_trait]
impl VisitedStore for MemoryVisitedStore {
    async fn is_visited(&self, key: &str) -> Result<bool> {
        Ok(self.keys.read().await.contains(key))
    }

    async fn mark_visited(&self, key: &str) -> Result<()> {
        self.keys.write().await.insert(key.to_string());
        Ok(())
    }
}

/// Build the configured visited store
pub async fn create_visited_store(config: &VisitedConfig) -> Result<Arc<dyn VisitedStore>> {
    match config.redis_url.as_deref() {
        Some(url) => Ok(Arc::new(RedisVisitedStore::new(url, config).await?)),
        None => {
            debug!("No Redis URL configured, using in-memory visited store");
            Ok(Arc::new(MemoryVisitedStore::new()))
        }
    }
}
