//! Partitioned storage backend for sessions and artifact mappings
//!
//! The core never owns its state: sessions and artifact mappings live in a
//! [`StorageService`] passed in by the caller. [`MemoryStorageService`] is the
//! single-node implementation; clustered deployments plug in a shared store
//! that provides the same atomic primitives.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

/// Errors reported by a storage backend
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached
    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),

    /// A value could not be encoded for, or decoded from, the backend
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Any other backend failure
    #[error("Storage error: {0}")]
    General(String),
}

/// A stored value that knows when it stops being valid
pub trait ExpiringObject: Clone + Send + Sync + 'static {
    /// Instant after which the object is expired
    fn expiration_instant(&self) -> DateTime<Utc>;

    /// Whether the object is expired right now
    fn is_expired(&self) -> bool {
        Utc::now() > self.expiration_instant()
    }
}

/// Partitioned key-value store with expiration-aware values
///
/// `put_if_absent`, `replace_if` and `remove_if` must be atomic with respect
/// to every other client of the store, including other processes sharing it.
/// Values go in and come out by value; a backend may serialize them.
#[async_trait]
pub trait StorageService<V: ExpiringObject>: Send + Sync {
    /// Store `value`, returning the value it replaced
    async fn put(&self, partition: &str, key: &str, value: V) -> Result<Option<V>, StorageError>;

    /// Store `value` only if `key` is unbound; returns the existing value otherwise
    async fn put_if_absent(
        &self,
        partition: &str,
        key: &str,
        value: V,
    ) -> Result<Option<V>, StorageError>;

    /// Fetch the value bound to `key`, expired or not
    async fn get(&self, partition: &str, key: &str) -> Result<Option<V>, StorageError>;

    /// Remove and return the value bound to `key`
    async fn remove(&self, partition: &str, key: &str) -> Result<Option<V>, StorageError>;

    /// Replace the value bound to `key` only if the current value satisfies
    /// `predicate`; returns the replaced value, `None` when nothing was stored
    async fn replace_if(
        &self,
        partition: &str,
        key: &str,
        value: V,
        predicate: &(dyn for<'a> Fn(&'a V) -> bool + Send + Sync),
    ) -> Result<Option<V>, StorageError>;

    /// Remove the value bound to `key` only if it satisfies `predicate`
    async fn remove_if(
        &self,
        partition: &str,
        key: &str,
        predicate: &(dyn for<'a> Fn(&'a V) -> bool + Send + Sync),
    ) -> Result<Option<V>, StorageError>;

    /// Whether any value is bound to `key`
    async fn contains(&self, partition: &str, key: &str) -> Result<bool, StorageError>;

    /// Snapshot of the keys currently stored in `partition`
    async fn keys(&self, partition: &str) -> Result<Vec<String>, StorageError>;
}

/// In-memory storage implementation
///
/// Values are returned as stored, expired or not; expiration is enforced by
/// the session manager and artifact mapper so that index cleanup runs.
pub struct MemoryStorageService<V> {
    partitions: Arc<RwLock<HashMap<String, HashMap<String, V>>>>,
}

impl<V> MemoryStorageService<V> {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            partitions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of entries in a partition
    pub async fn len(&self, partition: &str) -> usize {
        let partitions = self.partitions.read().await;
        partitions.get(partition).map(|p| p.len()).unwrap_or(0)
    }
}

impl<V> Default for MemoryStorageService<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Clone for MemoryStorageService<V> {
    fn clone(&self) -> Self {
        Self {
            partitions: Arc::clone(&self.partitions),
        }
    }
}

#[async_trait]
impl<V: ExpiringObject> StorageService<V> for MemoryStorageService<V> {
    async fn put(&self, partition: &str, key: &str, value: V) -> Result<Option<V>, StorageError> {
        let mut partitions = self.partitions.write().await;
        Ok(partitions
            .entry(partition.to_string())
            .or_default()
            .insert(key.to_string(), value))
    }

    async fn put_if_absent(
        &self,
        partition: &str,
        key: &str,
        value: V,
    ) -> Result<Option<V>, StorageError> {
        let mut partitions = self.partitions.write().await;
        let entries = partitions.entry(partition.to_string()).or_default();

        if let Some(existing) = entries.get(key) {
            return Ok(Some(existing.clone()));
        }

        entries.insert(key.to_string(), value);
        Ok(None)
    }

    async fn get(&self, partition: &str, key: &str) -> Result<Option<V>, StorageError> {
        let partitions = self.partitions.read().await;
        Ok(partitions.get(partition).and_then(|p| p.get(key)).cloned())
    }

    async fn remove(&self, partition: &str, key: &str) -> Result<Option<V>, StorageError> {
        let mut partitions = self.partitions.write().await;
        let removed = partitions.get_mut(partition).and_then(|p| p.remove(key));
        if removed.is_some() {
            debug!("Removed {}/{}", partition, key);
        }
        Ok(removed)
    }

    async fn replace_if(
        &self,
        partition: &str,
        key: &str,
        value: V,
        predicate: &(dyn for<'a> Fn(&'a V) -> bool + Send + Sync),
    ) -> Result<Option<V>, StorageError> {
        let mut partitions = self.partitions.write().await;
        let Some(entries) = partitions.get_mut(partition) else {
            return Ok(None);
        };

        match entries.get_mut(key) {
            Some(current) if predicate(current) => Ok(Some(std::mem::replace(current, value))),
            _ => Ok(None),
        }
    }

    async fn remove_if(
        &self,
        partition: &str,
        key: &str,
        predicate: &(dyn for<'a> Fn(&'a V) -> bool + Send + Sync),
    ) -> Result<Option<V>, StorageError> {
        let mut partitions = self.partitions.write().await;
        let Some(entries) = partitions.get_mut(partition) else {
            return Ok(None);
        };

        match entries.get(key) {
            Some(value) if predicate(value) => Ok(entries.remove(key)),
            _ => Ok(None),
        }
    }

    async fn contains(&self, partition: &str, key: &str) -> Result<bool, StorageError> {
        let partitions = self.partitions.read().await;
        Ok(partitions
            .get(partition)
            .map(|p| p.contains_key(key))
            .unwrap_or(false))
    }

    async fn keys(&self, partition: &str) -> Result<Vec<String>, StorageError> {
        let partitions = self.partitions.read().await;
        Ok(partitions
            .get(partition)
            .map(|p| p.keys().cloned().collect())
            .unwrap_or_default())
    }
}
