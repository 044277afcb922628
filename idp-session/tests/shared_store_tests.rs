//! Session behaviour over a store that keeps only serialized copies
//!
//! `JsonStore` holds every value as a JSON string, the way a store shared
//! between IdP nodes would, so nothing survives unless it is written back.

use async_trait::async_trait;
use saml_idp_session::{
    AuthenticationMethodInformation, ExpiringObject, ServiceInformation, SessionConfig,
    SessionCookieCodec, SessionIndexEntry, SessionManager, StorageError, StorageService,
};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

struct JsonStore<V> {
    partitions: RwLock<HashMap<String, HashMap<String, String>>>,
    _values: PhantomData<fn() -> V>,
}

impl<V> JsonStore<V> {
    fn new() -> Self {
        Self {
            partitions: RwLock::new(HashMap::new()),
            _values: PhantomData,
        }
    }
}

fn encode<V: Serialize>(value: &V) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn decode<V: DeserializeOwned>(json: &str) -> Result<V, StorageError> {
    serde_json::from_str(json).map_err(|e| StorageError::Serialization(e.to_string()))
}

#[async_trait]
impl<V> StorageService<V> for JsonStore<V>
where
    V: ExpiringObject + Serialize + DeserializeOwned,
{
    async fn put(&self, partition: &str, key: &str, value: V) -> Result<Option<V>, StorageError> {
        let json = encode(&value)?;
        let mut partitions = self.partitions.write().await;
        partitions
            .entry(partition.to_string())
            .or_default()
            .insert(key.to_string(), json)
            .map(|previous| decode(&previous))
            .transpose()
    }

    async fn put_if_absent(
        &self,
        partition: &str,
        key: &str,
        value: V,
    ) -> Result<Option<V>, StorageError> {
        let json = encode(&value)?;
        let mut partitions = self.partitions.write().await;
        let entries = partitions.entry(partition.to_string()).or_default();
        if let Some(existing) = entries.get(key) {
            return decode(existing).map(Some);
        }
        entries.insert(key.to_string(), json);
        Ok(None)
    }

    async fn get(&self, partition: &str, key: &str) -> Result<Option<V>, StorageError> {
        let partitions = self.partitions.read().await;
        partitions
            .get(partition)
            .and_then(|p| p.get(key))
            .map(|json| decode(json.as_str()))
            .transpose()
    }

    async fn remove(&self, partition: &str, key: &str) -> Result<Option<V>, StorageError> {
        let mut partitions = self.partitions.write().await;
        partitions
            .get_mut(partition)
            .and_then(|p| p.remove(key))
            .map(|json| decode(&json))
            .transpose()
    }

    async fn replace_if(
        &self,
        partition: &str,
        key: &str,
        value: V,
        predicate: &(dyn for<'a> Fn(&'a V) -> bool + Send + Sync),
    ) -> Result<Option<V>, StorageError> {
        let json = encode(&value)?;
        let mut partitions = self.partitions.write().await;
        let Some(stored) = partitions.get_mut(partition).and_then(|p| p.get_mut(key)) else {
            return Ok(None);
        };
        let current: V = decode(stored)?;
        if !predicate(&current) {
            return Ok(None);
        }
        *stored = json;
        Ok(Some(current))
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
        let Some(stored) = entries.get(key) else {
            return Ok(None);
        };
        let current: V = decode(stored)?;
        if !predicate(&current) {
            return Ok(None);
        }
        entries.remove(key);
        Ok(Some(current))
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

fn shared_store() -> Arc<JsonStore<SessionIndexEntry>> {
    Arc::new(JsonStore::new())
}

fn node(
    store: &Arc<JsonStore<SessionIndexEntry>>,
    inactivity_timeout_ms: u64,
) -> Arc<SessionManager> {
    let config = SessionConfig {
        inactivity_timeout_ms,
        ..Default::default()
    };
    Arc::new(SessionManager::new(config, store.clone()).unwrap())
}

#[tokio::test]
async fn test_lookups_keep_session_alive() {
    let store = shared_store();
    let manager = node(&store, 300);
    let session = manager.create_session().await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(manager.get_session(session.session_id()).await.unwrap().is_some());

    // Past the original expiry, within one timeout of the last lookup
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(manager.get_session(session.session_id()).await.unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(manager.get_session(session.session_id()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_cookies_keep_session_alive() {
    let store = shared_store();
    let manager = node(&store, 300);
    let codec = SessionCookieCodec::new(manager.clone(), true);
    let session = manager.create_session().await.unwrap();
    let cookie = codec.encode(&session, "192.0.2.7");

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(codec.decode(&cookie, "192.0.2.7").await.unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(codec.decode(&cookie, "192.0.2.7").await.unwrap().is_some());
}

#[tokio::test]
async fn test_destroy_removes_index_keys() {
    let store = shared_store();
    let manager = node(&store, 60_000);
    let session = manager.create_session().await.unwrap();
    assert!(manager.index_session(&session, "idx").await.unwrap());
    assert!(manager.index_session(&session, "name-id").await.unwrap());

    manager.destroy_session(session.session_id()).await.unwrap();

    assert!(!store.contains("session", "idx").await.unwrap());
    assert!(!store.contains("session", "name-id").await.unwrap());
    assert!(store.keys("session").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_removed_index_stays_removed() {
    let store = shared_store();
    let manager = node(&store, 60_000);
    let session = manager.create_session().await.unwrap();
    manager.index_session(&session, "idx").await.unwrap();

    manager.remove_session_index("idx").await.unwrap();
    assert!(manager.get_session("idx").await.unwrap().is_none());

    // A later registration by another session is not undone by the first one's destroy
    let other = manager.create_session().await.unwrap();
    assert!(manager.index_session(&other, "idx").await.unwrap());
    manager.destroy_session(session.session_id()).await.unwrap();

    let owner = manager.get_session("idx").await.unwrap().unwrap();
    assert_eq!(owner.session_id(), other.session_id());
}

#[tokio::test]
async fn test_nodes_share_records_and_indexes() {
    let store = shared_store();
    let first = node(&store, 60_000);
    let second = node(&store, 60_000);

    let session = first.create_session().await.unwrap();
    session.set_principal_name("jdoe");
    assert!(first.save_session(&session).await.unwrap());

    let seen = second.get_session(session.session_id()).await.unwrap().unwrap();
    assert_eq!(seen.principal_name().as_deref(), Some("jdoe"));
    assert!(second.index_session(&seen, "_9a1c5f7e2b").await.unwrap());

    let via_index = first.get_session("_9a1c5f7e2b").await.unwrap().unwrap();
    assert_eq!(via_index.session_id(), session.session_id());

    first.destroy_session("_9a1c5f7e2b").await.unwrap();
    assert!(second.get_session(session.session_id()).await.unwrap().is_none());
    assert!(store.keys("session").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_updates_from_two_nodes_are_merged() {
    let store = shared_store();
    let nodes = [node(&store, 60_000), node(&store, 60_000)];
    let session = nodes[0].create_session().await.unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let manager = Arc::clone(&nodes[i % 2]);
            let session_id = session.session_id().to_string();
            tokio::spawn(async move {
                manager
                    .update_session(&session_id, |session| {
                        session.add_service_information(ServiceInformation::new(
                            format!("https://sp{i}.example.org"),
                            AuthenticationMethodInformation::new("password"),
                        ));
                    })
                    .await
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap().unwrap().is_some());
    }

    let found = nodes[1].get_session(session.session_id()).await.unwrap().unwrap();
    assert_eq!(found.services_information().len(), 8);
}
