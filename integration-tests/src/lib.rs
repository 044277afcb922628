//! Integration tests for the SAML IdP session layer
//!
//! These scenarios drive the session manager, cookie filter and artifact
//! mapper together the way an IdP front end would during single sign-on.

#![allow(unused_imports)] // Allow unused imports in integration tests
#![allow(clippy::uninlined_format_args)] // Allow traditional format strings in tests

pub mod config_scenarios;
pub mod end_to_end_scenarios;
pub mod storage_failure_scenarios;

/// Common test utilities for integration tests
pub mod test_utils {
    use async_trait::async_trait;
    use saml_idp_session::{
        ArtifactConfig, ArtifactMapper, ArtifactMapping, CookieConfig, ExpiringObject,
        IdpSessionConfig, MemoryStorageService, SessionConfig, SessionFilter, SessionIndexEntry,
        SessionManager, StorageError, StorageService,
    };
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    pub const IDP_ENTITY_ID: &str = "https://idp.example.org/idp/shibboleth";
    pub const SP_ENTITY_ID: &str = "https://sp.example.org/shibboleth";
    pub const OTHER_SP_ENTITY_ID: &str = "https://wiki.example.org/shibboleth";
    pub const ARTIFACT_RESOLUTION_URL: &str =
        "https://idp.example.org/idp/profile/SAML1/SOAP/ArtifactResolution";

    /// Create a test-friendly configuration
    pub fn test_config() -> IdpSessionConfig {
        IdpSessionConfig {
            session: SessionConfig {
                inactivity_timeout_ms: 60_000,
                ..Default::default()
            },
            cookie: CookieConfig::default(),
            artifact: ArtifactConfig::new(IDP_ENTITY_ID)
                .with_source_location(ARTIFACT_RESOLUTION_URL),
            logging: Default::default(),
        }
    }

    /// The pieces of an IdP front end sharing one set of stores
    pub struct IdpHarness {
        pub manager: Arc<SessionManager>,
        pub filter: SessionFilter,
        pub mapper: ArtifactMapper,
        pub session_store: Arc<FlakyStore<SessionIndexEntry>>,
        pub artifact_store: Arc<FlakyStore<ArtifactMapping>>,
    }

    impl IdpHarness {
        pub fn new(config: IdpSessionConfig) -> Self {
            let session_store = Arc::new(FlakyStore::new());
            let artifact_store = Arc::new(FlakyStore::new());

            let manager = Arc::new(
                SessionManager::new(config.session.clone(), session_store.clone()).unwrap(),
            );
            let filter = SessionFilter::new(manager.clone(), config.cookie.clone()).unwrap();
            let mapper = ArtifactMapper::new(config.artifact.clone(), artifact_store.clone()).unwrap();

            Self {
                manager,
                filter,
                mapper,
                session_store,
                artifact_store,
            }
        }

        pub fn with_defaults() -> Self {
            Self::new(test_config())
        }
    }

    /// Memory store that can be switched into a failing state
    pub struct FlakyStore<V> {
        inner: MemoryStorageService<V>,
        available: AtomicBool,
    }

    impl<V> FlakyStore<V> {
        pub fn new() -> Self {
            Self {
                inner: MemoryStorageService::new(),
                available: AtomicBool::new(true),
            }
        }

        pub fn set_available(&self, available: bool) {
            self.available.store(available, Ordering::SeqCst);
        }

        pub async fn len(&self, partition: &str) -> usize {
            self.inner.len(partition).await
        }

        fn check(&self) -> Result<(), StorageError> {
            if self.available.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(StorageError::Unavailable("store offline".to_string()))
            }
        }
    }

    impl<V> Default for FlakyStore<V> {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl<V: ExpiringObject> StorageService<V> for FlakyStore<V> {
        async fn put(&self, partition: &str, key: &str, value: V) -> Result<Option<V>, StorageError> {
            self.check()?;
            self.inner.put(partition, key, value).await
        }

        async fn put_if_absent(
            &self,
            partition: &str,
            key: &str,
            value: V,
        ) -> Result<Option<V>, StorageError> {
            self.check()?;
            self.inner.put_if_absent(partition, key, value).await
        }

        async fn get(&self, partition: &str, key: &str) -> Result<Option<V>, StorageError> {
            self.check()?;
            self.inner.get(partition, key).await
        }

        async fn remove(&self, partition: &str, key: &str) -> Result<Option<V>, StorageError> {
            self.check()?;
            self.inner.remove(partition, key).await
        }

        async fn replace_if(
            &self,
            partition: &str,
            key: &str,
            value: V,
            predicate: &(dyn for<'a> Fn(&'a V) -> bool + Send + Sync),
        ) -> Result<Option<V>, StorageError> {
            self.check()?;
            self.inner.replace_if(partition, key, value, predicate).await
        }

        async fn remove_if(
            &self,
            partition: &str,
            key: &str,
            predicate: &(dyn for<'a> Fn(&'a V) -> bool + Send + Sync),
        ) -> Result<Option<V>, StorageError> {
            self.check()?;
            self.inner.remove_if(partition, key, predicate).await
        }

        async fn contains(&self, partition: &str, key: &str) -> Result<bool, StorageError> {
            self.check()?;
            self.inner.contains(partition, key).await
        }

        async fn keys(&self, partition: &str) -> Result<Vec<String>, StorageError> {
            self.check()?;
            self.inner.keys(partition).await
        }
    }

    /// Value of the cookie carried in a `Set-Cookie` header
    pub fn cookie_from_set_cookie(set_cookie: &str) -> String {
        let pair = set_cookie.split(';').next().unwrap_or_default();
        pair.split_once('=')
            .map(|(_, value)| value.to_string())
            .unwrap_or_default()
    }

    /// Wait for a condition with timeout
    pub async fn wait_for_condition<F, Fut>(
        mut condition: F,
        timeout_duration: Duration,
        check_interval: Duration,
    ) -> Result<(), Box<dyn std::error::Error>>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout_duration {
            if condition().await {
                return Ok(());
            }
            tokio::time::sleep(check_interval).await;
        }
        Err("Condition timeout".into())
    }
}
