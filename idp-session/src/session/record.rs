//! Session record and per-session login information

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use zeroize::Zeroizing;

/// How and when the user authenticated with a given method
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationMethodInformation {
    /// Authentication method identifier (e.g. a SAML AuthnContextClassRef)
    pub authentication_method: String,

    /// Name of the principal that authenticated
    pub principal_name: Option<String>,

    /// When authentication took place
    pub authentication_instant: DateTime<Utc>,

    /// How long the authentication may be reused, if bounded
    #[serde(default, with = "optional_millis")]
    pub authentication_duration: Option<Duration>,
}

impl AuthenticationMethodInformation {
    /// Authentication with `authentication_method`, performed now
    pub fn new(authentication_method: impl Into<String>) -> Self {
        Self {
            authentication_method: authentication_method.into(),
            principal_name: None,
            authentication_instant: Utc::now(),
            authentication_duration: None,
        }
    }

    /// Set the principal the method authenticated
    pub fn with_principal(mut self, principal_name: impl Into<String>) -> Self {
        self.principal_name = Some(principal_name.into());
        self
    }

    /// Bound how long the authentication may be reused
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.authentication_duration = Some(duration);
        self
    }

    /// Instant after which this authentication can no longer be reused
    pub fn expiration_instant(&self) -> Option<DateTime<Utc>> {
        self.authentication_duration
            .map(|duration| saturating_add(self.authentication_instant, duration))
    }

    /// Whether the reuse window has passed; unbounded authentications never expire
    pub fn is_expired(&self) -> bool {
        self.expiration_instant()
            .map(|expires| Utc::now() > expires)
            .unwrap_or(false)
    }
}

/// Login record for one relying party within a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInformation {
    /// Relying party entity ID
    pub entity_id: String,

    /// When the user was logged into this service
    pub authentication_instant: DateTime<Utc>,

    /// Method used to authenticate for this service
    pub authentication_method: AuthenticationMethodInformation,

    /// Subject identifier released to this service
    pub subject_identifier: Option<String>,
}

impl ServiceInformation {
    /// Login to `entity_id`, made now
    pub fn new(
        entity_id: impl Into<String>,
        authentication_method: AuthenticationMethodInformation,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            authentication_instant: Utc::now(),
            authentication_method,
            subject_identifier: None,
        }
    }

    /// Set the subject identifier released to the service
    pub fn with_subject_identifier(mut self, subject_identifier: impl Into<String>) -> Self {
        self.subject_identifier = Some(subject_identifier.into());
        self
    }
}

/// One authenticated browser session
///
/// Identity and secret are fixed at creation. Everything else sits behind
/// its own lock so one request can share its copy across tasks. A `Session`
/// handed out by the manager is a copy of the stored record; changes reach
/// the store through `SessionManager::save_session` or
/// `SessionManager::update_session`.
pub struct Session {
    session_id: String,
    secret: Zeroizing<Vec<u8>>,
    creation_instant: DateTime<Utc>,
    last_activity_instant: RwLock<DateTime<Utc>>,
    inactivity_timeout: Duration,
    principal_name: RwLock<Option<String>>,
    authentication_methods: RwLock<HashMap<String, AuthenticationMethodInformation>>,
    services_information: RwLock<HashMap<String, ServiceInformation>>,
}

impl Session {
    pub(crate) fn new(
        session_id: String,
        secret: Zeroizing<Vec<u8>>,
        inactivity_timeout: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            secret,
            creation_instant: now,
            last_activity_instant: RwLock::new(now),
            inactivity_timeout,
            principal_name: RwLock::new(None),
            authentication_methods: RwLock::new(HashMap::new()),
            services_information: RwLock::new(HashMap::new()),
        }
    }

    /// Primary ID
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Secret used to sign this session's cookies
    pub fn secret(&self) -> &[u8] {
        &self.secret
    }

    /// When the session was created
    pub fn creation_instant(&self) -> DateTime<Utc> {
        self.creation_instant
    }

    /// Most recent activity; never moves backwards
    pub fn last_activity_instant(&self) -> DateTime<Utc> {
        *read(&self.last_activity_instant)
    }

    /// Idle time after which the session expires
    pub fn inactivity_timeout(&self) -> Duration {
        self.inactivity_timeout
    }

    /// Instant after which the session is expired
    pub fn expiration_instant(&self) -> DateTime<Utc> {
        saturating_add(self.last_activity_instant(), self.inactivity_timeout)
    }

    /// Whether the session has been idle longer than its timeout
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expiration_instant()
    }

    /// Record activity on the session
    ///
    /// Concurrent callers may race; the stored instant never moves backwards.
    pub fn touch(&self) {
        let now = Utc::now();
        let mut last_activity = write(&self.last_activity_instant);
        if now > *last_activity {
            *last_activity = now;
        }
    }

    /// Authenticated principal, once known
    pub fn principal_name(&self) -> Option<String> {
        read(&self.principal_name).clone()
    }

    /// Set the authenticated principal
    pub fn set_principal_name(&self, principal_name: impl Into<String>) {
        *write(&self.principal_name) = Some(principal_name.into());
    }

    /// Record an authentication, replacing any previous entry for the method
    pub fn add_authentication_method(&self, information: AuthenticationMethodInformation) {
        write(&self.authentication_methods)
            .insert(information.authentication_method.clone(), information);
    }

    /// Record for `method`, if the user authenticated with it
    pub fn authentication_method(&self, method: &str) -> Option<AuthenticationMethodInformation> {
        read(&self.authentication_methods).get(method).cloned()
    }

    /// Forget an authentication method
    pub fn remove_authentication_method(
        &self,
        method: &str,
    ) -> Option<AuthenticationMethodInformation> {
        write(&self.authentication_methods).remove(method)
    }

    /// Snapshot of all recorded authentication methods
    pub fn authentication_methods(&self) -> HashMap<String, AuthenticationMethodInformation> {
        read(&self.authentication_methods).clone()
    }

    /// Record a login to a relying party, replacing any previous record
    pub fn add_service_information(&self, information: ServiceInformation) {
        write(&self.services_information).insert(information.entity_id.clone(), information);
    }

    /// Login record for the relying party `entity_id`
    pub fn service_information(&self, entity_id: &str) -> Option<ServiceInformation> {
        read(&self.services_information).get(entity_id).cloned()
    }

    /// Forget the login to a relying party
    pub fn remove_service_information(&self, entity_id: &str) -> Option<ServiceInformation> {
        write(&self.services_information).remove(entity_id)
    }

    /// Snapshot of all per-service login records
    pub fn services_information(&self) -> HashMap<String, ServiceInformation> {
        read(&self.services_information).clone()
    }

    /// Take over the login record of `other`, keeping the later activity instant
    pub(crate) fn absorb(&self, other: &Session) {
        *write(&self.principal_name) = other.principal_name();
        *write(&self.authentication_methods) = other.authentication_methods();
        *write(&self.services_information) = other.services_information();

        let other_activity = other.last_activity_instant();
        let mut last_activity = write(&self.last_activity_instant);
        if other_activity > *last_activity {
            *last_activity = other_activity;
        }
    }
}

impl Clone for Session {
    fn clone(&self) -> Self {
        Self {
            session_id: self.session_id.clone(),
            secret: self.secret.clone(),
            creation_instant: self.creation_instant,
            last_activity_instant: RwLock::new(self.last_activity_instant()),
            inactivity_timeout: self.inactivity_timeout,
            principal_name: RwLock::new(self.principal_name()),
            authentication_methods: RwLock::new(self.authentication_methods()),
            services_information: RwLock::new(self.services_information()),
        }
    }
}

#[derive(Serialize)]
struct StoredSessionRef<'a> {
    session_id: &'a str,
    secret: &'a [u8],
    creation_instant: DateTime<Utc>,
    last_activity_instant: DateTime<Utc>,
    inactivity_timeout_ms: i64,
    principal_name: Option<String>,
    authentication_methods: HashMap<String, AuthenticationMethodInformation>,
    services_information: HashMap<String, ServiceInformation>,
}

#[derive(Deserialize)]
struct StoredSession {
    session_id: String,
    secret: Vec<u8>,
    creation_instant: DateTime<Utc>,
    last_activity_instant: DateTime<Utc>,
    inactivity_timeout_ms: i64,
    #[serde(default)]
    principal_name: Option<String>,
    #[serde(default)]
    authentication_methods: HashMap<String, AuthenticationMethodInformation>,
    #[serde(default)]
    services_information: HashMap<String, ServiceInformation>,
}

impl Serialize for Session {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        StoredSessionRef {
            session_id: &self.session_id,
            secret: &self.secret,
            creation_instant: self.creation_instant,
            last_activity_instant: self.last_activity_instant(),
            inactivity_timeout_ms: self.inactivity_timeout.num_milliseconds(),
            principal_name: self.principal_name(),
            authentication_methods: self.authentication_methods(),
            services_information: self.services_information(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Session {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let stored = StoredSession::deserialize(deserializer)?;
        let inactivity_timeout = Duration::try_milliseconds(stored.inactivity_timeout_ms)
            .ok_or_else(|| {
                <D::Error as serde::de::Error>::custom("inactivity timeout out of range")
            })?;

        Ok(Self {
            session_id: stored.session_id,
            secret: Zeroizing::new(stored.secret),
            creation_instant: stored.creation_instant,
            last_activity_instant: RwLock::new(stored.last_activity_instant),
            inactivity_timeout,
            principal_name: RwLock::new(stored.principal_name),
            authentication_methods: RwLock::new(stored.authentication_methods),
            services_information: RwLock::new(stored.services_information),
        })
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("secret", &"[REDACTED]")
            .field("creation_instant", &self.creation_instant)
            .field("last_activity_instant", &self.last_activity_instant())
            .field("inactivity_timeout", &self.inactivity_timeout)
            .field("principal_name", &self.principal_name())
            .finish()
    }
}

fn saturating_add(instant: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    instant
        .checked_add_signed(duration)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `Option<Duration>` as whole milliseconds
mod optional_millis {
    use chrono::Duration;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&duration.num_milliseconds()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<i64>::deserialize(deserializer)?
            .map(|ms| {
                Duration::try_milliseconds(ms)
                    .ok_or_else(|| D::Error::custom("duration out of range"))
            })
            .transpose()
    }
}

// Poisoned locks are still read; every write is a single insert or store.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn session(timeout: Duration) -> Session {
        Session::new(
            "abc123".to_string(),
            Zeroizing::new(vec![7u8; 16]),
            timeout,
        )
    }

    #[test]
    fn test_new_session_is_live() {
        let session = session(Duration::minutes(30));

        assert_eq!(session.session_id(), "abc123");
        assert_eq!(session.creation_instant(), session.last_activity_instant());
        assert!(!session.is_expired());
        assert_eq!(
            session.expiration_instant(),
            session.last_activity_instant() + Duration::minutes(30)
        );
    }

    #[test]
    fn test_touch_never_moves_backwards() {
        let session = session(Duration::minutes(30));
        let before = session.last_activity_instant();

        std::thread::sleep(std::time::Duration::from_millis(5));
        session.touch();

        assert!(session.last_activity_instant() > before);
    }

    #[test]
    fn test_unbounded_timeout_saturates() {
        let session = session(Duration::MAX);

        assert_eq!(session.expiration_instant(), DateTime::<Utc>::MAX_UTC);
        assert!(!session.is_expired());

        let method =
            AuthenticationMethodInformation::new("password").with_duration(Duration::MAX);
        assert_eq!(method.expiration_instant(), Some(DateTime::<Utc>::MAX_UTC));
        assert!(!method.is_expired());
    }

    #[test]
    fn test_clone_is_independent() {
        let original = session(Duration::minutes(30));
        let copy = original.clone();

        copy.set_principal_name("bob");
        assert_eq!(original.principal_name(), None);
        assert_eq!(copy.secret(), original.secret());
    }

    #[test]
    fn test_serde_keeps_record() {
        let original = session(Duration::minutes(30));
        original.set_principal_name("alice");
        let method = AuthenticationMethodInformation::new("password")
            .with_principal("alice")
            .with_duration(Duration::hours(8));
        original.add_authentication_method(method.clone());
        original.add_service_information(
            ServiceInformation::new("https://sp.example.org", method.clone())
                .with_subject_identifier("opaque"),
        );

        let json = serde_json::to_string(&original).unwrap();
        let restored: Session = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.session_id(), original.session_id());
        assert_eq!(restored.secret(), original.secret());
        assert_eq!(restored.creation_instant(), original.creation_instant());
        assert_eq!(restored.last_activity_instant(), original.last_activity_instant());
        assert_eq!(restored.inactivity_timeout(), Duration::minutes(30));
        assert_eq!(restored.principal_name().as_deref(), Some("alice"));
        assert_eq!(restored.authentication_method("password"), Some(method));
        assert_eq!(restored.services_information(), original.services_information());
    }

    #[test]
    fn test_absorb_keeps_later_activity() {
        let stored = session(Duration::minutes(30));
        let edited = stored.clone();
        edited.set_principal_name("alice");

        std::thread::sleep(std::time::Duration::from_millis(5));
        stored.touch();
        let touched = stored.last_activity_instant();

        stored.absorb(&edited);
        assert_eq!(stored.principal_name().as_deref(), Some("alice"));
        assert_eq!(stored.last_activity_instant(), touched);
    }

    #[test]
    fn test_debug_redacts_secret() {
        let session = session(Duration::minutes(30));
        let debug = format!("{:?}", session);

        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("[7, 7"));
    }

    #[test]
    fn test_authentication_methods() {
        let session = session(Duration::minutes(30));
        let method = AuthenticationMethodInformation::new(
            "urn:oasis:names:tc:SAML:2.0:ac:classes:PasswordProtectedTransport",
        )
        .with_principal("alice");

        session.add_authentication_method(method.clone());
        assert_eq!(
            session.authentication_method(&method.authentication_method),
            Some(method.clone())
        );
        assert_eq!(session.authentication_methods().len(), 1);

        assert!(session
            .remove_authentication_method(&method.authentication_method)
            .is_some());
        assert!(session.authentication_methods().is_empty());
    }

    #[test]
    fn test_authentication_method_expiry() {
        let unbounded = AuthenticationMethodInformation::new("password");
        assert!(unbounded.expiration_instant().is_none());
        assert!(!unbounded.is_expired());

        let mut stale = AuthenticationMethodInformation::new("password")
            .with_duration(Duration::minutes(5));
        stale.authentication_instant = Utc::now() - Duration::minutes(10);
        assert!(stale.is_expired());
    }

    #[test]
    fn test_services_information_per_relying_party() {
        let session = session(Duration::minutes(30));
        let method = AuthenticationMethodInformation::new("password");

        session.add_service_information(
            ServiceInformation::new("https://sp1.example.org", method.clone())
                .with_subject_identifier("opaque-1"),
        );
        session.add_service_information(ServiceInformation::new(
            "https://sp2.example.org",
            method,
        ));

        assert_eq!(session.services_information().len(), 2);
        assert_eq!(
            session
                .service_information("https://sp1.example.org")
                .and_then(|s| s.subject_identifier),
            Some("opaque-1".to_string())
        );
        assert!(session.remove_service_information("https://sp2.example.org").is_some());
        assert!(session.service_information("https://sp2.example.org").is_none());
    }

    #[test]
    fn test_concurrent_map_updates() {
        let session = Arc::new(session(Duration::minutes(30)));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let session = Arc::clone(&session);
                std::thread::spawn(move || {
                    for j in 0..50 {
                        let entity = format!("https://sp{i}-{j}.example.org");
                        session.add_service_information(ServiceInformation::new(
                            entity,
                            AuthenticationMethodInformation::new("password"),
                        ));
                        session.touch();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(session.services_information().len(), 400);
    }
}
