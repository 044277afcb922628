//! Session cookie validation through the filter and codec

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use saml_idp_session::{
    CookieConfig, CookieRejection, SessionConfig, SessionFilter, SessionIndexEntry,
    SessionManager, MemoryStorageService,
};
use std::sync::Arc;

fn filter(consistent_address: bool, inactivity_timeout_ms: u64) -> SessionFilter {
    let storage: Arc<MemoryStorageService<SessionIndexEntry>> =
        Arc::new(MemoryStorageService::new());
    let manager = SessionManager::new(
        SessionConfig {
            inactivity_timeout_ms,
            ..Default::default()
        },
        storage,
    )
    .unwrap();

    SessionFilter::new(
        Arc::new(manager),
        CookieConfig {
            consistent_address,
            ..Default::default()
        },
    )
    .unwrap()
}

fn split(cookie: &str) -> Vec<String> {
    urlencoding::decode(cookie)
        .unwrap()
        .split('|')
        .map(str::to_string)
        .collect()
}

fn join(fields: &[String]) -> String {
    urlencoding::encode(&fields.join("|")).into_owned()
}

#[tokio::test]
async fn test_cookie_wire_format() {
    let filter = filter(true, 60_000);
    let session = filter.session_manager().create_session().await.unwrap();

    let fields = split(&filter.codec().encode(&session, "203.0.113.7"));
    assert_eq!(fields.len(), 3);
    assert_eq!(BASE64.decode(&fields[0]).unwrap(), b"203.0.113.7");
    assert_eq!(
        BASE64.decode(&fields[1]).unwrap(),
        session.session_id().as_bytes()
    );
    assert_eq!(BASE64.decode(&fields[2]).unwrap().len(), 20);
}

#[tokio::test]
async fn test_cookie_round_trip_and_address_binding() {
    let filter = filter(true, 60_000);
    let session = filter.session_manager().create_session().await.unwrap();
    let cookie = filter.codec().encode(&session, "203.0.113.7");

    let resolved = filter
        .codec()
        .decode(&cookie, "203.0.113.7")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resolved.session_id(), session.session_id());

    assert!(filter
        .codec()
        .decode(&cookie, "198.51.100.1")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_cookie_bound_to_session_secret() {
    let filter = filter(true, 60_000);
    let victim = filter.session_manager().create_session().await.unwrap();
    let attacker = filter.session_manager().create_session().await.unwrap();

    // Attacker's valid signature grafted onto the victim's session ID
    let mut fields = split(&filter.codec().encode(&attacker, "203.0.113.7"));
    fields[1] = BASE64.encode(victim.session_id());

    let rejection = filter
        .codec()
        .validate(&join(&fields), "203.0.113.7")
        .await
        .unwrap()
        .unwrap_err();
    assert_eq!(rejection, CookieRejection::SignatureMismatch);
}

#[tokio::test]
async fn test_expired_session_cookie_is_rejected() {
    let filter = filter(true, 30);
    let session = filter.session_manager().create_session().await.unwrap();
    let header = format!(
        "_idp_session={}",
        filter.codec().encode(&session, "203.0.113.7")
    );

    tokio::time::sleep(std::time::Duration::from_millis(60)).await;

    let context = filter
        .process_request(Some(&header), "203.0.113.7")
        .await
        .unwrap();
    assert!(!context.has_session());
    assert!(context.should_clear_cookie());
}

#[tokio::test]
async fn test_address_check_can_be_disabled() {
    let filter = filter(false, 60_000);
    let session = filter.session_manager().create_session().await.unwrap();
    let header = format!(
        "_idp_session={}",
        filter.codec().encode(&session, "203.0.113.7")
    );

    let context = filter
        .process_request(Some(&header), "198.51.100.1")
        .await
        .unwrap();
    assert_eq!(context.session_id(), Some(session.session_id()));
}
