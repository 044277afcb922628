//! End-to-end single sign-on scenarios

use crate::test_utils::*;
use saml_idp_session::artifact::TYPE_CODE_2;
use saml_idp_session::{
    AuthenticationMethodInformation, DestroyReason, RelyingParty, ServiceInformation,
    SessionConfig, SessionEvent,
};
use std::sync::Arc;
use std::time::Duration;

const PASSWORD: &str = "urn:oasis:names:tc:SAML:2.0:ac:classes:PasswordProtectedTransport";
const BROWSER: &str = "192.0.2.44";

#[tokio::test]
async fn test_login_then_sso_to_second_service() {
    let idp = IdpHarness::with_defaults();

    // First visit: no cookie, user authenticates, IdP issues the session cookie
    let context = idp.filter.process_request(None, BROWSER).await.unwrap();
    assert!(!context.has_session());

    let session = idp.manager.create_session().await.unwrap();
    session.set_principal_name("jdoe");
    let method = AuthenticationMethodInformation::new(PASSWORD)
        .with_principal("jdoe")
        .with_duration(chrono::Duration::hours(8));
    session.add_authentication_method(method.clone());
    session.add_service_information(
        ServiceInformation::new(SP_ENTITY_ID, method.clone()).with_subject_identifier("jdoe@sp"),
    );
    assert!(idp.manager.save_session(&session).await.unwrap());

    let set_cookie = idp.filter.set_cookie_header(&session, BROWSER);
    let cookie_header = format!("_shibsession=abc; _idp_session={}", cookie_from_set_cookie(&set_cookie));

    // Second service: the browser comes back with the cookie and is not prompted again
    let context = idp
        .filter
        .process_request(Some(&cookie_header), BROWSER)
        .await
        .unwrap();
    let resumed = context.session.expect("session should resolve from cookie");
    assert_eq!(resumed.session_id(), session.session_id());
    assert_eq!(resumed.principal_name().as_deref(), Some("jdoe"));
    assert!(!resumed.authentication_method(PASSWORD).unwrap().is_expired());

    resumed.add_service_information(ServiceInformation::new(OTHER_SP_ENTITY_ID, method));
    assert!(idp.manager.save_session(&resumed).await.unwrap());

    let stored = idp
        .manager
        .get_session(session.session_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.services_information().len(), 2);
}

#[tokio::test]
async fn test_artifact_profile_round_trip() {
    let idp = IdpHarness::with_defaults();
    let session = idp.manager.create_session().await.unwrap();
    let assertion = format!(
        "<saml:Assertion><saml:Subject>{}</saml:Subject></saml:Assertion>",
        session.session_id()
    );

    // Front channel: artifact goes to the browser
    let rp = RelyingParty::new(SP_ENTITY_ID).with_artifact_type(TYPE_CODE_2);
    let artifact = idp.mapper.generate_artifact(assertion.clone(), &rp).await.unwrap();
    let on_the_wire = artifact.to_base64();

    // Back channel: the service provider resolves it
    let mapping = idp.mapper.recover_encoded(&on_the_wire).await.unwrap().unwrap();
    assert!(mapping.is_correct_provider(SP_ENTITY_ID));
    assert_eq!(mapping.assertion(), assertion);

    // Replay is refused
    assert!(idp.mapper.recover_encoded(&on_the_wire).await.unwrap().is_none());
    assert_eq!(idp.artifact_store.len("artifactStore").await, 0);
}

#[tokio::test]
async fn test_artifact_stolen_by_other_provider() {
    let idp = IdpHarness::with_defaults();
    let artifact = idp
        .mapper
        .generate_artifact("<saml:Assertion/>", &RelyingParty::new(SP_ENTITY_ID))
        .await
        .unwrap();

    // The wrong provider resolves first; the mapping is consumed but must not be honoured
    let mapping = idp.mapper.recover_assertion(&artifact).await.unwrap().unwrap();
    assert!(!mapping.is_correct_provider(OTHER_SP_ENTITY_ID));

    // and the rightful owner can no longer use it
    assert!(idp.mapper.recover_assertion(&artifact).await.unwrap().is_none());
}

#[tokio::test]
async fn test_logout_by_session_index() {
    let idp = IdpHarness::with_defaults();
    let mut events = idp.manager.subscribe();

    let session = idp.manager.create_session().await.unwrap();
    let cookie = idp.filter.codec().encode(&session, BROWSER);
    let session_index = "_9a1c5f7e2b";
    assert!(idp.manager.index_session(&session, session_index).await.unwrap());

    // Logout request arrives from a service provider carrying only the index
    let target = idp.manager.get_session(session_index).await.unwrap().unwrap();
    idp.manager.destroy_session(target.session_id()).await.unwrap();

    let context = idp
        .filter
        .process_request(Some(&format!("_idp_session={cookie}")), BROWSER)
        .await
        .unwrap();
    assert!(context.should_clear_cookie());
    assert!(idp.filter.clear_cookie_header().contains("Max-Age=0"));
    assert_eq!(idp.session_store.len("session").await, 0);

    let mut saw_destroyed = false;
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::Destroyed { session_id, reason } = event {
            assert_eq!(session_id, session.session_id());
            assert_eq!(reason, DestroyReason::Explicit);
            saw_destroyed = true;
        }
    }
    assert!(saw_destroyed);
}

#[tokio::test]
async fn test_idle_browser_must_log_in_again() {
    let mut config = test_config();
    config.session = SessionConfig {
        inactivity_timeout_ms: 1000,
        ..Default::default()
    };
    let idp = IdpHarness::new(config);

    let session = idp.manager.create_session().await.unwrap();
    let header = format!("_idp_session={}", idp.filter.codec().encode(&session, BROWSER));

    tokio::time::sleep(Duration::from_millis(1001)).await;

    let context = idp.filter.process_request(Some(&header), BROWSER).await.unwrap();
    assert!(!context.has_session());
    assert_eq!(idp.session_store.len("session").await, 0);
}

#[tokio::test]
async fn test_parallel_requests_share_one_session() {
    let idp = Arc::new(IdpHarness::with_defaults());
    let session = idp.manager.create_session().await.unwrap();
    let header = format!("_idp_session={}", idp.filter.codec().encode(&session, BROWSER));

    let mut handles = Vec::new();
    for i in 0..8 {
        let idp = Arc::clone(&idp);
        let header = header.clone();
        handles.push(tokio::spawn(async move {
            let context = idp.filter.process_request(Some(&header), BROWSER).await.unwrap();
            let session = context.session.unwrap();
            idp.manager
                .update_session(session.session_id(), |session| {
                    session.add_service_information(ServiceInformation::new(
                        format!("https://sp{i}.example.org"),
                        AuthenticationMethodInformation::new(PASSWORD),
                    ));
                })
                .await
                .unwrap()
                .is_some()
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap());
    }

    let stored = idp
        .manager
        .get_session(session.session_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.services_information().len(), 8);
}

#[tokio::test]
async fn test_background_sweep_reclaims_idle_sessions() {
    let mut config = test_config();
    config.session = SessionConfig {
        inactivity_timeout_ms: 10,
        cleanup_interval_secs: Some(1),
        ..Default::default()
    };
    let idp = IdpHarness::new(config);
    let _cleanup = idp.manager.start_cleanup_task().unwrap();

    for _ in 0..5 {
        idp.manager.create_session().await.unwrap();
    }

    let store = idp.session_store.clone();
    wait_for_condition(
        move || {
            let store = store.clone();
            async move { store.len("session").await == 0 }
        },
        Duration::from_secs(3),
        Duration::from_millis(100),
    )
    .await
    .unwrap();
}
