//! Behaviour when the backing store fails
//!
//! Validation failures read as "no session"; store failures must reach the
//! caller instead of being mistaken for a missing session.

use crate::test_utils::*;
use assert_matches::assert_matches;
use saml_idp_session::{ArtifactError, RelyingParty, SessionError, StorageError};

#[tokio::test]
async fn test_session_operations_surface_store_failures() {
    let idp = IdpHarness::with_defaults();
    let session = idp.manager.create_session().await.unwrap();

    idp.session_store.set_available(false);

    assert_matches!(
        idp.manager.create_session().await,
        Err(SessionError::Storage(StorageError::Unavailable(_)))
    );
    assert_matches!(
        idp.manager.get_session(session.session_id()).await,
        Err(SessionError::Storage(_))
    );
    assert_matches!(
        idp.manager.destroy_session(session.session_id()).await,
        Err(SessionError::Storage(_))
    );
    assert_matches!(
        idp.manager.index_session(&session, "idx").await,
        Err(SessionError::Storage(_))
    );

    idp.session_store.set_available(true);
    assert!(idp
        .manager
        .get_session(session.session_id())
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_cookie_filter_surfaces_store_failures() {
    let idp = IdpHarness::with_defaults();
    let session = idp.manager.create_session().await.unwrap();
    let header = format!("_idp_session={}", idp.filter.codec().encode(&session, "192.0.2.1"));

    // Malformed cookies never touch the store
    idp.session_store.set_available(false);
    let context = idp
        .filter
        .process_request(Some("_idp_session=not-a-cookie"), "192.0.2.1")
        .await
        .unwrap();
    assert!(!context.has_session());

    assert_matches!(
        idp.filter.process_request(Some(&header), "192.0.2.1").await,
        Err(SessionError::Storage(_))
    );
}

#[tokio::test]
async fn test_artifact_operations_surface_store_failures() {
    let idp = IdpHarness::with_defaults();
    let artifact = idp
        .mapper
        .generate_artifact("<saml:Assertion/>", &RelyingParty::new(SP_ENTITY_ID))
        .await
        .unwrap();

    idp.artifact_store.set_available(false);

    assert_matches!(
        idp.mapper
            .generate_artifact("<saml:Assertion/>", &RelyingParty::new(SP_ENTITY_ID))
            .await,
        Err(ArtifactError::Storage(_))
    );
    assert_matches!(
        idp.mapper.recover_assertion(&artifact).await,
        Err(ArtifactError::Storage(_))
    );

    // The failed recovery did not consume the mapping
    idp.artifact_store.set_available(true);
    assert!(idp.mapper.recover_assertion(&artifact).await.unwrap().is_some());
}
