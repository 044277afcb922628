//! Bringing the IdP up from a configuration file

use crate::test_utils::*;
use assert_matches::assert_matches;
use saml_idp_session::artifact::TYPE_CODE_1;
use saml_idp_session::{ConfigError, IdpSessionConfig, RelyingParty};
use std::io::Write;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[tokio::test]
async fn test_harness_from_config_file() {
    let file = write_config(
        r#"
[session]
inactivity_timeout_ms = 120000
partition = "idpSessions"

[cookie]
name = "shib_idp_session"
path = "/idp"

[artifact]
issuer_entity_id = "https://idp.example.org/idp/shibboleth"
partition = "idpArtifacts"
"#,
    );

    let config = IdpSessionConfig::from_file(file.path()).unwrap();
    let idp = IdpHarness::new(config);

    let session = idp.manager.create_session().await.unwrap();
    assert_eq!(idp.session_store.len("idpSessions").await, 1);

    let set_cookie = idp.filter.set_cookie_header(&session, "192.0.2.1");
    assert!(set_cookie.starts_with("shib_idp_session="));

    // No source location configured: type 2 requests fall back to type 1
    let artifact = idp
        .mapper
        .generate_artifact(
            "<saml:Assertion/>",
            &RelyingParty::new(SP_ENTITY_ID).with_artifact_type(0x0002),
        )
        .await
        .unwrap();
    assert_eq!(artifact.type_code(), TYPE_CODE_1);
    assert_eq!(idp.artifact_store.len("idpArtifacts").await, 1);
}

#[test]
fn test_misconfiguration_fails_fast() {
    let missing_issuer = write_config("[session]\ninactivity_timeout_ms = 1000\n");
    assert_matches!(
        IdpSessionConfig::from_file(missing_issuer.path()),
        Err(ConfigError::Artifact(_))
    );

    let required_location = write_config(
        r#"
[artifact]
issuer_entity_id = "https://idp.example.org/idp/shibboleth"
require_source_location = true
"#,
    );
    assert_matches!(
        IdpSessionConfig::from_file(required_location.path()),
        Err(ConfigError::Artifact(_))
    );

    let bad_cookie = write_config(
        r#"
[cookie]
path = "relative"

[artifact]
issuer_entity_id = "https://idp.example.org/idp/shibboleth"
"#,
    );
    assert_matches!(
        IdpSessionConfig::from_file(bad_cookie.path()),
        Err(ConfigError::Session(_))
    );
}
