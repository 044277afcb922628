//! Command-line helper for operating the IdP session layer
//!
//! Generates identifiers, decodes artifacts and session cookies seen in logs
//! or traces, and checks configuration files before deployment.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use saml_idp_session::{
    crypto::{self, OsRandomSource},
    session::DecodedCookie,
    Artifact, IdpSessionConfig, LogFormat, LoggingConfig,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process;
use tracing::error;

#[derive(Parser)]
#[command(name = "idp-session-cli")]
#[command(about = "SAML IdP session and artifact utility")]
#[command(version)]
struct Cli {
    /// Output format (json, table)
    #[arg(short, long, default_value = "table")]
    format: String,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate session identifiers
    SessionId {
        /// Number of identifiers to generate
        #[arg(short, long, default_value_t = 1)]
        count: usize,
    },

    /// Decode a base64 SAML artifact
    DecodeArtifact {
        /// Artifact as received from the relying party
        artifact: String,
    },

    /// Show the fields of a session cookie without verifying it
    InspectCookie {
        /// Raw (URL encoded) cookie value
        cookie: String,
    },

    /// Validate a configuration file
    CheckConfig {
        /// Path to the TOML configuration
        path: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let logging = LoggingConfig::new(
        if cli.verbose { "debug" } else { "warn" },
        LogFormat::Compact,
    );
    if let Err(e) = logging.initialize() {
        eprintln!("Failed to initialize logging: {e}");
    }

    let result = match &cli.command {
        Commands::SessionId { count } => session_ids(&cli, *count),
        Commands::DecodeArtifact { artifact } => decode_artifact(&cli, artifact),
        Commands::InspectCookie { cookie } => inspect_cookie(&cli, cookie),
        Commands::CheckConfig { path } => check_config(&cli, path),
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        process::exit(1);
    }
}

fn session_ids(cli: &Cli, count: usize) -> Result<()> {
    crypto::init(&OsRandomSource).context("random source unusable")?;

    let ids = (0..count)
        .map(|_| crypto::generate_session_id(&OsRandomSource))
        .collect::<Result<Vec<_>, _>>()?;

    if cli.format == "json" {
        println!("{}", serde_json::to_string_pretty(&ids)?);
    } else {
        for id in ids {
            println!("{id}");
        }
    }
    Ok(())
}

fn decode_artifact(cli: &Cli, encoded: &str) -> Result<()> {
    let artifact = Artifact::from_base64(encoded).context("not a valid SAML artifact")?;
    print_details(cli, &artifact_details(&artifact))
}

fn inspect_cookie(cli: &Cli, cookie: &str) -> Result<()> {
    let decoded = DecodedCookie::parse(cookie).context("not a valid session cookie")?;
    print_details(cli, &cookie_details(&decoded))
}

fn check_config(cli: &Cli, path: &Path) -> Result<()> {
    let config = IdpSessionConfig::from_file(path)
        .with_context(|| format!("invalid configuration in {}", path.display()))?;
    print_details(cli, &config_details(&config))
}

fn artifact_details(artifact: &Artifact) -> Value {
    match artifact {
        Artifact::Type1 {
            source_id,
            assertion_handle,
        } => json!({
            "type_code": "0x0001",
            "source_id": hex::encode(source_id),
            "assertion_handle": hex::encode(assertion_handle),
        }),
        Artifact::Type2 {
            assertion_handle,
            source_location,
        } => json!({
            "type_code": "0x0002",
            "assertion_handle": hex::encode(assertion_handle),
            "source_location": source_location,
        }),
        Artifact::Type4 {
            endpoint_index,
            source_id,
            message_handle,
        } => json!({
            "type_code": "0x0004",
            "endpoint_index": endpoint_index,
            "source_id": hex::encode(source_id),
            "message_handle": hex::encode(message_handle),
        }),
    }
}

fn cookie_details(cookie: &DecodedCookie) -> Value {
    json!({
        "remote_address": cookie.remote_address,
        "session_id": cookie.session_id,
        "signature": hex::encode(&cookie.signature),
        "verified": false,
    })
}

fn config_details(config: &IdpSessionConfig) -> Value {
    let source_id = crypto::sha1_digest(config.artifact.issuer_entity_id.as_bytes());
    json!({
        "status": "ok",
        "inactivity_timeout_ms": config.session.inactivity_timeout_ms,
        "session_partition": config.session.partition,
        "cleanup_interval_secs": config.session.cleanup_interval_secs,
        "cookie_name": config.cookie.name,
        "consistent_address": config.cookie.consistent_address,
        "issuer_entity_id": config.artifact.issuer_entity_id,
        "artifact_source_id": hex::encode(source_id),
        "artifact_source_location": config.artifact.source_location,
        "artifact_partition": config.artifact.partition,
    })
}

fn print_details(cli: &Cli, details: &Value) -> Result<()> {
    if cli.format == "json" {
        println!("{}", serde_json::to_string_pretty(details)?);
        return Ok(());
    }

    if let Some(fields) = details.as_object() {
        for (name, value) in fields {
            let value = match value {
                Value::String(s) => s.clone(),
                Value::Null => "-".to_string(),
                other => other.to_string(),
            };
            println!("{:<26} {}", name, value);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TYPE_1_ARTIFACT: &str = "AAGqqqqqqqqqqqqqqqqqqqqqqqqqqru7u7u7u7u7u7u7u7u7u7u7u7u7";
    const TYPE_2_ARTIFACT: &str =
        "AALMzMzMzMzMzMzMzMzMzMzMzMzMzGh0dHBzOi8vaWRwLmV4YW1wbGUub3JnL2Fycw==";

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("idp-session-cli").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_decode_type_1_artifact() {
        let artifact = Artifact::from_base64(TYPE_1_ARTIFACT).unwrap();
        let details = artifact_details(&artifact);

        assert_eq!(details["type_code"], "0x0001");
        assert_eq!(details["source_id"], "aa".repeat(20));
        assert_eq!(details["assertion_handle"], "bb".repeat(20));

        let cli = cli(&["--format", "json", "decode-artifact", TYPE_1_ARTIFACT]);
        assert!(decode_artifact(&cli, TYPE_1_ARTIFACT).is_ok());
    }

    #[test]
    fn test_decode_type_2_artifact() {
        let artifact = Artifact::from_base64(TYPE_2_ARTIFACT).unwrap();
        let details = artifact_details(&artifact);

        assert_eq!(details["type_code"], "0x0002");
        assert_eq!(details["assertion_handle"], "cc".repeat(20));
        assert_eq!(details["source_location"], "https://idp.example.org/ars");
        assert!(details.get("source_id").is_none());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let cli = cli(&["decode-artifact", "not-an-artifact"]);
        let err = decode_artifact(&cli, "not-an-artifact").unwrap_err();
        assert!(format!("{err:#}").contains("not a valid SAML artifact"));
    }

    #[test]
    fn test_inspect_cookie() {
        let cookie = "MTkyLjAuMi4x%7CYWJj%7CAQID";
        let details = cookie_details(&DecodedCookie::parse(cookie).unwrap());

        assert_eq!(details["remote_address"], "192.0.2.1");
        assert_eq!(details["session_id"], "abc");
        assert_eq!(details["signature"], "010203");
        assert_eq!(details["verified"], false);

        let cli = cli(&["inspect-cookie", cookie]);
        assert!(inspect_cookie(&cli, cookie).is_ok());
        assert!(inspect_cookie(&cli, "MTkyLjAuMi4x%7CYWJj").is_err());
    }

    #[test]
    fn test_check_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[artifact]").unwrap();
        writeln!(file, "issuer_entity_id = \"https://idp.example.org/idp/shibboleth\"").unwrap();

        let config = IdpSessionConfig::from_file(file.path()).unwrap();
        let details = config_details(&config);
        assert_eq!(details["status"], "ok");
        assert_eq!(
            details["artifact_source_id"],
            hex::encode(crypto::sha1_digest(b"https://idp.example.org/idp/shibboleth"))
        );

        let cli = cli(&["check-config", "unused.toml"]);
        assert!(check_config(&cli, file.path()).is_ok());
        assert!(check_config(&cli, Path::new("/nonexistent/idp-session.toml")).is_err());
    }
}
