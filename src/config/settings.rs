// src/config/settings.rs
//! Layered service configuration.
//!
//! Values are merged, lowest priority first, from built-in defaults, an
//! optional YAML file (`config.yaml` in the working directory or the
//! `--config` path), environment variables and command-line overrides.
//! Environment keys use `__` between sections, e.g. `FABRIC__CA__URL` or
//! `HTTP__PORT`.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete service configuration. Read-only after startup.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub loglevel: String,
    pub http: HttpSettings,
    pub oidc: OidcSettings,
    pub fabric: FabricSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpSettings {
    pub port: u16,
    /// Time in-flight requests get to finish after a shutdown signal
    pub shutdown_grace_secs: u64,
}

/// How bearer tokens are validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// RFC 7662 token introspection against the issuer
    Introspection,
    /// Local JWT signature verification
    Jwt,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OidcSettings {
    pub mode: AuthMode,
    pub issuer: String,
    pub client_id: String,
    pub client_secret: String,
    /// `HS256`, `RS256` or `ES256`
    pub jwt_algorithm: String,
    /// Shared secret for HS256
    pub jwt_secret: Option<String>,
    /// PEM public key for RS256/ES256
    pub jwt_public_key: Option<PathBuf>,
    pub audience: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FabricSettings {
    pub ca: CaSettings,
    pub gw: GatewaySettings,
}

/// Certificate authority client and identity bridge settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CaSettings {
    pub url: String,
    pub client_home: PathBuf,
    pub client_mspdir: String,
    /// Client certificate for mutual TLS with the CA
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub tls_trusted_certs: PathBuf,
    pub admin: String,
    pub admin_secret: String,
    /// Claim path holding the registration request
    pub oidc_claim_key: String,
    pub enrollment_profile: String,
    pub ca_name: Option<String>,
    pub default_identity_type: String,
    pub default_affiliation: String,
    pub registration_retry_attempts: u32,
    pub registration_retry_delay_ms: u64,
    pub request_timeout_secs: u64,
}

impl CaSettings {
    pub fn registration_retry_delay(&self) -> Duration {
        Duration::from_millis(self.registration_retry_delay_ms)
    }
}

/// Ledger gateway connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySettings {
    pub msp_id: String,
    pub tls_trusted_certs: PathBuf,
    pub peer_endpoint: String,
    pub peer_server_name_override: String,
    pub connect_timeout_secs: u64,
    pub evaluate_timeout_secs: u64,
    pub endorse_timeout_secs: u64,
    pub submit_timeout_secs: u64,
    pub commit_status_timeout_secs: u64,
}

/// Command-line values that take precedence over every other source.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub loglevel: Option<String>,
    pub port: Option<u16>,
}

impl Settings {
    /// Loads settings from all sources.
    ///
    /// # Arguments
    /// * `path` - Explicit configuration file; must exist when given
    /// * `overrides` - Values from the command line
    ///
    /// # Errors
    /// Returns a `ConfigError` for unreadable files or values of the wrong type.
    pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<Self, ConfigError> {
        Self::build(path, None, overrides)
    }

    fn build(
        path: Option<&Path>,
        env: Option<HashMap<String, String>>,
        overrides: &Overrides,
    ) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name("config").required(false),
        };

        Config::builder()
            .set_default("loglevel", "info")?
            .set_default("http.port", 8080)?
            .set_default("http.shutdown_grace_secs", 5)?
            .set_default("oidc.mode", "introspection")?
            .set_default("oidc.issuer", "")?
            .set_default("oidc.client_id", "")?
            .set_default("oidc.client_secret", "")?
            .set_default("oidc.jwt_algorithm", "RS256")?
            .set_default("fabric.ca.url", "http://localhost:7054")?
            .set_default("fabric.ca.client_home", "fabric")?
            .set_default("fabric.ca.client_mspdir", "msp")?
            .set_default("fabric.ca.tls_trusted_certs", "fabric/tls/ca.crt")?
            .set_default("fabric.ca.admin", "admin")?
            .set_default("fabric.ca.admin_secret", "adminpw")?
            .set_default("fabric.ca.oidc_claim_key", "fabric")?
            .set_default("fabric.ca.enrollment_profile", "tls")?
            .set_default("fabric.ca.default_identity_type", "client")?
            .set_default("fabric.ca.default_affiliation", "")?
            .set_default("fabric.ca.registration_retry_attempts", 5)?
            .set_default("fabric.ca.registration_retry_delay_ms", 200)?
            .set_default("fabric.ca.request_timeout_secs", 30)?
            .set_default("fabric.gw.msp_id", "Org1MSP")?
            .set_default("fabric.gw.tls_trusted_certs", "fabric/tls/ca.crt")?
            .set_default("fabric.gw.peer_endpoint", "dns:///127.0.0.1:7051")?
            .set_default("fabric.gw.peer_server_name_override", "peer0.org1")?
            .set_default("fabric.gw.connect_timeout_secs", 5)?
            .set_default("fabric.gw.evaluate_timeout_secs", 5)?
            .set_default("fabric.gw.endorse_timeout_secs", 15)?
            .set_default("fabric.gw.submit_timeout_secs", 5)?
            .set_default("fabric.gw.commit_status_timeout_secs", 60)?
            .add_source(file)
            .add_source(
                Environment::default()
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .set_override_option("loglevel", overrides.loglevel.clone())?
            .set_override_option("http.port", overrides.port)?
            .build()?
            .try_deserialize()
    }
}

/// Initialises `env_logger` at the configured level. `RUST_LOG` wins when set.
pub fn init_logger(level: &str) {
    let env = env_logger::Env::default().default_filter_or(level);
    if env_logger::Builder::from_env(env).try_init().is_err() {
        log::debug!("Logger already initialised");
    }
}
