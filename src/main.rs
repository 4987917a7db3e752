// src/main.rs

//! # Fabric OIDC Proxy - Main Entry Point
//!
//! Maps identities authenticated by an OIDC provider onto Hyperledger Fabric
//! identities, provisioning each one on first use, and submits transactions
//! on the caller's behalf.
//!
//! ## Architecture Overview
//! 1. **Services Layer**: HTTP API, authentication, the identity bridge and
//!    the transaction submitter
//! 2. **Blockchain Layer**: Fabric CA client and ledger gateway client
//! 3. **Wallet Layer**: on-disk credential store and key handling
//! 4. **Config Layer**: layered settings and logging
//!
//! ## Configuration
//! Defaults, then `config.yaml` (or `--config`), then environment variables
//! such as `FABRIC__CA__URL`, then command line flags. A `.env` file is
//! loaded first when present.

use crate::blockchain::ca_client::FabricCaClient;
use crate::blockchain::gateway_client::{HttpGateway, NetworkClientFactory};
use crate::config::settings::{init_logger, Overrides, Settings};
use crate::services::api_server::ApiServer;
use crate::services::authenticator::build_authenticator;
use crate::services::identity_bridge::IdentityBridge;
use crate::services::transaction_submitter::TransactionSubmitter;
use crate::wallet::credential_storage::FileCredentialStore;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

// Module declarations (organized by functional domain)
mod blockchain; // Fabric CA and gateway clients
mod config; // Settings and logging
mod error; // Error taxonomy
mod models; // Data structures
mod services; // Business logic and API
mod utils; // Helper functions
mod wallet; // Credential storage and keys

#[cfg(test)]
mod test_support;

/// Fabric OIDC Proxy - Fabric identities for OIDC users
#[derive(Parser)]
#[command(name = "fabric-oidc-proxy")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the proxy server
    Start {
        /// Configuration file (defaults to ./config.yaml when present)
        #[arg(short, long, env = "FABRIC_OIDC_PROXY_CONFIG")]
        config: Option<PathBuf>,

        /// Log level: error, warn, info, debug or trace
        #[arg(long)]
        loglevel: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },
}

/// Main application entry point
///
/// # Initialization Sequence
/// 1. Load `.env` and settings
/// 2. Initialise logging
/// 3. Build the store, CA client, gateway and authenticator
/// 4. Enroll the admin identity if it is not stored yet
/// 5. Start the API server
///
/// # Errors
/// Unreadable settings, bad TLS material or an unbindable port.
#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    let cli = Cli::parse();
    match cli.command {
        Commands::Start { config, loglevel, port } => {
            let overrides = Overrides { loglevel, port };
            let settings = Settings::load(config.as_deref(), &overrides).context("failed to load settings")?;
            init_logger(&settings.loglevel);
            start(settings).await
        }
    }
}

async fn start(settings: Settings) -> Result<()> {
    let ca_settings = settings.fabric.ca.clone();

    let store = Arc::new(FileCredentialStore::new(
        ca_settings.client_home.clone(),
        ca_settings.client_mspdir.clone(),
        settings.fabric.gw.msp_id.clone(),
    ));
    let ca = Arc::new(FabricCaClient::new(&ca_settings).context("failed to build the CA client")?);
    let identity_bridge = Arc::new(IdentityBridge::new(store.clone(), ca, ca_settings.clone()));

    let factory = Arc::new(NetworkClientFactory::new(settings.fabric.gw.clone()));
    let submitter = Arc::new(TransactionSubmitter::new(store, factory, Arc::new(HttpGateway::new())));

    let authenticator = build_authenticator(&settings.oidc).context("failed to build the authenticator")?;

    // A missing admin is retried lazily on the first enrollment
    match identity_bridge.ensure_admin().await {
        Ok(_) => log::info!("Admin identity '{}' ready", ca_settings.admin),
        Err(err) => log::warn!("Admin identity not available yet: {}", err),
    }

    let api_server = ApiServer::new(authenticator, identity_bridge, submitter, ca_settings.oidc_claim_key);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.http.port));
    log::info!("Starting fabric-oidc-proxy on {}", addr);
    api_server
        .run(addr, Duration::from_secs(settings.http.shutdown_grace_secs))
        .await
        .context("server error")?;

    log::info!("Server stopped");
    Ok(())
}
