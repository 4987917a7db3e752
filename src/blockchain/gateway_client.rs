// src/blockchain/gateway_client.rs
//! Fabric gateway client implementation.
//!
//! Provides the per-request network client used to act as one subject:
//! - `NetworkClientFactory` builds a TLS-pinned client bound to a credential
//! - `LedgerGateway` is the capability that evaluates or submits a transaction
//! - `HttpGateway` drives the gateway over HTTP: endorse, submit, commit-status
//!
//! A `NetworkClient` is never pooled or shared. It is created for a single
//! call and dropped afterwards.

use crate::config::settings::GatewaySettings;
use crate::error::{GatewayError, NetworkError, Phase};
use crate::models::credential::Credential;
use crate::utils::crypto::{decode_pem_with_label, hash_data};
use crate::wallet::key_management::KeyManager;
use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

/// Status the gateway reports for a committed, valid transaction.
const COMMIT_VALID: &str = "VALID";

/// Timeout budget for each transaction phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTimeouts {
    pub evaluate: Duration,
    pub endorse: Duration,
    pub submit: Duration,
    pub commit_status: Duration,
}

impl PhaseTimeouts {
    pub fn from_settings(settings: &GatewaySettings) -> Self {
        PhaseTimeouts {
            evaluate: Duration::from_secs(settings.evaluate_timeout_secs),
            endorse: Duration::from_secs(settings.endorse_timeout_secs),
            submit: Duration::from_secs(settings.submit_timeout_secs),
            commit_status: Duration::from_secs(settings.commit_status_timeout_secs),
        }
    }

    pub fn for_phase(&self, phase: Phase) -> Duration {
        match phase {
            Phase::Evaluate => self.evaluate,
            Phase::Endorse => self.endorse,
            Phase::Submit => self.submit,
            Phase::CommitStatus => self.commit_status,
        }
    }
}

/// Network identity attached to every proposal.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SerializedIdentity {
    pub msp_id: String,
    /// Base64 of the PEM certificate
    pub id_bytes: String,
}

/// Single-use client acting as one subject.
pub struct NetworkClient {
    http: reqwest::Client,
    base_url: Url,
    identity: SerializedIdentity,
    signer: KeyManager,
    timeouts: PhaseTimeouts,
}

impl NetworkClient {
    pub fn identity(&self) -> &SerializedIdentity {
        &self.identity
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn timeouts(&self) -> PhaseTimeouts {
        self.timeouts
    }

    fn sign(&self, payload: &[u8], phase: Phase) -> Result<String, GatewayError> {
        self.signer
            .sign_message(payload)
            .map(base64::encode)
            .map_err(|e| GatewayError::InvalidResponse {
                phase,
                message: e.to_string(),
            })
    }
}

/// Resolved peer address.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PeerEndpoint {
    plaintext: bool,
    host: String,
    port: u16,
}

/// Parses `dns:///host:port`, `host:port`, `https://host:port` or
/// `http://host:port`. Only the `http` form disables TLS.
fn parse_endpoint(endpoint: &str) -> Result<PeerEndpoint, NetworkError> {
    let trimmed = endpoint.trim();
    let (plaintext, authority) = if let Some(rest) = trimmed.strip_prefix("http://") {
        (true, rest)
    } else if let Some(rest) = trimmed.strip_prefix("https://") {
        (false, rest)
    } else if let Some(rest) = trimmed.strip_prefix("dns:///") {
        (false, rest)
    } else {
        (false, trimmed)
    };
    let authority = authority.trim_end_matches('/');

    let (host, port) = authority
        .rsplit_once(':')
        .ok_or_else(|| NetworkError::Connection(format!("endpoint '{}' has no port", endpoint)))?;
    let port = port
        .parse::<u16>()
        .map_err(|_| NetworkError::Connection(format!("endpoint '{}' has an invalid port", endpoint)))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(NetworkError::Connection(format!("endpoint '{}' has no host", endpoint)));
    }

    Ok(PeerEndpoint {
        plaintext,
        host: host.to_string(),
        port,
    })
}

async fn resolve(endpoint: &PeerEndpoint) -> Result<SocketAddr, NetworkError> {
    tokio::net::lookup_host((endpoint.host.as_str(), endpoint.port))
        .await
        .map_err(|e| NetworkError::Connection(format!("failed to resolve {}: {}", endpoint.host, e)))?
        .next()
        .ok_or_else(|| NetworkError::Connection(format!("no address found for {}", endpoint.host)))
}

/// Builds per-request network clients from gateway settings.
#[derive(Debug, Clone)]
pub struct NetworkClientFactory {
    settings: GatewaySettings,
}

impl NetworkClientFactory {
    pub fn new(settings: GatewaySettings) -> Self {
        NetworkClientFactory { settings }
    }

    /// Builds a client that acts as `credential`'s subject.
    ///
    /// # Errors
    /// - `UntrustedCertificate` for an unreadable trust anchor or a
    ///   certificate that is not PEM
    /// - `UnparseableKey` when no key encoding matches
    /// - `Connection` when the endpoint cannot be resolved or the client
    ///   cannot be built
    pub async fn build_client(&self, credential: &Credential) -> Result<NetworkClient, NetworkError> {
        let anchor_path = &self.settings.tls_trusted_certs;
        let anchor = tokio::fs::read(anchor_path).await.map_err(|e| {
            NetworkError::UntrustedCertificate(format!("failed to read {}: {}", anchor_path.display(), e))
        })?;
        let anchor_text = String::from_utf8_lossy(&anchor);
        decode_pem_with_label(&anchor_text, "CERTIFICATE")
            .map_err(|e| NetworkError::UntrustedCertificate(format!("trust anchor: {}", e)))?;

        decode_pem_with_label(&credential.certificate_pem, "CERTIFICATE")
            .map_err(|e| NetworkError::UntrustedCertificate(format!("client certificate: {}", e)))?;

        let signer = KeyManager::from_pem(&credential.private_key_pem)?;

        let endpoint = parse_endpoint(&self.settings.peer_endpoint)?;
        let addr = resolve(&endpoint).await?;

        let connect_timeout = Duration::from_secs(self.settings.connect_timeout_secs);
        let builder = reqwest::Client::builder()
            .use_rustls_tls()
            .connect_timeout(connect_timeout);

        let (builder, base_url) = if endpoint.plaintext {
            (builder, format!("http://{}/", addr))
        } else {
            let root = reqwest::Certificate::from_pem(&anchor)
                .map_err(|e| NetworkError::UntrustedCertificate(e.to_string()))?;
            let server_name = if self.settings.peer_server_name_override.is_empty() {
                endpoint.host.clone()
            } else {
                self.settings.peer_server_name_override.clone()
            };
            let builder = builder
                .https_only(true)
                .tls_built_in_root_certs(false)
                .add_root_certificate(root)
                .resolve(&server_name, addr);
            (builder, format!("https://{}:{}/", server_name, addr.port()))
        };

        let http = builder
            .build()
            .map_err(|e| NetworkError::Connection(e.to_string()))?;
        let base_url = Url::parse(&base_url).map_err(|e| NetworkError::Connection(e.to_string()))?;

        log::debug!(
            "Built network client for '{}' ({}) against {}",
            credential.subject,
            signer.algorithm(),
            base_url
        );

        Ok(NetworkClient {
            http,
            base_url,
            identity: SerializedIdentity {
                msp_id: credential.msp_id.clone(),
                id_bytes: base64::encode(credential.certificate_pem.as_bytes()),
            },
            signer,
            timeouts: PhaseTimeouts::from_settings(&self.settings),
        })
    }
}

/// Transaction addressed to a chaincode function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    pub channel: String,
    pub contract: String,
    pub function: String,
    pub args: Vec<String>,
}

/// Ledger gateway capability.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Endorses, orders and waits for the commit of a transaction.
    ///
    /// # Returns
    /// The raw result bytes of the transaction function.
    async fn submit(&self, client: &NetworkClient, request: &TransactionRequest) -> Result<Bytes, GatewayError>;

    /// Runs a read-only query on one peer. Nothing is ordered.
    async fn evaluate(&self, client: &NetworkClient, request: &TransactionRequest) -> Result<Bytes, GatewayError>;
}

// ======================
// HTTP gateway framing
// ======================

#[derive(Serialize)]
struct Proposal<'a> {
    tx_id: &'a str,
    channel_id: &'a str,
    chaincode_id: &'a str,
    function: &'a str,
    args: &'a [String],
    creator: &'a SerializedIdentity,
    nonce: &'a str,
}

#[derive(Serialize)]
struct SignedEnvelope<'a> {
    payload: &'a str,
    signature: String,
}

#[derive(Deserialize)]
struct EvaluateResponse {
    #[serde(default)]
    result: String,
}

#[derive(Deserialize)]
struct EndorseResponse {
    #[serde(default)]
    result: String,
    /// Base64 transaction payload to sign and submit
    transaction: String,
}

#[derive(Serialize)]
struct CommitStatusRequest<'a> {
    tx_id: &'a str,
    identity: &'a SerializedIdentity,
}

#[derive(Deserialize)]
struct CommitStatusResponse {
    status: String,
    #[serde(default)]
    block_number: Option<u64>,
}

/// Signed proposal with its transaction id.
struct PreparedProposal {
    tx_id: String,
    payload: String,
    signature: String,
}

/// HTTP adapter for a Fabric gateway.
#[derive(Debug, Default, Clone)]
pub struct HttpGateway;

impl HttpGateway {
    pub fn new() -> Self {
        HttpGateway
    }

    fn prepare(client: &NetworkClient, request: &TransactionRequest, phase: Phase) -> Result<PreparedProposal, GatewayError> {
        let invalid = |message: String| GatewayError::InvalidResponse { phase, message };

        let nonce = rand::random::<[u8; 24]>();
        let creator = serde_json::to_vec(client.identity()).map_err(|e| invalid(e.to_string()))?;
        let mut seed = nonce.to_vec();
        seed.extend_from_slice(&creator);
        let tx_id = hex::encode(hash_data(&seed));

        let nonce = base64::encode(nonce);
        let proposal = Proposal {
            tx_id: &tx_id,
            channel_id: &request.channel,
            chaincode_id: &request.contract,
            function: &request.function,
            args: &request.args,
            creator: client.identity(),
            nonce: &nonce,
        };
        let bytes = serde_json::to_vec(&proposal).map_err(|e| invalid(e.to_string()))?;
        let signature = client.sign(&bytes, phase)?;

        Ok(PreparedProposal {
            tx_id,
            payload: base64::encode(bytes),
            signature,
        })
    }

    fn url(client: &NetworkClient, segments: &[&str], phase: Phase) -> Result<Url, GatewayError> {
        let mut url = client.base_url().clone();
        url.path_segments_mut()
            .map_err(|_| GatewayError::Connection {
                phase,
                message: format!("cannot route requests under {}", client.base_url()),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn post<B: Serialize + Sync, R: DeserializeOwned>(
        client: &NetworkClient,
        url: Url,
        body: &B,
        phase: Phase,
    ) -> Result<R, GatewayError> {
        let response = client
            .http
            .post(url)
            .timeout(client.timeouts().for_phase(phase))
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::from_reqwest(phase, e))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| GatewayError::from_reqwest(phase, e))?;
        if !status.is_success() {
            return Err(GatewayError::Rejected {
                phase,
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        serde_json::from_slice(&bytes).map_err(|e| GatewayError::InvalidResponse {
            phase,
            message: e.to_string(),
        })
    }

    fn decode_result(result: &str, phase: Phase) -> Result<Bytes, GatewayError> {
        base64::decode(result)
            .map(Bytes::from)
            .map_err(|e| GatewayError::InvalidResponse {
                phase,
                message: format!("result is not base64: {}", e),
            })
    }
}

#[async_trait]
impl LedgerGateway for HttpGateway {
    async fn submit(&self, client: &NetworkClient, request: &TransactionRequest) -> Result<Bytes, GatewayError> {
        let proposal = Self::prepare(client, request, Phase::Endorse)?;

        let url = Self::url(
            client,
            &["gateway", "v1", "channels", &request.channel, "contracts", &request.contract, "endorse"],
            Phase::Endorse,
        )?;
        let envelope = SignedEnvelope {
            payload: &proposal.payload,
            signature: proposal.signature.clone(),
        };
        let endorsed: EndorseResponse = Self::post(client, url, &envelope, Phase::Endorse).await?;
        let result = Self::decode_result(&endorsed.result, Phase::Endorse)?;

        let transaction = base64::decode(&endorsed.transaction).map_err(|e| GatewayError::InvalidResponse {
            phase: Phase::Endorse,
            message: format!("transaction is not base64: {}", e),
        })?;
        let url = Self::url(client, &["gateway", "v1", "channels", &request.channel, "submit"], Phase::Submit)?;
        let envelope = SignedEnvelope {
            payload: &endorsed.transaction,
            signature: client.sign(&transaction, Phase::Submit)?,
        };
        let _: serde_json::Value = Self::post(client, url, &envelope, Phase::Submit).await?;

        let url = Self::url(
            client,
            &["gateway", "v1", "channels", &request.channel, "commit-status"],
            Phase::CommitStatus,
        )?;
        let status_request = CommitStatusRequest {
            tx_id: &proposal.tx_id,
            identity: client.identity(),
        };
        let status: CommitStatusResponse = Self::post(client, url, &status_request, Phase::CommitStatus).await?;
        if status.status != COMMIT_VALID {
            return Err(GatewayError::Commit {
                tx_id: proposal.tx_id,
                status: status.status,
            });
        }

        log::info!(
            "Transaction {} committed on {} (block {})",
            proposal.tx_id,
            request.channel,
            status
                .block_number
                .map(|n| n.to_string())
                .unwrap_or_else(|| "unknown".into())
        );
        Ok(result)
    }

    async fn evaluate(&self, client: &NetworkClient, request: &TransactionRequest) -> Result<Bytes, GatewayError> {
        let proposal = Self::prepare(client, request, Phase::Evaluate)?;
        let url = Self::url(
            client,
            &["gateway", "v1", "channels", &request.channel, "contracts", &request.contract, "evaluate"],
            Phase::Evaluate,
        )?;
        let envelope = SignedEnvelope {
            payload: &proposal.payload,
            signature: proposal.signature,
        };
        let response: EvaluateResponse = Self::post(client, url, &envelope, Phase::Evaluate).await?;
        Self::decode_result(&response.result, Phase::Evaluate)
    }
}
