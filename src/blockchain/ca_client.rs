// src/blockchain/ca_client.rs
//! Fabric CA client implementation.
//!
//! Provides the two certificate authority operations the identity bridge
//! needs, over the Fabric CA REST API:
//! - `POST /api/v1/enroll`, authenticated with HTTP Basic (enrollment ID and secret)
//! - `POST /api/v1/register`, authenticated with a token signed by the registrar
//!
//! The enrollment key pair is generated locally; only the CSR is sent.

use crate::config::settings::CaSettings;
use crate::error::CaError;
use crate::models::credential::{Credential, EnrolledIdentity};
use crate::models::registration::{EnrollmentRequest, RegistrationInfo};
use crate::utils::serialization::decode_base64_pem;
use crate::wallet::key_management::{generate_enrollment_key, KeyManager};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

const ENROLL_PATH: &str = "/api/v1/enroll";
const REGISTER_PATH: &str = "/api/v1/register";

/// Fabric CA error code for an identity that already exists.
const CODE_ALREADY_REGISTERED: i64 = 74;

/// Certificate authority capability used by the identity bridge.
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// Exchanges an enrollment ID and secret for a signed certificate.
    async fn enroll(&self, request: &EnrollmentRequest) -> Result<EnrolledIdentity, CaError>;

    /// Registers a new identity on behalf of `registrar`.
    ///
    /// # Returns
    /// The one-time enrollment secret.
    async fn register(
        &self,
        registrar: &Credential,
        registration: &RegistrationInfo,
    ) -> Result<String, CaError>;
}

// ======================
// Wire types
// ======================

#[derive(Serialize)]
struct EnrollBody<'a> {
    certificate_request: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    profile: &'a str,
    #[serde(rename = "caname", skip_serializing_if = "Option::is_none")]
    ca_name: Option<&'a str>,
}

#[derive(Deserialize)]
struct CaResponse<T> {
    #[serde(default)]
    success: bool,
    result: Option<T>,
    #[serde(default)]
    errors: Vec<CaMessage>,
}

#[derive(Deserialize)]
struct CaMessage {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct EnrollResult {
    #[serde(rename = "Cert")]
    cert: String,
    #[serde(rename = "ServerInfo", default)]
    server_info: Option<ServerInfo>,
}

#[derive(Deserialize)]
struct ServerInfo {
    #[serde(rename = "CAChain", default)]
    ca_chain: Option<String>,
}

#[derive(Deserialize)]
struct RegisterResult {
    secret: String,
}

/// REST client for a Fabric CA server.
#[derive(Clone)]
pub struct FabricCaClient {
    http: reqwest::Client,
    base_url: Url,
    ca_name: Option<String>,
}

impl FabricCaClient {
    /// Creates a CA client from settings.
    ///
    /// For `https` URLs the configured trust anchor is the only trusted root,
    /// and the optional client certificate and key enable mutual TLS.
    ///
    /// # Errors
    /// `Request` when the URL or TLS material is unusable.
    pub fn new(settings: &CaSettings) -> Result<Self, CaError> {
        let base_url = Url::parse(&settings.url)
            .map_err(|e| CaError::Request(format!("invalid CA url '{}': {}", settings.url, e)))?;

        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(settings.request_timeout_secs));

        if base_url.scheme() == "https" {
            let anchor = read_file(&settings.tls_trusted_certs)?;
            let root = reqwest::Certificate::from_pem(&anchor)
                .map_err(|e| CaError::Request(format!("invalid CA trust anchor: {}", e)))?;
            builder = builder
                .tls_built_in_root_certs(false)
                .add_root_certificate(root);

            if let (Some(cert), Some(key)) = (&settings.tls_cert, &settings.tls_key) {
                let mut pem = read_file(cert)?;
                pem.push(b'\n');
                pem.extend(read_file(key)?);
                let identity = reqwest::Identity::from_pem(&pem)
                    .map_err(|e| CaError::Request(format!("invalid CA client identity: {}", e)))?;
                builder = builder.identity(identity);
            }
        }

        let http = builder
            .build()
            .map_err(|e| CaError::Request(e.to_string()))?;

        Ok(FabricCaClient {
            http,
            base_url,
            ca_name: settings.ca_name.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, CaError> {
        self.base_url
            .join(path)
            .map_err(|e| CaError::Request(e.to_string()))
    }

    /// Decodes the CA's response envelope, whatever the HTTP status.
    async fn read_response<T: DeserializeOwned>(
        response: reqwest::Response,
        subject: &str,
    ) -> Result<T, CaError> {
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| CaError::Unreachable(e.to_string()))?;

        let envelope: CaResponse<T> = serde_json::from_slice(&body).map_err(|e| {
            CaError::InvalidResponse(format!(
                "status {}: {} ({})",
                status,
                String::from_utf8_lossy(&body),
                e
            ))
        })?;

        if envelope.success {
            if let Some(result) = envelope.result {
                return Ok(result);
            }
            return Err(CaError::InvalidResponse("response carries no result".into()));
        }

        let Some(first) = envelope.errors.into_iter().next() else {
            return Err(CaError::Rejected {
                code: i64::from(status.as_u16()),
                message: format!("request failed with status {}", status),
            });
        };

        if first.code == CODE_ALREADY_REGISTERED || first.message.contains("already registered") {
            return Err(CaError::DuplicateRegistration(subject.to_string()));
        }
        Err(CaError::Rejected {
            code: first.code,
            message: first.message,
        })
    }
}

/// Builds the Fabric CA authorization token for a request.
///
/// Format: `b64(cert).b64(sig)` where the signature covers
/// `method.b64(uri).b64(body).b64(cert)`.
pub fn authorization_token(
    registrar: &Credential,
    method: &str,
    uri: &str,
    body: &[u8],
) -> Result<String, CaError> {
    let signer = KeyManager::from_pem(&registrar.private_key_pem)
        .map_err(|e| CaError::Request(format!("registrar key: {}", e)))?;

    let b64_cert = base64::encode(registrar.certificate_pem.as_bytes());
    let payload = format!(
        "{}.{}.{}.{}",
        method,
        base64::encode(uri.as_bytes()),
        base64::encode(body),
        b64_cert
    );
    let signature = signer
        .sign_message(payload.as_bytes())
        .map_err(|e| CaError::Request(e.to_string()))?;

    Ok(format!("{}.{}", b64_cert, base64::encode(signature)))
}

fn read_file(path: &std::path::Path) -> Result<Vec<u8>, CaError> {
    std::fs::read(path).map_err(|e| CaError::Request(format!("failed to read {}: {}", path.display(), e)))
}

#[async_trait]
impl CertificateAuthority for FabricCaClient {
    async fn enroll(&self, request: &EnrollmentRequest) -> Result<EnrolledIdentity, CaError> {
        let key = generate_enrollment_key(&request.name)
            .map_err(|e| CaError::Request(e.to_string()))?;

        let body = EnrollBody {
            certificate_request: &key.csr_pem,
            profile: &request.profile,
            ca_name: request.ca_name.as_deref().or(self.ca_name.as_deref()),
        };

        log::debug!("Enrolling '{}' with profile '{}'", request.name, request.profile);
        let response = self
            .http
            .post(self.endpoint(ENROLL_PATH)?)
            .basic_auth(&request.name, Some(&request.secret))
            .json(&body)
            .send()
            .await
            .map_err(|e| CaError::Unreachable(e.to_string()))?;

        let result: EnrollResult = Self::read_response(response, &request.name).await?;
        let certificate_pem = decode_base64_pem(&result.cert).map_err(CaError::InvalidResponse)?;
        let ca_chain_pem = match result.server_info.and_then(|info| info.ca_chain) {
            Some(chain) if !chain.is_empty() => {
                Some(decode_base64_pem(&chain).map_err(CaError::InvalidResponse)?)
            }
            _ => None,
        };

        Ok(EnrolledIdentity {
            name: request.name.clone(),
            certificate_pem,
            private_key_pem: key.private_key_pem,
            ca_chain_pem,
        })
    }

    async fn register(
        &self,
        registrar: &Credential,
        registration: &RegistrationInfo,
    ) -> Result<String, CaError> {
        let mut registration = registration.clone();
        if registration.ca_name.is_none() {
            registration.ca_name = self.ca_name.clone();
        }
        let body = serde_json::to_vec(&registration).map_err(|e| CaError::Request(e.to_string()))?;
        let token = authorization_token(registrar, "POST", REGISTER_PATH, &body)?;

        log::debug!(
            "Registering '{}' (type '{}', affiliation '{}') as '{}'",
            registration.name,
            registration.identity_type,
            registration.affiliation,
            registrar.subject
        );
        let response = self
            .http
            .post(self.endpoint(REGISTER_PATH)?)
            .header(reqwest::header::AUTHORIZATION, token)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| CaError::Unreachable(e.to_string()))?;

        let result: RegisterResult = Self::read_response(response, &registration.name).await?;
        Ok(result.secret)
    }
}
