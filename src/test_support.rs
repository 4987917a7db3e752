// src/test_support.rs
//! Shared fixtures for unit tests: settings, throwaway certificates and fake
//! collaborators for the CA and the ledger gateway.

use crate::blockchain::ca_client::CertificateAuthority;
use crate::blockchain::gateway_client::{LedgerGateway, NetworkClient, TransactionRequest};
use crate::config::settings::{CaSettings, GatewaySettings};
use crate::error::{AuthError, CaError, GatewayError};
use crate::models::credential::{Credential, EnrolledIdentity};
use crate::models::registration::{EnrollmentRequest, RegistrationInfo};
use crate::models::subject::AuthenticatedSubject;
use crate::services::authenticator::Authenticator;
use crate::utils::crypto::decode_first_pem;
use crate::wallet::key_management::generate_enrollment_key;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

/// Self-signed P-256 certificate and its PKCS8 key, both PEM.
pub fn self_signed(common_name: &str) -> (String, String) {
    let key = generate_enrollment_key(common_name).unwrap();
    let (_, der) = decode_first_pem(&key.private_key_pem).unwrap();

    let mut params = rcgen::CertificateParams::new(vec![common_name.to_string()]);
    params.alg = &rcgen::PKCS_ECDSA_P256_SHA256;
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, common_name);
    params.key_pair = Some(rcgen::KeyPair::from_der(&der).unwrap());

    let cert = rcgen::Certificate::from_params(params).unwrap();
    (cert.serialize_pem().unwrap(), key.private_key_pem)
}

/// Credential with a real certificate and key for `subject`.
pub fn issued_credential(subject: &str) -> Credential {
    let (certificate_pem, private_key_pem) = self_signed(subject);
    Credential {
        subject: subject.to_string(),
        msp_id: "Org1MSP".to_string(),
        certificate_pem,
        private_key_pem,
        key_path: PathBuf::from(format!("/nonexistent/{}_sk", subject)),
    }
}

pub fn registrar() -> Credential {
    issued_credential("admin")
}

/// Writes a trust anchor certificate into `dir`.
pub fn write_anchor(dir: &TempDir) -> PathBuf {
    let (cert, _) = self_signed("tlsca.org1");
    let path = dir.path().join("ca.crt");
    std::fs::write(&path, cert).unwrap();
    path
}

pub fn ca_settings(url: &str) -> CaSettings {
    CaSettings {
        url: url.to_string(),
        client_home: PathBuf::from("fabric"),
        client_mspdir: "msp".to_string(),
        tls_cert: None,
        tls_key: None,
        tls_trusted_certs: PathBuf::from("fabric/tls/ca.crt"),
        admin: "admin".to_string(),
        admin_secret: "adminpw".to_string(),
        oidc_claim_key: "fabric".to_string(),
        enrollment_profile: "tls".to_string(),
        ca_name: None,
        default_identity_type: "client".to_string(),
        default_affiliation: String::new(),
        registration_retry_attempts: 3,
        registration_retry_delay_ms: 10,
        request_timeout_secs: 5,
    }
}

pub fn gateway_settings(anchor: &Path, endpoint: &str) -> GatewaySettings {
    GatewaySettings {
        msp_id: "Org1MSP".to_string(),
        tls_trusted_certs: anchor.to_path_buf(),
        peer_endpoint: endpoint.to_string(),
        peer_server_name_override: "peer0.org1".to_string(),
        connect_timeout_secs: 5,
        evaluate_timeout_secs: 5,
        endorse_timeout_secs: 15,
        submit_timeout_secs: 5,
        commit_status_timeout_secs: 60,
    }
}

/// In-memory certificate authority that counts calls.
pub struct FakeCa {
    pub registrations: AtomicUsize,
    pub enrollments: Mutex<Vec<String>>,
    pub registered: Mutex<Vec<RegistrationInfo>>,
    /// Certificate and key of every identity handed out, in order.
    pub issued: Mutex<Vec<(String, String)>>,
    pub ca_chain: Option<String>,
    pub fail_admin: bool,
    pub fail_user_enroll: bool,
    pub duplicate: bool,
    pub delay: Duration,
}

impl Default for FakeCa {
    fn default() -> Self {
        FakeCa {
            registrations: AtomicUsize::new(0),
            enrollments: Mutex::new(Vec::new()),
            registered: Mutex::new(Vec::new()),
            issued: Mutex::new(Vec::new()),
            ca_chain: None,
            fail_admin: false,
            fail_user_enroll: false,
            duplicate: false,
            delay: Duration::ZERO,
        }
    }
}

impl FakeCa {
    pub fn registration_count(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    pub fn enrolled(&self) -> Vec<String> {
        self.enrollments.lock().unwrap().clone()
    }

    pub fn last_issued(&self) -> Option<(String, String)> {
        self.issued.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl CertificateAuthority for FakeCa {
    async fn enroll(&self, request: &EnrollmentRequest) -> Result<EnrolledIdentity, CaError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.enrollments.lock().unwrap().push(request.name.clone());

        let is_admin = request.name == "admin";
        if (is_admin && self.fail_admin) || (!is_admin && self.fail_user_enroll) {
            return Err(CaError::Rejected {
                code: 20,
                message: "Authentication failure".into(),
            });
        }

        let (certificate_pem, private_key_pem) = self_signed(&request.name);
        self.issued
            .lock()
            .unwrap()
            .push((certificate_pem.clone(), private_key_pem.clone()));
        Ok(EnrolledIdentity {
            name: request.name.clone(),
            certificate_pem,
            private_key_pem,
            ca_chain_pem: self.ca_chain.clone(),
        })
    }

    async fn register(
        &self,
        _registrar: &Credential,
        registration: &RegistrationInfo,
    ) -> Result<String, CaError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.registrations.fetch_add(1, Ordering::SeqCst);
        self.registered.lock().unwrap().push(registration.clone());

        if self.duplicate {
            return Err(CaError::DuplicateRegistration(registration.name.clone()));
        }
        Ok(format!("secret-{}", registration.name))
    }
}

/// Gateway that records requests and answers with fixed bytes.
pub struct FakeGateway {
    pub response: Bytes,
    pub submitted: Mutex<Vec<TransactionRequest>>,
    pub evaluated: Mutex<Vec<TransactionRequest>>,
    pub fail: bool,
}

impl FakeGateway {
    pub fn returning(response: &'static [u8]) -> Self {
        FakeGateway {
            response: Bytes::from_static(response),
            submitted: Mutex::new(Vec::new()),
            evaluated: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    pub fn calls(&self) -> usize {
        self.submitted.lock().unwrap().len() + self.evaluated.lock().unwrap().len()
    }
}

#[async_trait]
impl LedgerGateway for FakeGateway {
    async fn submit(&self, _client: &NetworkClient, request: &TransactionRequest) -> Result<Bytes, GatewayError> {
        self.submitted.lock().unwrap().push(request.clone());
        if self.fail {
            return Err(GatewayError::Timeout {
                phase: crate::error::Phase::Endorse,
            });
        }
        Ok(self.response.clone())
    }

    async fn evaluate(&self, _client: &NetworkClient, request: &TransactionRequest) -> Result<Bytes, GatewayError> {
        self.evaluated.lock().unwrap().push(request.clone());
        Ok(self.response.clone())
    }
}

/// Authenticator backed by a fixed token table.
#[derive(Default)]
pub struct FakeAuthenticator {
    sessions: HashMap<String, AuthenticatedSubject>,
    pub calls: AtomicUsize,
    /// When set, every lookup fails as if the provider were down.
    pub unavailable: AtomicBool,
}

impl FakeAuthenticator {
    pub fn with_session(mut self, token: &str, subject: AuthenticatedSubject) -> Self {
        self.sessions.insert(token.to_string(), subject);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authenticator for FakeAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<AuthenticatedSubject, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AuthError::Provider("introspection endpoint unreachable".into()));
        }
        self.sessions
            .get(token)
            .cloned()
            .ok_or_else(|| AuthError::InvalidToken("unknown token".into()))
    }
}
