// src/error.rs
//! Error taxonomy for the proxy.
//!
//! Each layer owns a small `thiserror` enum; [`ProxyError`] is the top-level
//! type handlers return and is what decides the HTTP status of a failure.

use std::path::PathBuf;
use thiserror::Error;

/// Failures of the claim path extractor.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClaimError {
    /// A non-terminal segment did not resolve to a mapping, or a bracketed
    /// segment did not resolve to a sequence.
    #[error("expected {expected} at path segment '{segment}'")]
    PathType {
        segment: String,
        expected: &'static str,
    },

    #[error("index out of range in path segment '{segment}' (length {len})")]
    IndexOutOfRange { segment: String, len: usize },

    #[error("invalid array index in path segment '{segment}'")]
    InvalidIndex { segment: String },
}

/// Failures of the on-disk credential store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no key file found in keystore {0}")]
    NotFound(PathBuf),

    #[error("certificate not found at {0}")]
    MissingCertificate(PathBuf),

    #[error("private key not found under {0}")]
    MissingKey(PathBuf),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("subject '{0}' cannot be used as a credential directory")]
    InvalidSubject(String),

    #[error("enrolled identity carries an unusable private key: {0}")]
    InvalidKeyMaterial(String),
}

impl StoreError {
    /// True when the store simply has nothing for the subject yet.
    pub fn is_absent(&self) -> bool {
        matches!(
            self,
            StoreError::NotFound(_) | StoreError::MissingCertificate(_) | StoreError::MissingKey(_)
        )
    }
}

/// Private key encodings tried, in order, when loading a signer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFormat {
    Pkcs8,
    Ec,
    Pkcs1,
}

impl std::fmt::Display for KeyFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyFormat::Pkcs8 => f.write_str("PKCS8"),
            KeyFormat::Ec => f.write_str("EC"),
            KeyFormat::Pkcs1 => f.write_str("PKCS1"),
        }
    }
}

/// Failures while turning PEM bytes into a signer.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("failed to decode PEM block containing the private key: {0}")]
    InvalidPem(String),

    #[error("failed to parse private key ({})", describe_attempts(.attempts))]
    UnparseableKey { attempts: Vec<(KeyFormat, String)> },

    #[error("failed to generate key material: {0}")]
    Generation(String),

    #[error("failed to sign: {0}")]
    Signing(String),
}

fn describe_attempts(attempts: &[(KeyFormat, String)]) -> String {
    attempts
        .iter()
        .map(|(format, reason)| format!("{}: {}", format, reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failures reported by the certificate authority capability.
#[derive(Debug, Error)]
pub enum CaError {
    #[error("certificate authority unreachable: {0}")]
    Unreachable(String),

    #[error("identity '{0}' is already registered")]
    DuplicateRegistration(String),

    #[error("certificate authority rejected the request (code {code}): {message}")]
    Rejected { code: i64, message: String },

    #[error("unexpected certificate authority response: {0}")]
    InvalidResponse(String),

    #[error("failed to prepare certificate authority request: {0}")]
    Request(String),
}

/// Sub-kinds of a failed provisioning attempt.
#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("failed to enroll admin: {0}")]
    AdminEnrollmentFailed(#[source] CaError),

    #[error("failed to register user: {0}")]
    RegistrationFailed(#[source] CaError),

    #[error("failed to enroll user: {0}")]
    EnrollmentFailed(#[source] CaError),

    #[error("failed to persist credential: {0}")]
    Persist(#[source] StoreError),

    #[error("credential unavailable after provisioning: {0}")]
    Reload(#[source] StoreError),
}

/// Failures while building a per-request network client.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("untrusted certificate: {0}")]
    UntrustedCertificate(String),

    #[error(transparent)]
    UnparseableKey(#[from] KeyError),
}

/// Transaction phases with independent timeout budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Evaluate,
    Endorse,
    Submit,
    CommitStatus,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Evaluate => f.write_str("evaluate"),
            Phase::Endorse => f.write_str("endorse"),
            Phase::Submit => f.write_str("submit"),
            Phase::CommitStatus => f.write_str("commit-status"),
        }
    }
}

/// Failures reported by the ledger gateway capability.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{phase} timed out")]
    Timeout { phase: Phase },

    #[error("{phase} failed to reach gateway: {message}")]
    Connection { phase: Phase, message: String },

    #[error("{phase} rejected with status {status}: {body}")]
    Rejected {
        phase: Phase,
        status: u16,
        body: String,
    },

    #[error("transaction {tx_id} committed with status {status}")]
    Commit { tx_id: String, status: String },

    #[error("{phase} returned an invalid response: {message}")]
    InvalidResponse { phase: Phase, message: String },
}

impl GatewayError {
    pub(crate) fn from_reqwest(phase: Phase, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout { phase }
        } else if err.is_decode() {
            GatewayError::InvalidResponse {
                phase,
                message: err.to_string(),
            }
        } else {
            GatewayError::Connection {
                phase,
                message: err.to_string(),
            }
        }
    }
}

/// Failures of the session authenticator.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no bearer token presented")]
    MissingToken,

    #[error("token is not active")]
    Inactive,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("identity provider error: {0}")]
    Provider(String),
}

/// Top-level error returned by handlers and the transaction submitter.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("failed to extract registration claim: {0}")]
    ClaimExtraction(#[from] ClaimError),

    #[error("claim cannot be mapped to a registration request: {0}")]
    InvalidRegistration(String),

    #[error("{0}")]
    InvalidSubject(String),

    #[error("provisioning failed: {0}")]
    ProvisioningFailed(#[from] ProvisioningError),

    #[error("credential not provisioned for subject '{0}'")]
    CredentialNotProvisioned(String),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("failed to submit transaction: {0}")]
    SubmissionFailed(#[from] GatewayError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// Stable machine-readable code carried in error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            ProxyError::Unauthenticated(_) => "UNAUTHENTICATED",
            ProxyError::BadRequest(_) => "BAD_REQUEST",
            ProxyError::ClaimExtraction(_) => "CLAIM_EXTRACTION_FAILED",
            ProxyError::InvalidRegistration(_) => "INVALID_REGISTRATION",
            ProxyError::InvalidSubject(_) => "INVALID_SUBJECT",
            ProxyError::ProvisioningFailed(_) => "PROVISIONING_FAILED",
            ProxyError::CredentialNotProvisioned(_) => "CREDENTIAL_NOT_PROVISIONED",
            ProxyError::Network(_) => "NETWORK_CLIENT_FAILED",
            ProxyError::SubmissionFailed(_) => "SUBMISSION_FAILED",
            ProxyError::Internal(_) => "INTERNAL",
        }
    }
}

impl From<AuthError> for ProxyError {
    fn from(err: AuthError) -> Self {
        match err {
            // The caller's token was never judged, so this is not a 401
            AuthError::Provider(_) => ProxyError::Internal(err.to_string()),
            other => ProxyError::Unauthenticated(other.to_string()),
        }
    }
}

impl From<StoreError> for ProxyError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidSubject(_) => ProxyError::InvalidSubject(err.to_string()),
            other => ProxyError::Internal(other.to_string()),
        }
    }
}
