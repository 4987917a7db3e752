// src/models/credential.rs
//! Network credential data model.
//!
//! Defines the key/certificate pair that authorises a subject on the Fabric
//! network, together with the transient identity a CA enrollment hands back
//! before it is persisted.

use std::path::PathBuf;

/// A subject's network credential as stored on disk.
///
/// Exactly one exists per subject. It is created by the identity bridge the
/// first time the subject enrolls and is never mutated or deleted afterwards.
///
/// # Fields
/// - `subject`: external subject the credential belongs to
/// - `msp_id`: membership service provider the certificate was issued under
/// - `certificate_pem`: X.509 enrollment certificate
/// - `private_key_pem`: private key matching the certificate
/// - `key_path`: keystore file the key was loaded from
///
/// # Security Considerations
/// - `Debug` output never includes the private key
/// - The key file is created with owner-only permissions
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub subject: String,
    pub msp_id: String,
    pub certificate_pem: String,
    pub private_key_pem: String,
    pub key_path: PathBuf,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("subject", &self.subject)
            .field("msp_id", &self.msp_id)
            .field("certificate_pem", &self.certificate_pem)
            .field("private_key_pem", &"<redacted>")
            .field("key_path", &self.key_path)
            .finish()
    }
}

/// Identity returned by a successful CA enrollment.
///
/// The private key is generated locally for the CSR, so the CA response only
/// contributes the certificate and its chain.
#[derive(Clone)]
pub struct EnrolledIdentity {
    /// Enrollment ID the certificate was issued to
    pub name: String,
    pub certificate_pem: String,
    /// PKCS8 PEM private key
    pub private_key_pem: String,
    pub ca_chain_pem: Option<String>,
}

impl std::fmt::Debug for EnrolledIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrolledIdentity")
            .field("name", &self.name)
            .field("certificate_pem", &self.certificate_pem)
            .field("private_key_pem", &"<redacted>")
            .field("ca_chain_pem", &self.ca_chain_pem)
            .finish()
    }
}
