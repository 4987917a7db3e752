// src/wallet/key_management.rs
//! Cryptographic key management for network identities.
//!
//! Provides generation, parsing, and usage of the private keys backing a
//! subject's credential:
//! - ECDSA P-256 key generation and CSR creation for enrollment
//! - Ordered parsing of stored keys (PKCS8, then EC, then PKCS1)
//! - Signing of gateway proposals and CA tokens
//!
//! Uses the following cryptographic primitives:
//! - NIST P-256 curve (via `p256` crate)
//! - RSA PKCS#1 v1.5 (via `rsa` crate), accepted for pre-existing keys
//! - SHA-256 digests (via `sha2` crate)

use crate::error::{KeyError, KeyFormat};
use crate::utils::crypto::{decode_first_pem, subject_key_identifier};
use p256::ecdsa::signature::Signer as _;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use p256::SecretKey;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::signature::{SignatureEncoding, Signer as _};
use rsa::RsaPrivateKey;
use sha2::Sha256;

/// Signing key parsed from PEM material.
#[derive(Clone)]
enum SigningKey {
    EcdsaP256(p256::ecdsa::SigningKey),
    Rsa(Box<RsaPrivateKey>),
}

/// Key manager bound to one private key.
///
/// Built from the PEM stored in a subject's keystore. The key is never
/// exposed again after parsing; callers only get signatures and the public
/// key identifier.
#[derive(Clone)]
pub struct KeyManager {
    key: SigningKey,
    format: KeyFormat,
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("format", &self.format)
            .field("algorithm", &self.algorithm())
            .finish_non_exhaustive()
    }
}

impl KeyManager {
    /// Parses a PEM private key, trying each supported encoding in order.
    ///
    /// # Arguments
    /// * `pem` - PEM text holding the private key
    ///
    /// # Returns
    /// A key manager for the first encoding that parses.
    ///
    /// # Errors
    /// - `InvalidPem` when no PEM block can be decoded
    /// - `UnparseableKey` listing why PKCS8, EC and PKCS1 each failed
    pub fn from_pem(pem: &str) -> Result<Self, KeyError> {
        let (_label, der) = decode_first_pem(pem).map_err(KeyError::InvalidPem)?;

        let mut attempts = Vec::with_capacity(3);
        for format in [KeyFormat::Pkcs8, KeyFormat::Ec, KeyFormat::Pkcs1] {
            match parse_der(format, &der) {
                Ok(key) => return Ok(KeyManager { key, format }),
                Err(reason) => attempts.push((format, reason)),
            }
        }

        Err(KeyError::UnparseableKey { attempts })
    }

    /// Short algorithm label.
    pub fn algorithm(&self) -> &'static str {
        match self.key {
            SigningKey::EcdsaP256(_) => "ECDSA-P256",
            SigningKey::Rsa(_) => "RSA",
        }
    }

    /// Fabric-style subject key identifier of the public half.
    pub fn key_identifier(&self) -> Result<String, KeyError> {
        let public = match &self.key {
            SigningKey::EcdsaP256(key) => key
                .verifying_key()
                .to_encoded_point(false)
                .as_bytes()
                .to_vec(),
            SigningKey::Rsa(key) => key
                .to_public_key()
                .to_pkcs1_der()
                .map_err(|e| KeyError::Generation(e.to_string()))?
                .as_bytes()
                .to_vec(),
        };
        Ok(subject_key_identifier(&public))
    }

    /// Signs a message with SHA-256 prehashing.
    ///
    /// ECDSA signatures are DER encoded and normalised to low-S, which the
    /// Fabric peers and CA insist on. RSA keys produce PKCS#1 v1.5
    /// signatures.
    pub fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>, KeyError> {
        match &self.key {
            SigningKey::EcdsaP256(key) => {
                let signature: p256::ecdsa::Signature = key
                    .try_sign(message)
                    .map_err(|e| KeyError::Signing(e.to_string()))?;
                let signature = signature.normalize_s().unwrap_or(signature);
                Ok(signature.to_der().as_bytes().to_vec())
            }
            SigningKey::Rsa(key) => {
                let signer = rsa::pkcs1v15::SigningKey::<Sha256>::new(key.as_ref().clone());
                let signature = signer
                    .try_sign(message)
                    .map_err(|e| KeyError::Signing(e.to_string()))?;
                Ok(signature.to_vec())
            }
        }
    }
}

fn parse_der(format: KeyFormat, der: &[u8]) -> Result<SigningKey, String> {
    match format {
        KeyFormat::Pkcs8 => match SecretKey::from_pkcs8_der(der) {
            Ok(secret) => Ok(SigningKey::EcdsaP256(p256::ecdsa::SigningKey::from(&secret))),
            Err(ec_err) => RsaPrivateKey::from_pkcs8_der(der)
                .map(|key| SigningKey::Rsa(Box::new(key)))
                .map_err(|rsa_err| format!("P-256: {}, RSA: {}", ec_err, rsa_err)),
        },
        KeyFormat::Ec => SecretKey::from_sec1_der(der)
            .map(|secret| SigningKey::EcdsaP256(p256::ecdsa::SigningKey::from(&secret)))
            .map_err(|e| e.to_string()),
        KeyFormat::Pkcs1 => RsaPrivateKey::from_pkcs1_der(der)
            .map(|key| SigningKey::Rsa(Box::new(key)))
            .map_err(|e| e.to_string()),
    }
}

/// Freshly generated enrollment key with its certificate signing request.
pub struct EnrollmentKey {
    /// PKCS8 PEM of the new private key
    pub private_key_pem: String,
    /// PKCS#10 request carrying `CN=<enrollment id>`
    pub csr_pem: String,
}

/// Generates a P-256 key pair and a CSR for `common_name`.
///
/// The CA signs the public half; the private half never leaves this process
/// except through the credential store.
pub fn generate_enrollment_key(common_name: &str) -> Result<EnrollmentKey, KeyError> {
    let secret_key = SecretKey::random(&mut rand::thread_rng());

    let pkcs8_der = secret_key
        .to_pkcs8_der()
        .map_err(|e| KeyError::Generation(e.to_string()))?;
    let private_key_pem = secret_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| KeyError::Generation(e.to_string()))?
        .to_string();

    let key_pair = rcgen::KeyPair::from_der(pkcs8_der.as_bytes())
        .map_err(|e| KeyError::Generation(e.to_string()))?;

    let mut params = rcgen::CertificateParams::new(Vec::<String>::new());
    params.alg = &rcgen::PKCS_ECDSA_P256_SHA256;
    params.distinguished_name = rcgen::DistinguishedName::new();
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, common_name);
    params.key_pair = Some(key_pair);

    let csr_pem = rcgen::Certificate::from_params(params)
        .and_then(|request| request.serialize_request_pem())
        .map_err(|e| KeyError::Generation(e.to_string()))?;

    Ok(EnrollmentKey {
        private_key_pem,
        csr_pem,
    })
}
