// src/utils/crypto.rs
//! Hashing and PEM helpers shared by the key store and network clients.
//!
//! Fabric tooling names key files after the SHA-256 of the public point and
//! derives transaction ids from SHA-256 as well, so everything here is
//! SHA-256 based.

use p256::pkcs8::der::pem;
use sha2::{Digest, Sha256};

/// Computes a SHA-256 hash of the input data.
///
/// # Arguments
/// * `data` - Binary data to hash
///
/// # Returns
/// Fixed-size 32-byte digest
pub fn hash_data(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Subject key identifier as used by Fabric keystores: hex SHA-256 of the
/// uncompressed public point.
pub fn subject_key_identifier(public_point: &[u8]) -> String {
    hex::encode(hash_data(public_point))
}

/// Decodes the first PEM block of `text` into its label and DER bytes.
/// Text before the block is skipped by the decoder; text after the first
/// `-----END ...-----` line is cut off here.
pub fn decode_first_pem(text: &str) -> Result<(String, Vec<u8>), String> {
    let (body, tail) = text
        .split_once("-----END ")
        .ok_or_else(|| "no PEM block found".to_string())?;
    let (label, _) = tail
        .split_once("-----")
        .ok_or_else(|| "unterminated PEM block".to_string())?;

    let block = format!("{}-----END {}-----", body, label);
    let (label, der) = pem::decode_vec(block.as_bytes()).map_err(|e| e.to_string())?;
    Ok((label.to_string(), der))
}

/// Decodes the first PEM block of `text`, requiring a specific label.
pub fn decode_pem_with_label(text: &str, expected: &str) -> Result<Vec<u8>, String> {
    let (label, der) = decode_first_pem(text)?;
    if label != expected {
        return Err(format!("expected PEM label '{}', found '{}'", expected, label));
    }
    Ok(der)
}
