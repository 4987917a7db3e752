// src/models/registration.rs
//! Registration and enrollment request models.
//!
//! `RegistrationInfo` mirrors the Fabric CA register payload and is decoded
//! straight from the claim the identity provider issues for a user, e.g.
//!
//! ```json
//! { "fabric": { "affiliation": "org1.dept1", "attrs": [{ "name": "role", "value": "buyer" }] } }
//! ```

use crate::error::ProxyError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Attribute attached to a registered identity.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
    /// Embed the attribute in enrollment certificates by default
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ecert: bool,
}

/// Identity registration request sent to the certificate authority.
///
/// Unknown claim fields are ignored. The enrollment ID is always the
/// authenticated subject, whatever the claim says.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationInfo {
    #[serde(rename = "id", default)]
    pub name: String,

    #[serde(rename = "type", default)]
    pub identity_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_enrollments: Option<i32>,

    #[serde(default)]
    pub affiliation: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attrs: Vec<Attribute>,

    #[serde(rename = "caname", default, skip_serializing_if = "Option::is_none")]
    pub ca_name: Option<String>,
}

impl RegistrationInfo {
    /// Builds a registration request from an extracted claim value.
    ///
    /// # Arguments
    /// * `claim` - Value found at the configured claim path
    /// * `subject` - Authenticated subject, used as the enrollment ID
    ///
    /// An absent claim (`null`) yields an empty request, left for
    /// [`RegistrationInfo::apply_defaults`] to fill.
    ///
    /// # Errors
    /// `InvalidRegistration` when the claim is neither null nor an object, or
    /// a field has the wrong type.
    pub fn from_claim(claim: Value, subject: &str) -> Result<Self, ProxyError> {
        if claim.is_null() {
            return Ok(RegistrationInfo {
                name: subject.to_string(),
                ..Default::default()
            });
        }
        if !claim.is_object() {
            return Err(ProxyError::InvalidRegistration(format!(
                "expected an object, found {}",
                json_kind(&claim)
            )));
        }

        let mut info: RegistrationInfo = serde_json::from_value(claim)
            .map_err(|e| ProxyError::InvalidRegistration(e.to_string()))?;
        info.name = subject.to_string();
        Ok(info)
    }

    /// Fills an empty identity type or affiliation.
    pub fn apply_defaults(&mut self, identity_type: &str, affiliation: &str) {
        if self.identity_type.trim().is_empty() {
            self.identity_type = identity_type.to_string();
        }
        if self.affiliation.trim().is_empty() {
            self.affiliation = affiliation.to_string();
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Enrollment request exchanged for a certificate.
#[derive(Debug, Clone)]
pub struct EnrollmentRequest {
    pub name: String,
    pub secret: String,
    pub profile: String,
    pub ca_name: Option<String>,
}

impl EnrollmentRequest {
    pub fn x509(name: &str, secret: &str, profile: &str) -> Self {
        EnrollmentRequest {
            name: name.to_string(),
            secret: secret.to_string(),
            profile: profile.to_string(),
            ca_name: None,
        }
    }
}
