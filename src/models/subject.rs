// src/models/subject.rs
use serde_json::{Map, Value};

/// Identity established by the authenticator for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticatedSubject {
    /// Stable subject identifier (`sub`)
    pub subject: String,
    /// Whether the identity provider still considers the session active
    pub active: bool,
    /// Every claim carried by the token or introspection response
    pub claims: Map<String, Value>,
}

impl AuthenticatedSubject {
    pub fn new(subject: impl Into<String>, claims: Map<String, Value>) -> Self {
        AuthenticatedSubject {
            subject: subject.into(),
            active: true,
            claims,
        }
    }
}
