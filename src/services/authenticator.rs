// src/services/authenticator.rs
//! Bearer token authentication.
//!
//! Two strategies turn a bearer token into an [`AuthenticatedSubject`]:
//! - `IntrospectionAuthenticator` asks the OIDC provider (RFC 7662), with the
//!   introspection endpoint discovered once from the issuer metadata
//! - `JwtAuthenticator` verifies a signed JWT locally

use crate::config::settings::{AuthMode, OidcSettings};
use crate::error::AuthError;
use crate::models::subject::AuthenticatedSubject;
use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::OnceCell;
use url::Url;

/// Session capability: bearer token in, authenticated subject out.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<AuthenticatedSubject, AuthError>;
}

/// Builds the authenticator selected by `oidc.mode`.
pub fn build_authenticator(settings: &OidcSettings) -> Result<Arc<dyn Authenticator>, AuthError> {
    match settings.mode {
        AuthMode::Introspection => Ok(Arc::new(IntrospectionAuthenticator::new(settings)?)),
        AuthMode::Jwt => Ok(Arc::new(JwtAuthenticator::new(settings)?)),
    }
}

fn subject_from_claims(claims: Map<String, Value>) -> Result<AuthenticatedSubject, AuthError> {
    let subject = match claims.get("sub") {
        Some(Value::String(sub)) if !sub.is_empty() => sub.clone(),
        _ => return Err(AuthError::InvalidToken("token carries no subject".into())),
    };
    Ok(AuthenticatedSubject::new(subject, claims))
}

// ======================
// Token introspection
// ======================

#[derive(Deserialize)]
struct ProviderMetadata {
    introspection_endpoint: String,
}

/// Validates tokens through the identity provider's introspection endpoint.
pub struct IntrospectionAuthenticator {
    http: reqwest::Client,
    issuer: String,
    client_id: String,
    client_secret: String,
    endpoint: OnceCell<Url>,
}

impl IntrospectionAuthenticator {
    pub fn new(settings: &OidcSettings) -> Result<Self, AuthError> {
        if settings.issuer.trim().is_empty() {
            return Err(AuthError::Provider("oidc.issuer is not configured".into()));
        }
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| AuthError::Provider(e.to_string()))?;

        Ok(IntrospectionAuthenticator {
            http,
            issuer: settings.issuer.trim_end_matches('/').to_string(),
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            endpoint: OnceCell::new(),
        })
    }

    async fn discover(&self) -> Result<&Url, AuthError> {
        self.endpoint
            .get_or_try_init(|| async {
                let url = format!("{}/.well-known/openid-configuration", self.issuer);
                log::debug!("Discovering introspection endpoint from {}", url);

                let metadata: ProviderMetadata = self
                    .http
                    .get(&url)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| AuthError::Provider(e.to_string()))?
                    .json()
                    .await
                    .map_err(|e| AuthError::Provider(format!("invalid provider metadata: {}", e)))?;

                Url::parse(&metadata.introspection_endpoint)
                    .map_err(|e| AuthError::Provider(format!("invalid introspection endpoint: {}", e)))
            })
            .await
    }
}

#[async_trait]
impl Authenticator for IntrospectionAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<AuthenticatedSubject, AuthError> {
        let endpoint = self.discover().await?.clone();

        let claims: Map<String, Value> = self
            .http
            .post(endpoint)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("token", token), ("token_type_hint", "access_token")])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AuthError::Provider(e.to_string()))?
            .json()
            .await
            .map_err(|e| AuthError::Provider(format!("invalid introspection response: {}", e)))?;

        if claims.get("active").and_then(Value::as_bool) != Some(true) {
            return Err(AuthError::Inactive);
        }
        subject_from_claims(claims)
    }
}

// ======================
// Local JWT verification
// ======================

/// Verifies JWTs with a configured key.
pub struct JwtAuthenticator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    pub fn new(settings: &OidcSettings) -> Result<Self, AuthError> {
        let algorithm = Algorithm::from_str(&settings.jwt_algorithm)
            .map_err(|e| AuthError::Provider(format!("unsupported algorithm '{}': {}", settings.jwt_algorithm, e)))?;

        let key = match algorithm {
            Algorithm::HS256 => {
                let secret = settings
                    .jwt_secret
                    .as_ref()
                    .ok_or_else(|| AuthError::Provider("oidc.jwt_secret is required for HS256".into()))?;
                DecodingKey::from_secret(secret.as_bytes())
            }
            Algorithm::RS256 | Algorithm::ES256 => {
                let path = settings
                    .jwt_public_key
                    .as_ref()
                    .ok_or_else(|| AuthError::Provider("oidc.jwt_public_key is required".into()))?;
                let pem = std::fs::read(path)
                    .map_err(|e| AuthError::Provider(format!("failed to read {}: {}", path.display(), e)))?;
                let key = if algorithm == Algorithm::RS256 {
                    DecodingKey::from_rsa_pem(&pem)
                } else {
                    DecodingKey::from_ec_pem(&pem)
                };
                key.map_err(|e| AuthError::Provider(e.to_string()))?
            }
            other => {
                return Err(AuthError::Provider(format!("unsupported algorithm {:?}", other)));
            }
        };

        let mut validation = Validation::new(algorithm);
        if !settings.issuer.trim().is_empty() {
            validation.set_issuer(&[settings.issuer.as_str()]);
        }
        if let Some(audience) = &settings.audience {
            validation.set_audience(&[audience.as_str()]);
        }

        Ok(JwtAuthenticator { key, validation })
    }
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<AuthenticatedSubject, AuthError> {
        let data = decode::<Map<String, Value>>(token, &self.key, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        subject_from_claims(data.claims)
    }
}
