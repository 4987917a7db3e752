// src/services/identity_bridge.rs
//! Identity bridge between authenticated subjects and network credentials.
//!
//! The first time a subject is seen, the bridge registers it with the
//! certificate authority under the admin (registrar) identity, enrolls it and
//! persists the resulting key and certificate. Every later call reuses the
//! stored credential unchanged.

use crate::blockchain::ca_client::CertificateAuthority;
use crate::config::settings::CaSettings;
use crate::error::{CaError, ProvisioningError, ProxyError};
use crate::models::credential::{Credential, EnrolledIdentity};
use crate::models::registration::{EnrollmentRequest, RegistrationInfo};
use crate::wallet::credential_storage::CredentialStore;
use std::path::Path;
use std::sync::Arc;

/// Provision-if-absent orchestration over a store and a CA.
#[derive(Clone)]
pub struct IdentityBridge {
    store: Arc<dyn CredentialStore>,
    ca: Arc<dyn CertificateAuthority>,
    settings: CaSettings,
}

impl IdentityBridge {
    pub fn new(store: Arc<dyn CredentialStore>, ca: Arc<dyn CertificateAuthority>, settings: CaSettings) -> Self {
        IdentityBridge { store, ca, settings }
    }

    /// Loads the admin identity, enrolling it once if it is not stored yet.
    ///
    /// # Errors
    /// `AdminEnrollmentFailed` when the CA refuses the admin secret, or
    /// `Persist`/`Reload` when the store cannot hold the result.
    pub async fn ensure_admin(&self) -> Result<Credential, ProvisioningError> {
        let home = self.store.admin_home();
        let _guard = self.store.lock(&home).await;

        match self.store.load_credential(&self.settings.admin, &home).await {
            Ok(admin) => return Ok(admin),
            Err(err) if err.is_absent() => {}
            Err(err) => return Err(ProvisioningError::Reload(err)),
        }

        log::info!("Enrolling admin identity '{}'", self.settings.admin);
        let mut request = EnrollmentRequest::x509(
            &self.settings.admin,
            &self.settings.admin_secret,
            &self.settings.enrollment_profile,
        );
        request.ca_name = self.settings.ca_name.clone();

        let identity = self
            .ca
            .enroll(&request)
            .await
            .map_err(ProvisioningError::AdminEnrollmentFailed)?;
        self.persist(&identity, &home).await?;

        self.store
            .load_credential(&self.settings.admin, &home)
            .await
            .map_err(ProvisioningError::Reload)
    }

    /// Returns the subject's credential, provisioning it on first use.
    ///
    /// # Arguments
    /// * `subject` - Authenticated subject, used as enrollment ID and directory name
    /// * `registration` - Registration request derived from the subject's claims
    ///
    /// # Returns
    /// The stored credential. Repeated calls return an equal value.
    ///
    /// # Errors
    /// - `InvalidSubject` when the subject cannot name a directory
    /// - `ProvisioningFailed` carrying the step that failed
    pub async fn ensure_credential(
        &self,
        subject: &str,
        registration: &RegistrationInfo,
    ) -> Result<Credential, ProxyError> {
        let home = self
            .store
            .subject_home(subject)
            .map_err(ProxyError::from)?;
        let _guard = self.store.lock(&home).await;

        match self.store.load_credential(subject, &home).await {
            Ok(credential) => return Ok(credential),
            Err(err) if err.is_absent() => {}
            Err(err) => return Err(ProvisioningError::Reload(err).into()),
        }

        log::info!("No credential stored for '{}', provisioning", subject);
        let admin = self.ensure_admin().await?;

        let mut registration = registration.clone();
        registration.name = subject.to_string();
        registration.apply_defaults(&self.settings.default_identity_type, &self.settings.default_affiliation);

        let secret = match self.ca.register(&admin, &registration).await {
            Ok(secret) => secret,
            Err(CaError::DuplicateRegistration(name)) => {
                log::warn!(
                    "'{}' is already registered; waiting for a concurrent enrollment to land",
                    name
                );
                return self.await_concurrent_enrollment(subject, &home).await;
            }
            Err(err) => return Err(ProvisioningError::RegistrationFailed(err).into()),
        };

        let mut request = EnrollmentRequest::x509(subject, &secret, &self.settings.enrollment_profile);
        request.ca_name = registration.ca_name.clone().or_else(|| self.settings.ca_name.clone());
        let identity = self
            .ca
            .enroll(&request)
            .await
            .map_err(ProvisioningError::EnrollmentFailed)?;

        self.persist(&identity, &home).await?;
        log::info!("Provisioned credential for '{}'", subject);

        self.store
            .load_credential(subject, &home)
            .await
            .map_err(|e| ProvisioningError::Reload(e).into())
    }

    /// Writes key, chain and certificate. The certificate goes last so a
    /// load only succeeds once everything is in place; if anything after the
    /// key fails, the key is removed again.
    async fn persist(&self, identity: &EnrolledIdentity, home: &Path) -> Result<(), ProvisioningError> {
        self.store
            .create_subject_directory(home)
            .await
            .map_err(ProvisioningError::Persist)?;
        let key_path = self
            .store
            .write_private_key(identity, home)
            .await
            .map_err(ProvisioningError::Persist)?;

        let rest = async {
            self.store.write_ca_chain(identity, home).await?;
            self.store.write_certificate(identity, home).await
        };
        if let Err(err) = rest.await {
            if let Err(cleanup) = self.store.remove_key_file(&key_path).await {
                log::warn!("Failed to remove orphaned key {}: {}", key_path.display(), cleanup);
            }
            return Err(ProvisioningError::Persist(err));
        }
        Ok(())
    }

    /// Polls the store after a duplicate registration, in case another
    /// process is enrolling the same subject.
    async fn await_concurrent_enrollment(&self, subject: &str, home: &Path) -> Result<Credential, ProxyError> {
        let delay = self.settings.registration_retry_delay();
        for attempt in 1..=self.settings.registration_retry_attempts {
            tokio::time::sleep(delay).await;
            match self.store.load_credential(subject, home).await {
                Ok(credential) => {
                    log::info!("Credential for '{}' appeared after {} attempt(s)", subject, attempt);
                    return Ok(credential);
                }
                Err(err) if err.is_absent() => continue,
                Err(err) => return Err(ProvisioningError::Reload(err).into()),
            }
        }

        Err(ProvisioningError::RegistrationFailed(CaError::DuplicateRegistration(subject.to_string())).into())
    }
}
