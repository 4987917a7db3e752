// src/wallet/credential_storage.rs
//! Credential storage management for the wallet component.
//!
//! Persists each subject's key and certificate in the directory layout the
//! Fabric CA client uses, rooted at the configured client home:
//!
//! ```text
//! <client_home>/<msp>/keystore/<ski>_sk           admin key
//! <client_home>/<msp>/signcerts/cert.pem          admin certificate
//! <client_home>/<msp>/cacerts/ca-chain.pem        issuing chain, when returned
//! <client_home>/users/<subject>/<msp>/keystore/<ski>_sk
//! <client_home>/users/<subject>/<msp>/signcerts/cert.pem
//! <client_home>/users/<subject>/<msp>/cacerts/ca-chain.pem
//! ```
//!
//! Writes go through a hidden temporary file and a rename so a reader never
//! sees a half-written credential. A keystore holds exactly one key once a
//! write succeeds.

use crate::error::StoreError;
use crate::models::credential::{Credential, EnrolledIdentity};
use crate::wallet::key_management::KeyManager;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

const KEYSTORE_DIR: &str = "keystore";
const SIGNCERTS_DIR: &str = "signcerts";
const CACERTS_DIR: &str = "cacerts";
const CERT_FILE: &str = "cert.pem";
const CA_CHAIN_FILE: &str = "ca-chain.pem";
const USERS_DIR: &str = "users";

const DIR_MODE: u32 = 0o700;
const KEY_MODE: u32 = 0o600;
const CERT_MODE: u32 = 0o644;

/// Persistence capability for subject credentials.
///
/// Implementations must serialise concurrent writes for the same home;
/// callers take [`CredentialStore::lock`] around any check-then-write
/// sequence.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Home directory for `subject`, rejecting names that would escape the
    /// users tree.
    fn subject_home(&self, subject: &str) -> Result<PathBuf, StoreError>;

    /// Home directory of the registrar (admin) identity.
    fn admin_home(&self) -> PathBuf;

    /// First visible key file in the home's keystore.
    async fn lookup_key_file(&self, home: &Path) -> Result<PathBuf, StoreError>;

    /// Loads the credential stored under `home`. The key is looked up first.
    async fn load_credential(&self, subject: &str, home: &Path) -> Result<Credential, StoreError>;

    /// Creates the keystore, signcerts and cacerts directories. Idempotent.
    async fn create_subject_directory(&self, home: &Path) -> Result<(), StoreError>;

    /// Writes the enrolled certificate, replacing any previous one.
    async fn write_certificate(
        &self,
        identity: &EnrolledIdentity,
        home: &Path,
    ) -> Result<PathBuf, StoreError>;

    /// Writes the enrolled private key as `<ski>_sk` and removes any other
    /// key left in the keystore.
    async fn write_private_key(
        &self,
        identity: &EnrolledIdentity,
        home: &Path,
    ) -> Result<PathBuf, StoreError>;

    /// Writes the issuing chain returned with the certificate, if any.
    async fn write_ca_chain(
        &self,
        identity: &EnrolledIdentity,
        home: &Path,
    ) -> Result<Option<PathBuf>, StoreError>;

    /// Removes a key written by an enrollment that could not be completed.
    async fn remove_key_file(&self, path: &Path) -> Result<(), StoreError>;

    /// Acquires the write lock for `home`.
    async fn lock(&self, home: &Path) -> OwnedMutexGuard<()>;
}

/// Filesystem-backed credential store.
pub struct FileCredentialStore {
    client_home: PathBuf,
    msp_dir: String,
    msp_id: String,
    locks: Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
}

impl FileCredentialStore {
    /// Creates a store rooted at `client_home`.
    ///
    /// # Arguments
    /// * `client_home` - Root directory shared with the admin identity
    /// * `msp_dir` - Name of the MSP directory inside each home (usually `msp`)
    /// * `msp_id` - MSP ID stamped on loaded credentials
    pub fn new(client_home: impl Into<PathBuf>, msp_dir: impl Into<String>, msp_id: impl Into<String>) -> Self {
        FileCredentialStore {
            client_home: client_home.into(),
            msp_dir: msp_dir.into(),
            msp_id: msp_id.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn keystore_dir(&self, home: &Path) -> PathBuf {
        home.join(&self.msp_dir).join(KEYSTORE_DIR)
    }

    fn signcerts_dir(&self, home: &Path) -> PathBuf {
        home.join(&self.msp_dir).join(SIGNCERTS_DIR)
    }

    fn cacerts_dir(&self, home: &Path) -> PathBuf {
        home.join(&self.msp_dir).join(CACERTS_DIR)
    }

    fn certificate_path(&self, home: &Path) -> PathBuf {
        self.signcerts_dir(home).join(CERT_FILE)
    }

    /// Visible regular files in the home's keystore, sorted by path.
    async fn keystore_entries(&self, home: &Path) -> Result<Vec<PathBuf>, StoreError> {
        let keystore = self.keystore_dir(home);
        let mut entries = match tokio::fs::read_dir(&keystore).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(keystore));
            }
            Err(source) => {
                return Err(StoreError::Read {
                    path: keystore,
                    source,
                })
            }
        };

        let mut candidates = Vec::new();
        loop {
            let entry = entries.next_entry().await.map_err(|source| StoreError::Read {
                path: keystore.clone(),
                source,
            })?;
            let Some(entry) = entry else { break };

            if is_hidden(&entry.file_name()) {
                continue;
            }
            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            if is_file {
                candidates.push(entry.path());
            }
        }

        candidates.sort();
        Ok(candidates)
    }
}

/// Rejects subjects that are not a single, ordinary path component.
fn validate_subject(subject: &str) -> Result<(), StoreError> {
    let invalid = subject.is_empty()
        || subject == "."
        || subject == ".."
        || subject.contains(['/', '\\', '\0']);
    if invalid {
        return Err(StoreError::InvalidSubject(subject.to_string()));
    }
    Ok(())
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

async fn read_to_string(path: &Path) -> Result<String, StoreError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| StoreError::Read {
            path: path.to_path_buf(),
            source,
        })
}

/// Writes `contents` to `path` atomically with the given permissions.
async fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> Result<(), StoreError> {
    let write_err = |source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = dir.join(format!(".{}.{}.tmp", file_name, hex::encode(rand::random::<[u8; 6]>())));

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(mode);
    #[cfg(not(unix))]
    let _ = mode;

    let result = async {
        let mut file = options.open(&tmp_path).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp_path, path).await
    }
    .await;

    if let Err(err) = result {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(write_err(err));
    }
    Ok(())
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    fn subject_home(&self, subject: &str) -> Result<PathBuf, StoreError> {
        validate_subject(subject)?;
        Ok(self.client_home.join(USERS_DIR).join(subject))
    }

    fn admin_home(&self) -> PathBuf {
        self.client_home.clone()
    }

    async fn lookup_key_file(&self, home: &Path) -> Result<PathBuf, StoreError> {
        self.keystore_entries(home)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound(self.keystore_dir(home)))
    }

    async fn load_credential(&self, subject: &str, home: &Path) -> Result<Credential, StoreError> {
        let key_path = match self.lookup_key_file(home).await {
            Ok(path) => path,
            Err(StoreError::NotFound(keystore)) => return Err(StoreError::MissingKey(keystore)),
            Err(err) => return Err(err),
        };

        let cert_path = self.certificate_path(home);
        let certificate_pem = match tokio::fs::read_to_string(&cert_path).await {
            Ok(pem) => pem,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::MissingCertificate(cert_path));
            }
            Err(source) => {
                return Err(StoreError::Read {
                    path: cert_path,
                    source,
                })
            }
        };
        let private_key_pem = read_to_string(&key_path).await?;

        Ok(Credential {
            subject: subject.to_string(),
            msp_id: self.msp_id.clone(),
            certificate_pem,
            private_key_pem,
            key_path,
        })
    }

    async fn create_subject_directory(&self, home: &Path) -> Result<(), StoreError> {
        for dir in [self.keystore_dir(home), self.signcerts_dir(home), self.cacerts_dir(home)] {
            let mut builder = tokio::fs::DirBuilder::new();
            builder.recursive(true);
            #[cfg(unix)]
            builder.mode(DIR_MODE);

            builder
                .create(&dir)
                .await
                .map_err(|source| StoreError::Write { path: dir, source })?;
        }
        Ok(())
    }

    async fn write_certificate(
        &self,
        identity: &EnrolledIdentity,
        home: &Path,
    ) -> Result<PathBuf, StoreError> {
        let path = self.certificate_path(home);
        write_atomic(&path, identity.certificate_pem.as_bytes(), CERT_MODE).await?;
        log::debug!("Stored certificate for '{}' at {}", identity.name, path.display());
        Ok(path)
    }

    async fn write_private_key(
        &self,
        identity: &EnrolledIdentity,
        home: &Path,
    ) -> Result<PathBuf, StoreError> {
        let ski = KeyManager::from_pem(&identity.private_key_pem)
            .and_then(|key| key.key_identifier())
            .map_err(|e| StoreError::InvalidKeyMaterial(e.to_string()))?;

        let path = self.keystore_dir(home).join(format!("{}_sk", ski));
        write_atomic(&path, identity.private_key_pem.as_bytes(), KEY_MODE).await?;
        log::debug!("Stored private key for '{}' at {}", identity.name, path.display());

        for stale in self.keystore_entries(home).await? {
            if stale != path {
                log::debug!("Removing superseded key {}", stale.display());
                self.remove_key_file(&stale).await?;
            }
        }
        Ok(path)
    }

    async fn write_ca_chain(
        &self,
        identity: &EnrolledIdentity,
        home: &Path,
    ) -> Result<Option<PathBuf>, StoreError> {
        let Some(chain) = identity.ca_chain_pem.as_deref() else {
            return Ok(None);
        };
        let path = self.cacerts_dir(home).join(CA_CHAIN_FILE);
        write_atomic(&path, chain.as_bytes(), CERT_MODE).await?;
        Ok(Some(path))
    }

    async fn remove_key_file(&self, path: &Path) -> Result<(), StoreError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Write {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    async fn lock(&self, home: &Path) -> OwnedMutexGuard<()> {
        let entry = {
            let mut locks = match self.locks.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(home.to_path_buf())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        entry.lock_owned().await
    }
}
