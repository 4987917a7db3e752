// src/services/transaction_submitter.rs
//! Transaction submission on behalf of authenticated subjects.
//!
//! Resolves the subject's stored credential, builds a single-use network
//! client for it and hands the transaction to the ledger gateway. The
//! submitter never provisions credentials; a subject must enroll first.

use crate::blockchain::gateway_client::{LedgerGateway, NetworkClientFactory, TransactionRequest};
use crate::error::ProxyError;
use crate::models::credential::Credential;
use crate::models::subject::AuthenticatedSubject;
use crate::wallet::credential_storage::CredentialStore;
use bytes::Bytes;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Submit,
    Evaluate,
}

/// Submits and evaluates transactions as the calling subject.
#[derive(Clone)]
pub struct TransactionSubmitter {
    store: Arc<dyn CredentialStore>,
    factory: Arc<NetworkClientFactory>,
    gateway: Arc<dyn LedgerGateway>,
}

impl TransactionSubmitter {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        factory: Arc<NetworkClientFactory>,
        gateway: Arc<dyn LedgerGateway>,
    ) -> Self {
        TransactionSubmitter {
            store,
            factory,
            gateway,
        }
    }

    /// Submits a transaction and waits for it to commit.
    ///
    /// # Arguments
    /// * `subject` - Caller; must be active and already enrolled
    /// * `channel` - Channel name, must not be blank
    /// * `contract` - Chaincode name, must not be blank
    /// * `function` - Transaction function name
    /// * `args` - Function arguments
    ///
    /// # Returns
    /// Raw bytes returned by the transaction function, untouched.
    pub async fn submit(
        &self,
        subject: &AuthenticatedSubject,
        channel: &str,
        contract: &str,
        function: &str,
        args: Vec<String>,
    ) -> Result<Bytes, ProxyError> {
        self.run(Mode::Submit, subject, channel, contract, function, args).await
    }

    /// Evaluates a read-only transaction. Nothing is ordered or committed.
    pub async fn evaluate(
        &self,
        subject: &AuthenticatedSubject,
        channel: &str,
        contract: &str,
        function: &str,
        args: Vec<String>,
    ) -> Result<Bytes, ProxyError> {
        self.run(Mode::Evaluate, subject, channel, contract, function, args).await
    }

    async fn run(
        &self,
        mode: Mode,
        subject: &AuthenticatedSubject,
        channel: &str,
        contract: &str,
        function: &str,
        args: Vec<String>,
    ) -> Result<Bytes, ProxyError> {
        if !subject.active {
            return Err(ProxyError::Unauthenticated("session is not active".into()));
        }
        if channel.trim().is_empty() || contract.trim().is_empty() {
            return Err(ProxyError::BadRequest("channel and chaincode are required".into()));
        }

        let credential = self.load(&subject.subject).await?;
        let client = self.factory.build_client(&credential).await?;

        let request = TransactionRequest {
            channel: channel.to_string(),
            contract: contract.to_string(),
            function: function.to_string(),
            args,
        };
        log::info!(
            "{:?} {}::{} on channel {} as '{}'",
            mode,
            request.contract,
            request.function,
            request.channel,
            subject.subject
        );

        let result = match mode {
            Mode::Submit => self.gateway.submit(&client, &request).await?,
            Mode::Evaluate => self.gateway.evaluate(&client, &request).await?,
        };
        drop(client);
        Ok(result)
    }

    async fn load(&self, subject: &str) -> Result<Credential, ProxyError> {
        let home = self.store.subject_home(subject)?;
        match self.store.load_credential(subject, &home).await {
            Ok(credential) => Ok(credential),
            Err(err) if err.is_absent() => Err(ProxyError::CredentialNotProvisioned(subject.to_string())),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::models::credential::EnrolledIdentity;
    use crate::test_support::{gateway_settings, self_signed, write_anchor, FakeGateway};
    use crate::wallet::credential_storage::FileCredentialStore;
    use serde_json::Map;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        store: Arc<FileCredentialStore>,
        gateway: Arc<FakeGateway>,
        submitter: TransactionSubmitter,
    }

    fn fixture(gateway: FakeGateway) -> Fixture {
        let dir = TempDir::new().unwrap();
        let anchor = write_anchor(&dir);
        let store = Arc::new(FileCredentialStore::new(dir.path().join("fabric"), "msp", "Org1MSP"));
        let factory = Arc::new(NetworkClientFactory::new(gateway_settings(&anchor, "127.0.0.1:7051")));
        let gateway = Arc::new(gateway);
        let submitter = TransactionSubmitter::new(store.clone(), factory, gateway.clone());
        Fixture {
            _dir: dir,
            store,
            gateway,
            submitter,
        }
    }

    async fn enroll(store: &FileCredentialStore, subject: &str) {
        let home = store.subject_home(subject).unwrap();
        let (certificate_pem, private_key_pem) = self_signed(subject);
        let identity = EnrolledIdentity {
            name: subject.into(),
            certificate_pem,
            private_key_pem,
            ca_chain_pem: None,
        };
        store.create_subject_directory(&home).await.unwrap();
        store.write_private_key(&identity, &home).await.unwrap();
        store.write_certificate(&identity, &home).await.unwrap();
    }

    fn args() -> Vec<String> {
        ["asset1", "blue", "5", "tom", "300"].iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_submit_passes_result_through() {
        let fx = fixture(FakeGateway::returning(b"{\"ID\":\"asset1\"}"));
        enroll(&fx.store, "alice").await;

        let alice = AuthenticatedSubject::new("alice", Map::new());
        let result = fx
            .submitter
            .submit(&alice, "mychannel", "assetcc", "CreateAsset", args())
            .await
            .unwrap();

        assert_eq!(&result[..], b"{\"ID\":\"asset1\"}");
        let sent = fx.gateway.submitted.lock().unwrap()[0].clone();
        assert_eq!(sent.channel, "mychannel");
        assert_eq!(sent.contract, "assetcc");
        assert_eq!(sent.function, "CreateAsset");
        assert_eq!(sent.args, args());
    }

    #[tokio::test]
    async fn test_evaluate_uses_evaluate_path() {
        let fx = fixture(FakeGateway::returning(b"[]"));
        enroll(&fx.store, "alice").await;

        let alice = AuthenticatedSubject::new("alice", Map::new());
        fx.submitter
            .evaluate(&alice, "mychannel", "assetcc", "GetAllAssets", Vec::new())
            .await
            .unwrap();

        assert_eq!(fx.gateway.evaluated.lock().unwrap().len(), 1);
        assert!(fx.gateway.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unenrolled_subject_is_never_provisioned() {
        let fx = fixture(FakeGateway::returning(b""));
        let bob = AuthenticatedSubject::new("bob", Map::new());

        let err = fx
            .submitter
            .submit(&bob, "mychannel", "assetcc", "CreateAsset", args())
            .await
            .unwrap_err();

        assert!(matches!(err, ProxyError::CredentialNotProvisioned(s) if s == "bob"));
        assert!(!fx.store.subject_home("bob").unwrap().exists());
        assert_eq!(fx.gateway.calls(), 0);
    }

    #[tokio::test]
    async fn test_blank_route_and_inactive_session() {
        let fx = fixture(FakeGateway::returning(b""));
        enroll(&fx.store, "alice").await;
        let alice = AuthenticatedSubject::new("alice", Map::new());

        let err = fx.submitter.submit(&alice, " ", "assetcc", "f", vec![]).await.unwrap_err();
        assert!(matches!(err, ProxyError::BadRequest(_)));
        let err = fx.submitter.submit(&alice, "mychannel", "", "f", vec![]).await.unwrap_err();
        assert!(matches!(err, ProxyError::BadRequest(_)));

        let mut inactive = alice.clone();
        inactive.active = false;
        let err = fx.submitter.submit(&inactive, "mychannel", "assetcc", "f", vec![]).await.unwrap_err();
        assert!(matches!(err, ProxyError::Unauthenticated(_)));
        assert_eq!(fx.gateway.calls(), 0);
    }

    #[tokio::test]
    async fn test_gateway_failure_is_not_retried() {
        let mut gateway = FakeGateway::returning(b"");
        gateway.fail = true;
        let fx = fixture(gateway);
        enroll(&fx.store, "alice").await;

        let alice = AuthenticatedSubject::new("alice", Map::new());
        let err = fx
            .submitter
            .submit(&alice, "mychannel", "assetcc", "CreateAsset", args())
            .await
            .unwrap_err();

        assert!(matches!(err, ProxyError::SubmissionFailed(GatewayError::Timeout { .. })));
        assert_eq!(fx.gateway.calls(), 1);
    }

    #[tokio::test]
    async fn test_invalid_subject() {
        let fx = fixture(FakeGateway::returning(b""));
        let sneaky = AuthenticatedSubject::new("..", Map::new());

        let err = fx.submitter.submit(&sneaky, "mychannel", "assetcc", "f", vec![]).await.unwrap_err();
        assert!(matches!(err, ProxyError::InvalidSubject(_)));
    }
}
