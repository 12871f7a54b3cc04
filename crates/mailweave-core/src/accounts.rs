//! Account provisioning and credential rotation

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use mailweave_smtp::SmtpClient;

use crate::account::{Account, ServerConfig};
use crate::database::Database;
use crate::store::MailboxConnector;
use crate::vault::SecretVault;
use crate::{EngineError, EngineResult};

/// Input for account creation. The password is consumed here and only
/// ever persisted encrypted.
#[derive(Clone)]
pub struct NewAccountRequest {
    pub email: String,
    pub display_name: Option<String>,
    pub provider: String,
    pub password: String,
    pub config: ServerConfig,
}

/// Checks that outbound credentials are accepted by the mail relay
#[async_trait]
pub trait OutboundVerifier: Send + Sync {
    async fn verify(&self, account: &Account, password: &str) -> EngineResult<()>;
}

/// Production verifier backed by an SMTP connection test
pub struct SmtpVerifier;

#[async_trait]
impl OutboundVerifier for SmtpVerifier {
    async fn verify(&self, account: &Account, password: &str) -> EngineResult<()> {
        let client = SmtpClient::new(&account.config.smtp_host, account.config.smtp_port);
        client.verify_password(&account.email, password).await?;
        Ok(())
    }
}

/// Manages account lifecycle: provisioning, password rotation,
/// activation, and removal.
pub struct AccountService {
    db: Arc<Database>,
    vault: Arc<SecretVault>,
    connector: Arc<dyn MailboxConnector>,
    verifier: Arc<dyn OutboundVerifier>,
}

impl AccountService {
    pub fn new(
        db: Arc<Database>,
        vault: Arc<SecretVault>,
        connector: Arc<dyn MailboxConnector>,
        verifier: Arc<dyn OutboundVerifier>,
    ) -> Self {
        Self {
            db,
            vault,
            connector,
            verifier,
        }
    }

    /// Create an account after verifying the credentials against the
    /// remote server. Nothing is stored if the connectivity check fails.
    pub async fn create(&self, request: NewAccountRequest) -> EngineResult<Account> {
        if !request.email.contains('@') {
            return Err(EngineError::Validation(format!(
                "not an email address: {}",
                request.email
            )));
        }
        if request.password.is_empty() {
            return Err(EngineError::Validation("password is empty".to_string()));
        }

        let account = Account {
            id: Uuid::new_v4().to_string(),
            email: request.email,
            display_name: request.display_name,
            provider: request.provider,
            config: request.config,
            secret: self.vault.encrypt(&request.password)?,
            active: true,
            last_sync: None,
            last_sync_status: None,
            sync_error: None,
        };

        self.verify_connectivity(&account, &request.password).await?;
        self.db.insert_account(&account).await?;

        info!(account = %account.email, "account created");
        Ok(account)
    }

    /// Re-encrypt a new password after verifying it against the server
    pub async fn rotate_password(&self, account_id: &str, password: &str) -> EngineResult<()> {
        if password.is_empty() {
            return Err(EngineError::Validation("password is empty".to_string()));
        }

        let mut account = self.db.get_account(account_id).await?;
        account.secret = self.vault.encrypt(password)?;

        self.verify_connectivity(&account, password).await?;
        self.db
            .update_account_secret(account_id, &account.secret)
            .await?;

        info!(account = %account.email, "password rotated");
        Ok(())
    }

    /// Enable or disable sync participation
    pub async fn set_active(&self, account_id: &str, active: bool) -> EngineResult<()> {
        self.db.get_account(account_id).await?;
        self.db.set_account_active(account_id, active).await
    }

    /// Delete an account and its cached messages
    pub async fn delete(&self, account_id: &str) -> EngineResult<()> {
        self.db.get_account(account_id).await?;
        self.db.delete_account(account_id).await
    }

    /// Verify both directions: an IMAP session and the SMTP relay
    async fn verify_connectivity(&self, account: &Account, password: &str) -> EngineResult<()> {
        let mut remote = self.connector.connect(account).await?;
        if let Err(e) = remote.close().await {
            warn!("error closing verification session: {}", e);
        }
        self.verifier.verify(account, password).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::store::testing::{MockConnector, MockState};

    #[derive(Default)]
    struct MockVerifier {
        fail: bool,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl OutboundVerifier for MockVerifier {
        async fn verify(&self, account: &Account, _password: &str) -> EngineResult<()> {
            self.calls.lock().unwrap().push(account.email.clone());
            if self.fail {
                return Err(EngineError::Connection("relay refused".to_string()));
            }
            Ok(())
        }
    }

    fn request(email: &str) -> NewAccountRequest {
        NewAccountRequest {
            email: email.to_string(),
            display_name: Some("Me".to_string()),
            provider: "custom".to_string(),
            password: "hunter2".to_string(),
            config: ServerConfig::new("imap.example.com", 993, "smtp.example.com", 587),
        }
    }

    async fn service_with(
        state: MockState,
        verifier: Arc<MockVerifier>,
    ) -> (AccountService, Arc<Database>, MockConnector) {
        let db = Arc::new(Database::open_memory().await.unwrap());
        let vault = Arc::new(SecretVault::from_key_material(None).unwrap());
        let connector = MockConnector::new(state);
        let service = AccountService::new(
            Arc::clone(&db),
            vault,
            Arc::new(connector.clone()),
            verifier,
        );
        (service, db, connector)
    }

    async fn service(state: MockState) -> (AccountService, Arc<Database>, MockConnector) {
        service_with(state, Arc::new(MockVerifier::default())).await
    }

    #[tokio::test]
    async fn create_verifies_and_stores_encrypted() {
        let (service, db, connector) = service(MockState::default()).await;

        let account = service.create(request("me@example.com")).await.unwrap();
        assert_eq!(connector.state.lock().unwrap().connects, 1);

        let stored = db.get_account(&account.id).await.unwrap();
        assert_eq!(stored.email, "me@example.com");
        // The stored secret is ciphertext, never the password itself
        assert_ne!(stored.secret.ciphertext, "hunter2");
        assert!(stored.active);
    }

    #[tokio::test]
    async fn failed_verification_stores_nothing() {
        let state = MockState {
            fail_connect: true,
            ..Default::default()
        };
        let (service, db, _) = service(state).await;

        let result = service.create(request("me@example.com")).await;
        assert!(matches!(result, Err(EngineError::Connection(_))));
        assert!(db.get_accounts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn relay_rejection_aborts_create() {
        let verifier = Arc::new(MockVerifier {
            fail: true,
            ..Default::default()
        });
        let (service, db, _) = service_with(MockState::default(), Arc::clone(&verifier)).await;

        let result = service.create(request("me@example.com")).await;
        assert!(matches!(result, Err(EngineError::Connection(_))));
        assert_eq!(verifier.calls.lock().unwrap().len(), 1);
        assert!(db.get_accounts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_malformed_email() {
        let (service, _, connector) = service(MockState::default()).await;

        let result = service.create(request("not-an-address")).await;
        assert!(matches!(result, Err(EngineError::Validation(_))));
        assert_eq!(connector.state.lock().unwrap().connects, 0);
    }

    #[tokio::test]
    async fn rotate_password_replaces_the_secret() {
        let (service, db, _) = service(MockState::default()).await;
        let account = service.create(request("me@example.com")).await.unwrap();
        let old_ciphertext = db
            .get_account(&account.id)
            .await
            .unwrap()
            .secret
            .ciphertext;

        service
            .rotate_password(&account.id, "correct horse")
            .await
            .unwrap();

        let rotated = db.get_account(&account.id).await.unwrap();
        assert_ne!(rotated.secret.ciphertext, old_ciphertext);
    }

    #[tokio::test]
    async fn unknown_account_operations_fail() {
        let (service, _, _) = service(MockState::default()).await;
        assert!(matches!(
            service.set_active("missing", false).await,
            Err(EngineError::AccountNotFound(_))
        ));
        assert!(matches!(
            service.delete("missing").await,
            Err(EngineError::AccountNotFound(_))
        ));
    }
}
