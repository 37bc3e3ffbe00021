use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::protocol::{AcmeAccount, AcmeDirectory};
use crate::{PersistenceService, RenewalConfig, RenewalError};

/// Logs in with the persisted account key, registering a new account when
/// none is stored. The authenticated account is kept for the lifetime of the
/// authenticator; a failed attempt is retried on the next call.
pub struct AcmeAuthenticator {
    directory: Arc<dyn AcmeDirectory>,
    directory_url: String,
    contact: Vec<String>,
    account: OnceCell<Arc<dyn AcmeAccount>>,
}

impl AcmeAuthenticator {
    pub fn new(config: &RenewalConfig, directory: Arc<dyn AcmeDirectory>) -> Self {
        Self {
            directory,
            directory_url: config.directory_url.clone(),
            contact: config.contact.clone(),
            account: OnceCell::new(),
        }
    }

    pub async fn authenticate(
        &self,
        persistence: &PersistenceService,
    ) -> Result<Arc<dyn AcmeAccount>, RenewalError> {
        let account = self
            .account
            .get_or_try_init(|| self.login_or_register(persistence))
            .await?;
        Ok(account.clone())
    }

    async fn login_or_register(
        &self,
        persistence: &PersistenceService,
    ) -> Result<Arc<dyn AcmeAccount>, RenewalError> {
        if let Some(key) = persistence.retrieve_account_key().await {
            log::debug!("using existing account");
            let account = self.directory.login(&self.directory_url, &key).await?;
            return Ok(account);
        }
        log::debug!("creating account with contact {:?}", self.contact);
        let (account, key) = self
            .directory
            .register(&self.directory_url, &self.contact)
            .await?;
        persistence.persist_account_key(&key).await;
        Ok(account)
    }
}
