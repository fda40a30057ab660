//! ACME certificate authority client
//!
//! Issues certificates from Let's Encrypt or any RFC 8555 directory using
//! HTTP-01 challenges answered through a [`ChallengeManager`].

use std::sync::Arc;

use async_trait::async_trait;
use certkeeper_common::DomainSet;
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, NewAccount,
    NewOrder, OrderStatus, RetryPolicy,
};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::challenge::{ChallengeGuard, ChallengeManager};
use super::storage::CertificateStorage;
use crate::authority::{AccountInfo, CertificateAuthority};
use crate::certificate::Certificate;
use crate::error::LifecycleError;

/// ACME account settings
#[derive(Debug, Clone)]
pub struct AcmeAccountSettings {
    pub directory_url: String,
    /// Contact email registered with the account
    pub email: Option<String>,
    /// Whether the operator agreed to the authority's terms of service
    pub accept_terms_of_service: bool,
}

/// [`CertificateAuthority`] backed by an ACME directory
pub struct AcmeAuthority {
    settings: AcmeAccountSettings,
    /// Account credentials are persisted here
    storage: CertificateStorage,
    challenges: ChallengeManager,
    account: Mutex<Option<(Arc<Account>, AccountInfo)>>,
}

impl AcmeAuthority {
    pub fn new(
        settings: AcmeAccountSettings,
        storage: CertificateStorage,
        challenges: ChallengeManager,
    ) -> Self {
        Self {
            settings,
            storage,
            challenges,
            account: Mutex::new(None),
        }
    }

    /// Challenges this client registers; share with the HTTP-01 responder.
    pub fn challenges(&self) -> &ChallengeManager {
        &self.challenges
    }

    pub fn directory_url(&self) -> &str {
        &self.settings.directory_url
    }

    async fn account(&self) -> Result<(Arc<Account>, AccountInfo), LifecycleError> {
        let mut cached = self.account.lock().await;
        if let Some((account, info)) = cached.as_ref() {
            return Ok((Arc::clone(account), info.clone()));
        }

        let account = match self.restore_account().await? {
            Some(account) => account,
            None => self.register_account().await?,
        };

        let info = AccountInfo {
            id: account.id().to_string(),
            contact: self.settings.email.clone(),
        };
        let account = Arc::new(account);
        *cached = Some((Arc::clone(&account), info.clone()));
        Ok((account, info))
    }

    async fn restore_account(&self) -> Result<Option<Account>, LifecycleError> {
        let storage = self.storage.clone();
        let json = match tokio::task::spawn_blocking(move || storage.load_credentials_json()).await {
            Ok(Ok(Some(json))) => json,
            Ok(Ok(None)) => return Ok(None),
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to read stored ACME credentials, registering a new account");
                return Ok(None);
            }
            Err(e) => {
                warn!(error = %e, "Credential read task failed, registering a new account");
                return Ok(None);
            }
        };

        let credentials: AccountCredentials = match serde_json::from_str(&json) {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!(error = %e, "Stored ACME credentials are invalid, registering a new account");
                return Ok(None);
            }
        };

        let account = Account::builder()
            .map_err(map_acme_error)?
            .from_credentials(credentials)
            .await
            .map_err(map_acme_error)?;

        info!(account = %account.id(), "Restored ACME account from storage");
        Ok(Some(account))
    }

    async fn register_account(&self) -> Result<Account, LifecycleError> {
        if !self.settings.accept_terms_of_service {
            return Err(LifecycleError::AuthorityRejected(
                "terms of service must be accepted to register an ACME account".to_string(),
            ));
        }

        let contact = self
            .settings
            .email
            .as_ref()
            .map(|email| format!("mailto:{}", email));
        let contact: Vec<&str> = contact.iter().map(String::as_str).collect();

        info!(
            directory = %self.settings.directory_url,
            email = ?self.settings.email,
            "Registering ACME account"
        );

        let (account, credentials) = Account::builder()
            .map_err(map_acme_error)?
            .create(
                &NewAccount {
                    contact: &contact,
                    terms_of_service_agreed: true,
                    only_return_existing: false,
                },
                self.settings.directory_url.clone(),
                None,
            )
            .await
            .map_err(map_acme_error)?;

        match serde_json::to_string(&credentials) {
            Ok(json) => {
                let storage = self.storage.clone();
                match tokio::task::spawn_blocking(move || storage.save_credentials_json(&json)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(error = %e, "Failed to persist ACME credentials"),
                    Err(e) => warn!(error = %e, "Credential write task failed"),
                }
            }
            Err(e) => warn!(error = %e, "Failed to serialize ACME credentials"),
        }

        info!(account = %account.id(), "ACME account registered");
        Ok(account)
    }
}

#[async_trait]
impl CertificateAuthority for AcmeAuthority {
    async fn get_or_create_account(
        &self,
        _cancel: &CancellationToken,
    ) -> Result<AccountInfo, LifecycleError> {
        self.account().await.map(|(_, info)| info)
    }

    async fn create_certificate(
        &self,
        domains: &DomainSet,
        cancel: &CancellationToken,
    ) -> Result<Certificate, LifecycleError> {
        let start = Instant::now();
        let (account, _) = self.account().await?;

        let identifiers: Vec<Identifier> = domains
            .iter()
            .map(|domain| Identifier::Dns(domain.to_string()))
            .collect();

        info!(domains = %domains, "Creating ACME order");
        let mut order = account
            .new_order(&NewOrder::new(&identifiers))
            .await
            .map_err(map_acme_error)?;

        // Dropped on every exit path, which withdraws the challenge responses
        let mut guards: Vec<ChallengeGuard> = Vec::with_capacity(identifiers.len());

        let mut authorizations = order.authorizations();
        while let Some(authz) = authorizations.next().await {
            let mut authz = authz.map_err(map_acme_error)?;

            match authz.status {
                AuthorizationStatus::Pending => {}
                AuthorizationStatus::Valid => continue,
                ref status => {
                    return Err(LifecycleError::AuthorityRejected(format!(
                        "authorization is {:?}",
                        status
                    )));
                }
            }

            let domain = match authz.identifier().identifier {
                Identifier::Dns(name) => name.clone(),
                other => format!("{:?}", other),
            };

            let mut challenge = authz.challenge(ChallengeType::Http01).ok_or_else(|| {
                LifecycleError::AuthorityRejected(format!(
                    "no HTTP-01 challenge offered for {}",
                    domain
                ))
            })?;

            let key_authorization = challenge.key_authorization().as_str().to_string();
            guards.push(
                self.challenges
                    .add_challenge(&domain, &challenge.token, &key_authorization),
            );

            challenge.set_ready().await.map_err(map_acme_error)?;
            debug!(domain = %domain, "HTTP-01 challenge ready for validation");
        }

        if cancel.is_cancelled() {
            return Err(LifecycleError::Cancelled);
        }

        let status = order
            .poll_ready(&RetryPolicy::default())
            .await
            .map_err(map_acme_error)?;
        drop(guards);

        if !matches!(status, OrderStatus::Ready) {
            return Err(LifecycleError::AuthorityRejected(format!(
                "order is {:?} after validation",
                status
            )));
        }

        let key_pem = order.finalize().await.map_err(map_acme_error)?;
        let chain_pem = order
            .poll_certificate(&RetryPolicy::default())
            .await
            .map_err(map_acme_error)?;

        let certificate = Certificate::from_pem(chain_pem, key_pem)?;
        info!(
            domains = %domains,
            expires = %certificate.not_after(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "ACME certificate issued"
        );
        Ok(certificate)
    }
}

impl std::fmt::Debug for AcmeAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcmeAuthority")
            .field("settings", &self.settings)
            .field("storage", &self.storage)
            .finish_non_exhaustive()
    }
}

/// Problem documents are the authority saying no; anything else means we
/// never got an answer.
fn map_acme_error(error: instant_acme::Error) -> LifecycleError {
    match error {
        instant_acme::Error::Api(problem) => LifecycleError::AuthorityRejected(problem.to_string()),
        other => LifecycleError::AuthorityUnreachable(other.to_string()),
    }
}
