//! Certificate authority capability.
//!
//! The lifecycle manager drives issuance through [`CertificateAuthority`]
//! and never speaks a wire protocol itself. [`crate::acme::AcmeAuthority`]
//! is the ACME implementation.

use async_trait::async_trait;
use certkeeper_common::DomainSet;
use tokio_util::sync::CancellationToken;

use crate::certificate::Certificate;
use crate::error::LifecycleError;

/// Registered account at the authority
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    /// Account URL / key identifier assigned by the authority
    pub id: String,
    pub contact: Option<String>,
}

/// Issues signed certificates for sets of domain names.
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// Return the account to order with, registering one if none exists.
    ///
    /// Must be idempotent: repeated calls, including across restarts, reuse
    /// the same account.
    async fn get_or_create_account(
        &self,
        cancel: &CancellationToken,
    ) -> Result<AccountInfo, LifecycleError>;

    /// Obtain one certificate covering every name in `domains`.
    ///
    /// Fails with [`LifecycleError::AuthorityUnreachable`] or
    /// [`LifecycleError::AuthorityRejected`].
    async fn create_certificate(
        &self,
        domains: &DomainSet,
        cancel: &CancellationToken,
    ) -> Result<Certificate, LifecycleError>;
}
