//! Certificate persistence capability.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::certificate::Certificate;
use crate::error::StorageError;

/// Durable destination (and optionally source) for issued certificates.
///
/// Repositories are independent of each other; each handles its own
/// internal locking.
#[async_trait]
pub trait CertificateRepository: Send + Sync {
    /// Short name used in logs and error reports
    fn name(&self) -> &str;

    /// Persist `certificate`.
    async fn save(
        &self,
        certificate: &Certificate,
        cancel: &CancellationToken,
    ) -> Result<(), StorageError>;

    /// Certificates to serve before the first issuance check.
    ///
    /// Save-only repositories keep the default, which loads nothing.
    async fn load(&self, _cancel: &CancellationToken) -> Result<Vec<Certificate>, StorageError> {
        Ok(Vec::new())
    }
}
