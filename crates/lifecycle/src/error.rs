//! Error types for certificate lifecycle management.

use thiserror::Error;

/// Errors turning PEM material into a servable certificate.
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("failed to parse PEM: {0}")]
    Pem(String),

    #[error("no certificate found in PEM input")]
    MissingCertificate,

    #[error("invalid X509 certificate: {0}")]
    X509(String),

    #[error("no private key found in PEM input")]
    MissingKey,

    #[error("unsupported private key: {0}")]
    UnsupportedKey(String),
}

/// Errors from a certificate repository.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("stored certificate is unusable: {0}")]
    Certificate(#[from] CertificateError),

    #[error("certificate covers no domain names")]
    NoDomain,

    #[error("repository backend error: {0}")]
    Backend(String),
}

/// Errors surfaced by the lifecycle manager.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The host cannot swap certificates at runtime; automatic issuance is disabled
    #[error("host transport does not support dynamic certificate binding")]
    HostUnsupported,

    /// No issuable domain is configured; automatic issuance is disabled
    #[error("no domains configured for automatic certificates")]
    NotConfigured,

    #[error("certificate authority unreachable: {0}")]
    AuthorityUnreachable(String),

    /// Invalid domain, terms of service not accepted, rate limited...
    #[error("certificate authority rejected the request: {0}")]
    AuthorityRejected(String),

    #[error("repository '{repository}' failed to save the certificate: {source}")]
    RepositorySaveFailed {
        repository: String,
        #[source]
        source: StorageError,
    },

    /// Everything that went wrong during one issuance attempt
    #[error("certificate issuance failed: {}", join_failures(.0))]
    IssuanceAggregateFailure(Vec<LifecycleError>),

    #[error("issued certificate is unusable: {0}")]
    Certificate(#[from] CertificateError),

    #[error("operation cancelled")]
    Cancelled,
}

impl LifecycleError {
    /// Wrap a single failure into an aggregate, leaving aggregates and
    /// cancellation untouched.
    pub fn into_aggregate(self) -> Self {
        match self {
            LifecycleError::Cancelled | LifecycleError::IssuanceAggregateFailure(_) => self,
            other => LifecycleError::IssuanceAggregateFailure(vec![other]),
        }
    }

    /// Underlying failures of an aggregate; a single-element slice otherwise.
    pub fn failures(&self) -> &[LifecycleError] {
        match self {
            LifecycleError::IssuanceAggregateFailure(failures) => failures,
            other => std::slice::from_ref(other),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, LifecycleError::Cancelled)
    }
}

fn join_failures(failures: &[LifecycleError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_lists_every_failure() {
        let err = LifecycleError::IssuanceAggregateFailure(vec![
            LifecycleError::RepositorySaveFailed {
                repository: "disk".to_string(),
                source: StorageError::Backend("disk full".to_string()),
            },
            LifecycleError::AuthorityUnreachable("timeout".to_string()),
        ]);

        let message = err.to_string();
        assert!(message.contains("repository 'disk' failed"));
        assert!(message.contains("disk full"));
        assert!(message.contains("timeout"));
        assert_eq!(err.failures().len(), 2);
    }

    #[test]
    fn test_into_aggregate() {
        let err = LifecycleError::AuthorityRejected("rateLimited".to_string()).into_aggregate();
        assert!(matches!(
            err.failures(),
            [LifecycleError::AuthorityRejected(_)]
        ));

        assert!(LifecycleError::Cancelled.into_aggregate().is_cancelled());

        let nested = err.into_aggregate();
        assert_eq!(nested.failures().len(), 1);
    }
}
