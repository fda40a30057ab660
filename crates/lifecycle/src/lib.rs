//! Certkeeper
//!
//! Automatic TLS certificate lifecycle management. Issues a certificate
//! covering the configured domains, serves it per connection by SNI,
//! persists it to every registered repository and renews it before expiry.
//!
//! # Example
//!
//! ```ignore
//! use certkeeper::CertKeeper;
//! use certkeeper_config::Config;
//! use tokio_util::sync::CancellationToken;
//!
//! let config = Config::from_file("/etc/certkeeper/certkeeper.kdl")?;
//! let keeper = CertKeeper::from_config(&config)?;
//!
//! let cancel = CancellationToken::new();
//! let task = keeper.spawn(cancel.clone());
//! let tls = keeper.resolver().server_config()?;
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod acme;
pub mod app;
pub mod authority;
pub mod certificate;
pub mod error;
pub mod manager;
pub mod repository;
pub mod selector;

#[cfg(test)]
mod test_support;

// ============================================================================
// Public API Re-exports
// ============================================================================

// Composition root
pub use app::CertKeeper;

// Lifecycle
pub use manager::{IssuanceOutcome, LifecycleManager, ManagerState, RenewalPolicy};

// Collaborator seams
pub use authority::{AccountInfo, CertificateAuthority};
pub use repository::CertificateRepository;

// Certificates and selection
pub use certificate::Certificate;
pub use selector::{CertificateSelector, ConnectionInfo, SniCertResolver};

// ACME
pub use acme::{AcmeAccountSettings, AcmeAuthority, CertificateStorage, ChallengeManager};

// Errors
pub use error::{CertificateError, LifecycleError, StorageError};
