//! Configuration for certkeeper.
//!
//! Configuration is written in [KDL](https://kdl.dev):
//!
//! ```kdl
//! acme {
//!     email "admin@example.com"
//!     domains "example.com" "www.example.com"
//!     accept-terms-of-service #true
//!     staging #false
//!     storage "/var/lib/certkeeper"
//!     renew-before-days 30
//!     check-interval-secs 43200
//!     transport "rustls"
//!     fallback-cert {
//!         cert-file "/etc/certkeeper/fallback.crt"
//!         key-file "/etc/certkeeper/fallback.key"
//!     }
//! }
//! ```
//!
//! A missing `acme` block yields a configuration with no domains, which
//! disables automatic certificates.

mod acme;
mod kdl;
pub mod validate;

use std::path::Path;

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, info};

pub use acme::{
    AcmeConfig, AcmeDirectory, FallbackCertificateConfig, HostTransport, RenewalSettings,
    LETS_ENCRYPT_PRODUCTION, LETS_ENCRYPT_STAGING,
};
pub use certkeeper_common::DomainSet;

/// Largest accepted `renew-before-days`.
pub const MAX_RENEW_BEFORE_DAYS: u32 = 365;

/// Structural configuration error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid domain name '{0}'")]
    InvalidDomain(String),

    #[error("invalid contact email '{0}'")]
    InvalidEmail(String),

    #[error("check-interval-secs must be greater than zero")]
    ZeroCheckInterval,

    #[error("renew-before-days must be at most {max}, got {0}", max = MAX_RENEW_BEFORE_DAYS)]
    RenewBeforeDaysTooLarge(u32),

    #[error("storage path must not be empty")]
    EmptyStoragePath,

    #[error("fallback certificate requires both cert-file and key-file")]
    IncompleteFallback,
}

/// Root configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Automatic certificate settings
    pub acme: AcmeConfig,
}

impl Config {
    /// Load configuration from a KDL file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;

        info!(path = %path.display(), "Loading configuration");
        Self::from_kdl_str(&content)
            .with_context(|| format!("Failed to parse configuration file {}", path.display()))
    }

    /// Parse configuration from KDL source.
    pub fn from_kdl_str(source: &str) -> Result<Self> {
        let config = kdl::parse_document(source)?;
        debug!(
            domains = %config.acme.domains,
            transport = ?config.acme.transport,
            renewal = config.acme.renewal().is_some(),
            "Parsed configuration"
        );
        Ok(config)
    }

    /// Check structural validity.
    ///
    /// File-system checks and best-practice warnings live in [`validate`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let acme = &self.acme;

        for domain in acme.domains.iter() {
            if !is_valid_domain(domain) {
                return Err(ConfigError::InvalidDomain(domain.to_string()));
            }
        }

        if let Some(ref email) = acme.email {
            let valid = email
                .split_once('@')
                .is_some_and(|(user, host)| !user.is_empty() && host.contains('.'));
            if !valid {
                return Err(ConfigError::InvalidEmail(email.clone()));
            }
        }

        if acme.check_interval_secs == Some(0) {
            return Err(ConfigError::ZeroCheckInterval);
        }

        if let Some(days) = acme.renew_before_days {
            if days > MAX_RENEW_BEFORE_DAYS {
                return Err(ConfigError::RenewBeforeDaysTooLarge(days));
            }
        }

        if acme.storage.as_os_str().is_empty() {
            return Err(ConfigError::EmptyStoragePath);
        }

        if let Some(ref fallback) = acme.fallback {
            if fallback.cert_file.as_os_str().is_empty() || fallback.key_file.as_os_str().is_empty()
            {
                return Err(ConfigError::IncompleteFallback);
            }
        }

        Ok(())
    }
}

/// Hostname syntax check (labels of letters, digits and hyphens, optional
/// leading `*.` wildcard label).
fn is_valid_domain(domain: &str) -> bool {
    let name = domain.strip_prefix("*.").unwrap_or(domain);
    if name.is_empty() || name.len() > 253 {
        return false;
    }

    name.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}
