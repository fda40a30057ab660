//! Automatic certificate configuration types.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use certkeeper_common::DomainSet;

/// Let's Encrypt production directory
pub const LETS_ENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// Let's Encrypt staging directory
pub const LETS_ENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Hosting transport the certificates are served through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostTransport {
    /// rustls server with an SNI resolver; certificates can be swapped at runtime
    #[default]
    Rustls,
    /// Certificate binding is managed outside the process (e.g. by a front
    /// proxy or the OS); automatic issuance is pointless
    Static,
}

impl HostTransport {
    /// Whether certificates can be bound dynamically per connection.
    pub fn supports_dynamic_certificates(self) -> bool {
        matches!(self, HostTransport::Rustls)
    }
}

/// Which ACME directory to talk to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcmeDirectory {
    LetsEncryptProduction,
    LetsEncryptStaging,
    Custom(String),
}

impl AcmeDirectory {
    pub fn url(&self) -> &str {
        match self {
            AcmeDirectory::LetsEncryptProduction => LETS_ENCRYPT_PRODUCTION,
            AcmeDirectory::LetsEncryptStaging => LETS_ENCRYPT_STAGING,
            AcmeDirectory::Custom(url) => url,
        }
    }
}

/// Certificate served when no domain-specific certificate matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackCertificateConfig {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

/// Renewal polling settings. Only exists when both values are configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenewalSettings {
    /// Time between renewal checks
    pub check_interval: Duration,
    /// Renew this many days before expiry
    pub renew_before_days: u32,
}

/// The `acme` configuration block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcmeConfig {
    /// Account contact email
    #[serde(default)]
    pub email: Option<String>,

    /// Domains covered by the managed certificate
    #[serde(default)]
    pub domains: DomainSet,

    /// Agree to the CA's terms of service when registering an account
    #[serde(default)]
    pub accept_terms_of_service: bool,

    /// Use the Let's Encrypt staging environment
    #[serde(default)]
    pub staging: bool,

    /// Explicit directory URL, overrides `staging`
    #[serde(default)]
    pub directory_url: Option<String>,

    /// Directory for account credentials and issued certificates
    #[serde(default = "default_storage")]
    pub storage: PathBuf,

    /// Days before expiry at which renewal triggers
    #[serde(default)]
    pub renew_before_days: Option<u32>,

    /// Seconds between renewal checks
    #[serde(default)]
    pub check_interval_secs: Option<u64>,

    /// How certificates reach connections
    #[serde(default)]
    pub transport: HostTransport,

    /// Certificate served when nothing matches
    #[serde(default)]
    pub fallback: Option<FallbackCertificateConfig>,
}

pub(crate) fn default_storage() -> PathBuf {
    PathBuf::from("/var/lib/certkeeper")
}

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            email: None,
            domains: DomainSet::default(),
            accept_terms_of_service: false,
            staging: false,
            directory_url: None,
            storage: default_storage(),
            renew_before_days: None,
            check_interval_secs: None,
            transport: HostTransport::default(),
            fallback: None,
        }
    }
}

impl AcmeConfig {
    /// Directory to register with and order from.
    pub fn directory(&self) -> AcmeDirectory {
        match (&self.directory_url, self.staging) {
            (Some(url), _) => AcmeDirectory::Custom(url.clone()),
            (None, true) => AcmeDirectory::LetsEncryptStaging,
            (None, false) => AcmeDirectory::LetsEncryptProduction,
        }
    }

    /// Renewal settings, present only when both the interval and lead time
    /// are configured. `None` means issue-once.
    pub fn renewal(&self) -> Option<RenewalSettings> {
        match (self.check_interval_secs, self.renew_before_days) {
            (Some(secs), Some(days)) => Some(RenewalSettings {
                check_interval: Duration::from_secs(secs),
                renew_before_days: days,
            }),
            _ => None,
        }
    }
}
