//! Composition root
//!
//! Wires the clock, selector, challenge coordinator, storage, ACME client
//! and lifecycle manager from a loaded [`Config`].

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use certkeeper_common::{Clock, SystemClock};
use certkeeper_config::{Config, FallbackCertificateConfig};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::acme::{AcmeAccountSettings, AcmeAuthority, CertificateStorage, ChallengeManager};
use crate::certificate::Certificate;
use crate::manager::{LifecycleManager, RenewalPolicy};
use crate::repository::CertificateRepository;
use crate::selector::{CertificateSelector, SniCertResolver};

/// A fully wired certificate keeper
#[derive(Debug)]
pub struct CertKeeper {
    selector: Arc<CertificateSelector>,
    challenges: ChallengeManager,
    storage: CertificateStorage,
    manager: Arc<LifecycleManager>,
}

impl CertKeeper {
    /// Build every component from configuration.
    ///
    /// Fails when the configuration is structurally invalid, the storage
    /// directory cannot be created or the fallback certificate cannot be
    /// loaded.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &Config, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate().context("Invalid configuration")?;
        let acme = &config.acme;

        let fallback = acme
            .fallback
            .as_ref()
            .map(load_fallback)
            .transpose()?
            .map(Arc::new);
        let selector = Arc::new(CertificateSelector::with_fallback(fallback));

        let storage = CertificateStorage::new(&acme.storage).with_context(|| {
            format!(
                "Failed to initialize certificate storage at {}",
                acme.storage.display()
            )
        })?;

        let challenges = ChallengeManager::new();
        let directory = acme.directory();
        let authority = Arc::new(AcmeAuthority::new(
            AcmeAccountSettings {
                directory_url: directory.url().to_string(),
                email: acme.email.clone(),
                accept_terms_of_service: acme.accept_terms_of_service,
            },
            storage.clone(),
            challenges.clone(),
        ));

        let manager = LifecycleManager::new(acme.domains.clone(), authority, Arc::clone(&selector))
            .with_transport(acme.transport)
            .with_renewal(acme.renewal().map(RenewalPolicy::from))
            .with_repository(Arc::new(storage.clone()) as Arc<dyn CertificateRepository>)
            .with_clock(clock);

        info!(
            directory = %directory.url(),
            storage = %acme.storage.display(),
            domains = %acme.domains,
            "Certificate keeper configured"
        );

        Ok(Self {
            selector,
            challenges,
            storage,
            manager: Arc::new(manager),
        })
    }

    /// Start the lifecycle manager in the background.
    pub fn spawn(&self, cancel: CancellationToken) -> JoinHandle<()> {
        Arc::clone(&self.manager).spawn(cancel)
    }

    pub fn selector(&self) -> &Arc<CertificateSelector> {
        &self.selector
    }

    /// rustls resolver serving the selector's certificates by SNI
    pub fn resolver(&self) -> SniCertResolver {
        SniCertResolver::new(Arc::clone(&self.selector))
    }

    /// HTTP-01 challenges to answer on port 80
    pub fn challenges(&self) -> &ChallengeManager {
        &self.challenges
    }

    pub fn storage(&self) -> &CertificateStorage {
        &self.storage
    }

    pub fn manager(&self) -> &Arc<LifecycleManager> {
        &self.manager
    }
}

fn load_fallback(fallback: &FallbackCertificateConfig) -> Result<Certificate> {
    let cert_pem = read(&fallback.cert_file)?;
    let key_pem = read(&fallback.key_file)?;
    let certificate = Certificate::from_pem(cert_pem, key_pem).with_context(|| {
        format!(
            "Invalid fallback certificate {}",
            fallback.cert_file.display()
        )
    })?;

    info!(
        cert_file = %fallback.cert_file.display(),
        subject = ?certificate.subject(),
        expires = %certificate.not_after(),
        "Loaded fallback certificate"
    );
    Ok(certificate)
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::ManagerState;
    use crate::selector::ConnectionInfo;
    use crate::test_support::generate_pem;
    use tempfile::TempDir;

    #[test]
    fn test_from_config_loads_fallback() {
        let temp_dir = TempDir::new().unwrap();
        let (cert_pem, key_pem) = generate_pem(&["fallback.local"], (2025, 1, 1), (2035, 1, 1));
        std::fs::write(temp_dir.path().join("fallback.crt"), cert_pem).unwrap();
        std::fs::write(temp_dir.path().join("fallback.key"), key_pem).unwrap();

        let config = Config::from_kdl_str(&format!(
            r#"
            acme {{
                domains "example.com"
                storage "{dir}/store"
                fallback-cert {{
                    cert-file "{dir}/fallback.crt"
                    key-file "{dir}/fallback.key"
                }}
            }}
            "#,
            dir = temp_dir.path().display()
        ))
        .unwrap();

        let keeper = CertKeeper::from_config(&config).unwrap();

        assert!(keeper.storage().base_path().join("domains").exists());
        let selected = keeper
            .selector()
            .select(&ConnectionInfo::default(), Some("unknown.example.com"))
            .unwrap();
        assert_eq!(selected.subject(), Some("fallback.local"));
        assert_eq!(keeper.manager().state(), ManagerState::Init);
    }

    #[test]
    fn test_missing_fallback_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::from_kdl_str(&format!(
            r#"
            acme {{
                storage "{dir}/store"
                fallback-cert {{
                    cert-file "{dir}/missing.crt"
                    key-file "{dir}/missing.key"
                }}
            }}
            "#,
            dir = temp_dir.path().display()
        ))
        .unwrap();

        let err = CertKeeper::from_config(&config).unwrap_err();
        assert!(format!("{:#}", err).contains("missing.crt"));
    }

    #[test]
    fn test_out_of_range_lead_time_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::from_kdl_str(&format!(
            r#"acme {{
                domains "example.com"
                storage "{}"
                renew-before-days 200000000
                check-interval-secs 3600
            }}"#,
            temp_dir.path().display()
        ))
        .unwrap();

        let err = CertKeeper::from_config(&config).unwrap_err();
        assert!(format!("{:#}", err).contains("renew-before-days"));
    }

    #[tokio::test]
    async fn test_unconfigured_keeper_stops() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::from_kdl_str(&format!(
            r#"acme {{
                domains "localhost"
                storage "{}"
            }}"#,
            temp_dir.path().display()
        ))
        .unwrap();

        let keeper = CertKeeper::from_config(&config).unwrap();
        keeper.spawn(CancellationToken::new()).await.unwrap();

        assert_eq!(keeper.manager().state(), ManagerState::Stopped);
        assert!(keeper.selector().is_empty());
    }
}
