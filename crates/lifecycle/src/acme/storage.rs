//! Certificate and account storage for ACME
//!
//! Filesystem repository for issued certificates plus the account
//! credentials the ACME client reuses across restarts.
//!
//! # Directory Structure
//!
//! ```text
//! storage/
//! ├── credentials.json      # ACME account credentials (opaque, serialized)
//! └── domains/
//!     └── example.com/
//!         ├── cert.pem      # Certificate chain
//!         ├── key.pem       # Private key
//!         └── meta.json     # Expiry, issue time, domains, fingerprint
//! ```

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::certificate::Certificate;
use crate::error::StorageError;
use crate::repository::CertificateRepository;

/// Certificate metadata stored alongside the certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateMeta {
    pub expires: DateTime<Utc>,
    pub issued: DateTime<Utc>,
    /// Domains covered by this certificate
    pub domains: Vec<String>,
    /// SHA-256 of the leaf certificate
    pub fingerprint: String,
}

impl CertificateMeta {
    fn for_certificate(certificate: &Certificate) -> Self {
        Self {
            expires: certificate.not_after(),
            issued: certificate.not_before(),
            domains: certificate
                .domain_names()
                .into_iter()
                .map(str::to_string)
                .collect(),
            fingerprint: certificate.fingerprint().to_string(),
        }
    }
}

/// Filesystem certificate repository
///
/// Cheap to clone; clones write to the same directory.
#[derive(Debug, Clone)]
pub struct CertificateStorage {
    base_path: PathBuf,
}

impl CertificateStorage {
    /// Open storage at `base_path`, creating it with restrictive
    /// permissions (0700 on Unix) when missing.
    pub fn new(base_path: &Path) -> Result<Self, StorageError> {
        let domains_path = base_path.join("domains");
        fs::create_dir_all(&domains_path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o700);
            fs::set_permissions(base_path, perms.clone())?;
            fs::set_permissions(&domains_path, perms)?;
        }

        info!(
            storage_path = %base_path.display(),
            "Initialized certificate storage"
        );

        Ok(Self {
            base_path: base_path.to_path_buf(),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    // =========================================================================
    // Account Operations
    // =========================================================================

    /// Load raw account credentials JSON
    pub fn load_credentials_json(&self) -> Result<Option<String>, StorageError> {
        let creds_path = self.base_path.join("credentials.json");

        if !creds_path.exists() {
            trace!("No stored ACME credentials found");
            return Ok(None);
        }

        let content = fs::read_to_string(&creds_path)?;
        debug!("Loaded ACME credentials JSON");
        Ok(Some(content))
    }

    /// Save raw account credentials JSON
    pub fn save_credentials_json(&self, json: &str) -> Result<(), StorageError> {
        let creds_path = self.base_path.join("credentials.json");
        write_private(&creds_path, json)?;

        info!("Saved ACME credentials JSON");
        Ok(())
    }

    // =========================================================================
    // Certificate Operations
    // =========================================================================

    fn domain_path(&self, domain: &str) -> PathBuf {
        self.base_path.join("domains").join(domain)
    }

    /// Load and parse the certificate stored under `domain`
    pub fn load_certificate(&self, domain: &str) -> Result<Option<Certificate>, StorageError> {
        let domain_path = self.domain_path(domain);
        let cert_path = domain_path.join("cert.pem");

        if !cert_path.exists() {
            trace!(domain = %domain, "No stored certificate found");
            return Ok(None);
        }

        let cert_pem = fs::read_to_string(&cert_path)?;
        let key_pem = fs::read_to_string(domain_path.join("key.pem"))?;
        let certificate = Certificate::from_pem(cert_pem, key_pem)?;

        debug!(
            domain = %domain,
            expires = %certificate.not_after(),
            "Loaded stored certificate"
        );

        Ok(Some(certificate))
    }

    /// Metadata written with the certificate stored under `domain`
    pub fn load_meta(&self, domain: &str) -> Result<Option<CertificateMeta>, StorageError> {
        let meta_path = self.domain_path(domain).join("meta.json");
        if !meta_path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&meta_path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Write a certificate under its primary domain, replacing any previous one
    pub fn save_certificate(&self, certificate: &Certificate) -> Result<(), StorageError> {
        let domain = certificate.primary_domain().ok_or(StorageError::NoDomain)?;
        let domain_path = self.domain_path(domain);
        fs::create_dir_all(&domain_path)?;

        fs::write(domain_path.join("cert.pem"), certificate.cert_pem())?;
        write_private(&domain_path.join("key.pem"), certificate.key_pem())?;

        let meta = CertificateMeta::for_certificate(certificate);
        fs::write(
            domain_path.join("meta.json"),
            serde_json::to_string_pretty(&meta)?,
        )?;

        info!(
            domain = %domain,
            expires = %meta.expires,
            fingerprint = %meta.fingerprint,
            "Saved certificate to storage"
        );

        Ok(())
    }

    /// List all stored domains, sorted
    pub fn list_domains(&self) -> Result<Vec<String>, StorageError> {
        let domains_path = self.base_path.join("domains");

        if !domains_path.exists() {
            return Ok(Vec::new());
        }

        let mut domains = Vec::new();
        for entry in fs::read_dir(&domains_path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    domains.push(name.to_string());
                }
            }
        }
        domains.sort();

        Ok(domains)
    }

    /// Delete the stored certificate for a domain
    pub fn delete_certificate(&self, domain: &str) -> Result<(), StorageError> {
        let domain_path = self.domain_path(domain);

        if domain_path.exists() {
            fs::remove_dir_all(&domain_path)?;
            info!(domain = %domain, "Deleted stored certificate");
        } else {
            warn!(domain = %domain, "Certificate to delete not found");
        }

        Ok(())
    }

    fn load_all(&self) -> Result<Vec<Certificate>, StorageError> {
        let mut certificates = Vec::new();
        for domain in self.list_domains()? {
            match self.load_certificate(&domain) {
                Ok(Some(certificate)) => certificates.push(certificate),
                Ok(None) => {}
                Err(e) => {
                    warn!(domain = %domain, error = %e, "Skipping unreadable stored certificate");
                }
            }
        }
        Ok(certificates)
    }
}

#[async_trait]
impl CertificateRepository for CertificateStorage {
    fn name(&self) -> &str {
        "filesystem"
    }

    async fn save(
        &self,
        certificate: &Certificate,
        cancel: &CancellationToken,
    ) -> Result<(), StorageError> {
        if cancel.is_cancelled() {
            return Err(StorageError::Backend("save cancelled".to_string()));
        }

        let storage = self.clone();
        let certificate = certificate.clone();
        tokio::task::spawn_blocking(move || storage.save_certificate(&certificate))
            .await
            .map_err(|e| StorageError::Backend(format!("storage task failed: {}", e)))?
    }

    async fn load(&self, _cancel: &CancellationToken) -> Result<Vec<Certificate>, StorageError> {
        let storage = self.clone();
        tokio::task::spawn_blocking(move || storage.load_all())
            .await
            .map_err(|e| StorageError::Backend(format!("storage task failed: {}", e)))?
    }
}

/// Write a file readable only by the owner (0600 on Unix)
///
/// New files are created with that mode; existing ones are tightened before
/// they are truncated.
fn write_private(path: &Path, contents: &str) -> Result<(), StorageError> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
        options.mode(0o600);
        if path.exists() {
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        }
    }

    let mut file = options.truncate(true).open(path)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()?;
    Ok(())
}
