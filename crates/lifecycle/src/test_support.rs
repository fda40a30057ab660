//! Fixtures shared by unit tests: generated certificates and in-memory
//! collaborators.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use certkeeper_common::DomainSet;
use parking_lot::Mutex;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use tokio_util::sync::CancellationToken;

use crate::authority::{AccountInfo, CertificateAuthority};
use crate::certificate::Certificate;
use crate::error::{LifecycleError, StorageError};
use crate::repository::CertificateRepository;
use crate::selector::CertificateSelector;

pub(crate) type Ymd = (i32, u8, u8);

/// Self-signed PEM pair whose CN is the first name and whose SANs are all names.
pub(crate) fn generate_pem(names: &[&str], not_before: Ymd, not_after: Ymd) -> (String, String) {
    let key_pair = KeyPair::generate().unwrap();
    let sans: Vec<String> = names.iter().map(|n| n.to_string()).collect();
    let mut params = CertificateParams::new(sans).unwrap();
    params.distinguished_name = DistinguishedName::new();
    if let Some(first) = names.first() {
        params
            .distinguished_name
            .push(DnType::CommonName, first.to_string());
    }
    params.not_before = rcgen::date_time_ymd(not_before.0, not_before.1, not_before.2);
    params.not_after = rcgen::date_time_ymd(not_after.0, not_after.1, not_after.2);
    let cert = params.self_signed(&key_pair).unwrap();
    (cert.pem(), key_pair.serialize_pem())
}

pub(crate) fn cert_with_validity(names: &[&str], not_before: Ymd, not_after: Ymd) -> Certificate {
    let (cert_pem, key_pem) = generate_pem(names, not_before, not_after);
    Certificate::from_pem(cert_pem, key_pem).unwrap()
}

/// Certificate valid 2025-01-01 through 2025-04-01.
pub(crate) fn generate_cert(names: &[&str]) -> Certificate {
    cert_with_validity(names, (2025, 1, 1), (2025, 4, 1))
}

/// Authority that signs certificates locally and counts calls.
#[derive(Debug)]
pub(crate) struct FakeAuthority {
    pub account_calls: AtomicUsize,
    pub certificate_calls: AtomicUsize,
    pub requested: Mutex<Vec<DomainSet>>,
    pub failure: Mutex<Option<fn() -> LifecycleError>>,
    pub validity: Mutex<(Ymd, Ymd)>,
    /// Time spent talking to the "authority" before answering
    pub delay: Mutex<Option<std::time::Duration>>,
}

impl FakeAuthority {
    pub fn new() -> Self {
        Self {
            account_calls: AtomicUsize::new(0),
            certificate_calls: AtomicUsize::new(0),
            requested: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            validity: Mutex::new(((2025, 1, 1), (2025, 4, 1))),
            delay: Mutex::new(None),
        }
    }

    pub fn failing(failure: fn() -> LifecycleError) -> Self {
        let authority = Self::new();
        *authority.failure.lock() = Some(failure);
        authority
    }

    pub fn issuing_until(self, not_after: Ymd) -> Self {
        self.validity.lock().1 = not_after;
        self
    }

    pub fn delaying(self, delay: std::time::Duration) -> Self {
        *self.delay.lock() = Some(delay);
        self
    }

    pub fn certificate_calls(&self) -> usize {
        self.certificate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CertificateAuthority for FakeAuthority {
    async fn get_or_create_account(
        &self,
        _cancel: &CancellationToken,
    ) -> Result<AccountInfo, LifecycleError> {
        self.account_calls.fetch_add(1, Ordering::SeqCst);
        Ok(AccountInfo {
            id: "https://ca.test/acct/1".to_string(),
            contact: None,
        })
    }

    async fn create_certificate(
        &self,
        domains: &DomainSet,
        _cancel: &CancellationToken,
    ) -> Result<Certificate, LifecycleError> {
        self.certificate_calls.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().push(domains.clone());

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(failure) = *self.failure.lock() {
            return Err(failure());
        }

        let (not_before, not_after) = *self.validity.lock();
        let names: Vec<&str> = domains.iter().collect();
        Ok(cert_with_validity(&names, not_before, not_after))
    }
}

/// Repository that records saves and can be told to fail.
#[derive(Debug)]
pub(crate) struct RecordingRepository {
    name: String,
    fail: bool,
    /// Save never completes
    stall: bool,
    /// Selector to inspect at save time
    selector: Option<Arc<CertificateSelector>>,
    pub saved: Mutex<Vec<String>>,
    /// Whether the selector already served the certificate when save ran
    pub selector_updated_at_save: Mutex<Vec<bool>>,
    pub stored: Mutex<Vec<Certificate>>,
}

impl RecordingRepository {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fail: false,
            stall: false,
            selector: None,
            saved: Mutex::new(Vec::new()),
            selector_updated_at_save: Mutex::new(Vec::new()),
            stored: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(name: &str) -> Self {
        Self {
            fail: true,
            ..Self::new(name)
        }
    }

    pub fn stalling(name: &str) -> Self {
        Self {
            stall: true,
            ..Self::new(name)
        }
    }

    pub fn observing(mut self, selector: Arc<CertificateSelector>) -> Self {
        self.selector = Some(selector);
        self
    }

    pub fn with_stored(self, certificate: Certificate) -> Self {
        self.stored.lock().push(certificate);
        self
    }

    pub fn save_count(&self) -> usize {
        self.saved.lock().len()
    }
}

#[async_trait]
impl CertificateRepository for RecordingRepository {
    fn name(&self) -> &str {
        &self.name
    }

    async fn save(
        &self,
        certificate: &Certificate,
        _cancel: &CancellationToken,
    ) -> Result<(), StorageError> {
        if let Some(ref selector) = self.selector {
            let live = certificate.domain_names().iter().all(|domain| {
                selector
                    .try_get(domain)
                    .is_some_and(|active| active.fingerprint() == certificate.fingerprint())
            });
            self.selector_updated_at_save.lock().push(live);
        }

        if self.fail {
            return Err(StorageError::Backend(format!("{} is read-only", self.name)));
        }

        if self.stall {
            std::future::pending::<()>().await;
        }

        self.saved.lock().push(certificate.fingerprint().to_string());
        Ok(())
    }

    async fn load(&self, _cancel: &CancellationToken) -> Result<Vec<Certificate>, StorageError> {
        Ok(self.stored.lock().clone())
    }
}
