//! Helpers shared by integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use certkeeper::{
    AccountInfo, Certificate, CertificateAuthority, CertificateRepository, LifecycleError,
    StorageError,
};
use certkeeper_common::DomainSet;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use tokio_util::sync::CancellationToken;

/// Self-signed certificate for `names`, valid between the given dates.
pub fn certificate(names: &[&str], not_before: (i32, u8, u8), not_after: (i32, u8, u8)) -> Certificate {
    let key_pair = KeyPair::generate().unwrap();
    let mut params =
        CertificateParams::new(names.iter().map(|n| n.to_string()).collect::<Vec<_>>()).unwrap();
    params.distinguished_name = DistinguishedName::new();
    if let Some(first) = names.first() {
        params
            .distinguished_name
            .push(DnType::CommonName, first.to_string());
    }
    params.not_before = rcgen::date_time_ymd(not_before.0, not_before.1, not_before.2);
    params.not_after = rcgen::date_time_ymd(not_after.0, not_after.1, not_after.2);
    let cert = params.self_signed(&key_pair).unwrap();
    Certificate::from_pem(cert.pem(), key_pair.serialize_pem()).unwrap()
}

/// Signs locally instead of talking to an ACME server
#[derive(Debug, Default)]
pub struct LocalAuthority {
    pub issued: AtomicUsize,
}

impl LocalAuthority {
    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CertificateAuthority for LocalAuthority {
    async fn get_or_create_account(
        &self,
        _cancel: &CancellationToken,
    ) -> Result<AccountInfo, LifecycleError> {
        Ok(AccountInfo {
            id: "local".to_string(),
            contact: None,
        })
    }

    async fn create_certificate(
        &self,
        domains: &DomainSet,
        _cancel: &CancellationToken,
    ) -> Result<Certificate, LifecycleError> {
        self.issued.fetch_add(1, Ordering::SeqCst);
        let names: Vec<&str> = domains.iter().collect();
        Ok(certificate(&names, (2025, 1, 1), (2025, 4, 1)))
    }
}

/// Repository whose save panics
#[derive(Debug)]
pub struct PanickingRepository;

#[async_trait]
impl CertificateRepository for PanickingRepository {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn save(
        &self,
        _certificate: &Certificate,
        _cancel: &CancellationToken,
    ) -> Result<(), StorageError> {
        panic!("backend exploded");
    }
}
