//! Issued certificates.
//!
//! A [`Certificate`] bundles the PEM chain and private key with the values
//! the lifecycle manager needs (covered names, validity window, fingerprint)
//! and a ready-to-serve [`CertifiedKey`] for rustls. It is immutable; a
//! renewal produces a new instance that supersedes the old one.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;
use sha2::{Digest, Sha256};
use x509_parser::extensions::GeneralName;
use x509_parser::time::ASN1Time;

use crate::error::CertificateError;

#[derive(Clone)]
pub struct Certificate {
    subject: Option<String>,
    alt_names: Vec<String>,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    fingerprint: String,
    cert_pem: String,
    key_pem: String,
    certified_key: Arc<CertifiedKey>,
}

impl Certificate {
    /// Parse a PEM certificate chain (leaf first) and its PEM private key.
    pub fn from_pem(
        cert_pem: impl Into<String>,
        key_pem: impl Into<String>,
    ) -> Result<Self, CertificateError> {
        let cert_pem = cert_pem.into();
        let key_pem = key_pem.into();

        let chain: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_pem.as_bytes())
            .collect::<Result<_, _>>()
            .map_err(|e| CertificateError::Pem(e.to_string()))?;
        let leaf = chain.first().ok_or(CertificateError::MissingCertificate)?;

        let (_, x509) = x509_parser::parse_x509_certificate(leaf.as_ref())
            .map_err(|e| CertificateError::X509(e.to_string()))?;

        let subject = x509
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .filter(|cn| is_host_name(cn))
            .map(str::to_ascii_lowercase);

        let alt_names = match x509.subject_alternative_name() {
            Ok(Some(san)) => san
                .value
                .general_names
                .iter()
                .filter_map(|name| match name {
                    GeneralName::DNSName(dns) => Some(dns.to_ascii_lowercase()),
                    _ => None,
                })
                .collect(),
            Ok(None) => Vec::new(),
            Err(e) => return Err(CertificateError::X509(e.to_string())),
        };

        let not_before = to_utc(x509.validity().not_before)?;
        let not_after = to_utc(x509.validity().not_after)?;
        let fingerprint = hex::encode_upper(Sha256::digest(leaf.as_ref()));

        let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut key_pem.as_bytes())
            .map_err(|e| CertificateError::Pem(e.to_string()))?
            .ok_or(CertificateError::MissingKey)?;
        let signing_key = rustls::crypto::aws_lc_rs::sign::any_supported_type(&key)
            .map_err(|e| CertificateError::UnsupportedKey(e.to_string()))?;

        Ok(Self {
            subject,
            alt_names,
            not_before,
            not_after,
            fingerprint,
            cert_pem,
            key_pem,
            certified_key: Arc::new(CertifiedKey::new(chain, signing_key)),
        })
    }

    /// Every name this certificate can be selected for: the subject common
    /// name (when it is a host name) followed by the DNS alternative names,
    /// lower-cased and without duplicates.
    pub fn domain_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::with_capacity(self.alt_names.len() + 1);
        for name in self.subject.iter().chain(self.alt_names.iter()) {
            if !names.contains(&name.as_str()) {
                names.push(name);
            }
        }
        names
    }

    /// First covered name; used to key storage.
    pub fn primary_domain(&self) -> Option<&str> {
        self.subject
            .as_deref()
            .or_else(|| self.alt_names.first().map(String::as_str))
    }

    pub fn covers(&self, domain: &str) -> bool {
        self.domain_names()
            .iter()
            .any(|name| name.eq_ignore_ascii_case(domain))
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn alt_names(&self) -> &[String] {
        &self.alt_names
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// Upper-case hex SHA-256 of the leaf certificate DER.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.not_after <= now
    }

    /// Whether `now` is within `lead_time` of expiry (or past it).
    ///
    /// A lead time reaching before the representable range is always due.
    pub fn renewal_due_at(&self, now: DateTime<Utc>, lead_time: Duration) -> bool {
        self.not_after
            .checked_sub_signed(lead_time)
            .map_or(true, |due| due <= now)
    }

    /// PEM certificate chain, leaf first
    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    /// PEM private key
    pub fn key_pem(&self) -> &str {
        &self.key_pem
    }

    pub fn certified_key(&self) -> Arc<CertifiedKey> {
        Arc::clone(&self.certified_key)
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.subject)
            .field("alt_names", &self.alt_names)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

fn to_utc(time: ASN1Time) -> Result<DateTime<Utc>, CertificateError> {
    DateTime::from_timestamp(time.timestamp(), 0)
        .ok_or_else(|| CertificateError::X509(format!("validity time out of range: {}", time)))
}

fn is_host_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '*'))
}
