//! Per-connection certificate selection.
//!
//! [`CertificateSelector`] is the authoritative index from domain name to
//! the certificate currently served for it. The lifecycle manager is its
//! only writer; TLS handshakes read it through [`SniCertResolver`].
//!
//! # Thread Safety
//!
//! Uses `DashMap` so that each domain entry is replaced atomically without
//! a global lock. Entries are only ever inserted or overwritten, never
//! removed, so a reader never sees a domain disappear. A multi-name
//! certificate is registered one name at a time; a concurrent handshake may
//! briefly see the new certificate for some names and the previous one for
//! others.

use std::borrow::Cow;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use tracing::{debug, trace};

use crate::certificate::Certificate;

/// What is known about a connection when a certificate is chosen
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub remote_addr: Option<SocketAddr>,
    pub local_addr: Option<SocketAddr>,
}

impl ConnectionInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn with_local_addr(mut self, addr: SocketAddr) -> Self {
        self.local_addr = Some(addr);
        self
    }
}

/// Domain name → active certificate index with an optional fallback
pub struct CertificateSelector {
    /// Lower-cased domain name -> certificate
    certs: DashMap<String, Arc<Certificate>>,
    /// Served when no domain-specific certificate exists
    fallback: ArcSwapOption<Certificate>,
}

impl CertificateSelector {
    pub fn new() -> Self {
        Self {
            certs: DashMap::new(),
            fallback: ArcSwapOption::empty(),
        }
    }

    /// Create a selector that serves `fallback` for unknown names
    pub fn with_fallback(fallback: Option<Arc<Certificate>>) -> Self {
        let selector = Self::new();
        selector.set_fallback(fallback);
        selector
    }

    /// Register `certificate` under every name it covers, replacing whatever
    /// was active for those names.
    ///
    /// Returns the number of names registered; a certificate without any
    /// extractable name registers nothing.
    pub fn add(&self, certificate: Arc<Certificate>) -> usize {
        let names = certificate.domain_names();

        if names.is_empty() {
            debug!(
                fingerprint = %certificate.fingerprint(),
                "Certificate covers no domain names, not registering"
            );
            return 0;
        }

        for name in &names {
            self.certs.insert(name.to_string(), Arc::clone(&certificate));
        }

        debug!(
            domains = ?names,
            fingerprint = %certificate.fingerprint(),
            expires = %certificate.not_after(),
            "Registered certificate"
        );

        names.len()
    }

    /// Whether a certificate is registered for `domain` (case-insensitive)
    pub fn has_cert_for_domain(&self, domain: &str) -> bool {
        self.certs.contains_key(&*lowercase(domain))
    }

    /// Active certificate for `domain`, if any
    pub fn try_get(&self, domain: &str) -> Option<Arc<Certificate>> {
        self.certs
            .get(&*lowercase(domain))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Certificate to present on a connection.
    ///
    /// Returns the certificate registered for `domain`, otherwise the
    /// fallback. `None` means the connection should be rejected. Never
    /// triggers issuance.
    pub fn select(&self, conn: &ConnectionInfo, domain: Option<&str>) -> Option<Arc<Certificate>> {
        if let Some(domain) = domain {
            if let Some(cert) = self.try_get(domain) {
                trace!(domain = %domain, remote_addr = ?conn.remote_addr, "SNI match found");
                return Some(cert);
            }
        }

        let fallback = self.fallback.load_full();
        trace!(
            domain = ?domain,
            remote_addr = ?conn.remote_addr,
            has_fallback = fallback.is_some(),
            "No SNI match, using fallback certificate"
        );
        fallback
    }

    pub fn set_fallback(&self, fallback: Option<Arc<Certificate>>) {
        if let Some(ref cert) = fallback {
            debug!(fingerprint = %cert.fingerprint(), "Installed fallback certificate");
        }
        self.fallback.store(fallback);
    }

    pub fn fallback(&self) -> Option<Arc<Certificate>> {
        self.fallback.load_full()
    }

    /// Number of registered domain names
    pub fn len(&self) -> usize {
        self.certs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    /// Registered domain names, sorted
    pub fn domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = self.certs.iter().map(|e| e.key().clone()).collect();
        domains.sort();
        domains
    }
}

impl Default for CertificateSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CertificateSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateSelector")
            .field("domains", &self.certs.len())
            .field("has_fallback", &self.fallback.load().is_some())
            .finish()
    }
}

/// Avoid allocating on the handshake path when the name is already lower-case
fn lowercase(domain: &str) -> Cow<'_, str> {
    if domain.bytes().any(|b| b.is_ascii_uppercase()) {
        Cow::Owned(domain.to_ascii_lowercase())
    } else {
        Cow::Borrowed(domain)
    }
}

/// rustls certificate resolver backed by a [`CertificateSelector`]
#[derive(Debug, Clone)]
pub struct SniCertResolver {
    selector: Arc<CertificateSelector>,
}

impl SniCertResolver {
    pub fn new(selector: Arc<CertificateSelector>) -> Self {
        Self { selector }
    }

    /// Resolve for a server name; the logic behind the rustls trait impl.
    pub fn resolve_server_name(&self, server_name: Option<&str>) -> Option<Arc<CertifiedKey>> {
        let cert = self.selector.select(&ConnectionInfo::default(), server_name);
        if cert.is_none() {
            debug!(server_name = ?server_name, "No certificate available, rejecting handshake");
        }
        cert.map(|c| c.certified_key())
    }

    /// Server config that picks certificates through this resolver
    pub fn server_config(self) -> Result<ServerConfig, rustls::Error> {
        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        let config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_cert_resolver(Arc::new(self));
        Ok(config)
    }
}

impl ResolvesServerCert for SniCertResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        self.resolve_server_name(client_hello.server_name())
    }
}
