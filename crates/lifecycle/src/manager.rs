//! Certificate lifecycle manager
//!
//! Runs as one background task per process. It loads stored certificates,
//! issues a certificate when the configured domains are not covered, and
//! then periodically renews it ahead of expiry.
//!
//! ```text
//! INIT -> CHECK_HOST_SUPPORT -> CHECK_DOMAINS_CONFIGURED -> ISSUE_IF_MISSING
//!      -> RENEWAL_LOOP (renewal policy set) | STOPPED (no policy)
//! ```
//!
//! Every state moves to `STOPPED` on cancellation. Issuance failures are
//! logged and never end the task; the renewal loop retries on its next tick.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use certkeeper_common::{Clock, DomainSet, SystemClock, LOCALHOST};
use certkeeper_config::{HostTransport, RenewalSettings};
use futures::future::join_all;
use futures::FutureExt;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::authority::CertificateAuthority;
use crate::certificate::Certificate;
use crate::error::{LifecycleError, StorageError};
use crate::repository::CertificateRepository;
use crate::selector::CertificateSelector;

/// When to look for expiring certificates and how early to renew them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenewalPolicy {
    /// Time between renewal checks
    pub check_interval: Duration,
    /// Renew once expiry is closer than this
    pub lead_time: chrono::Duration,
}

impl RenewalPolicy {
    pub fn new(check_interval: Duration, lead_time: chrono::Duration) -> Self {
        Self {
            check_interval,
            lead_time,
        }
    }
}

impl From<RenewalSettings> for RenewalPolicy {
    fn from(settings: RenewalSettings) -> Self {
        Self {
            check_interval: settings.check_interval,
            lead_time: chrono::Duration::days(i64::from(settings.renew_before_days)),
        }
    }
}

/// Where the manager's state machine currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Init,
    CheckHostSupport,
    CheckDomainsConfigured,
    IssueIfMissing,
    RenewalLoop,
    Stopped,
}

/// Result of [`LifecycleManager::ensure_issued`]
#[derive(Debug, Clone)]
pub enum IssuanceOutcome {
    /// Every domain already had a valid certificate; the authority was not contacted
    AlreadyIssued,
    /// A new certificate was issued and is being served
    Issued(Arc<Certificate>),
}

/// Keeps a certificate for the configured domains live in the selector and
/// persisted to every repository.
pub struct LifecycleManager {
    /// Issuable domains (loopback removed)
    domains: DomainSet,
    transport: HostTransport,
    renewal: Option<RenewalPolicy>,
    authority: Arc<dyn CertificateAuthority>,
    repositories: Vec<Arc<dyn CertificateRepository>>,
    selector: Arc<CertificateSelector>,
    clock: Arc<dyn Clock>,
    state: RwLock<ManagerState>,
}

impl LifecycleManager {
    /// Create a manager for `domains`.
    ///
    /// `localhost` entries are dropped; a set holding nothing else leaves
    /// the manager unconfigured. Defaults: rustls transport, no repositories,
    /// no renewal policy, system clock.
    pub fn new(
        domains: DomainSet,
        authority: Arc<dyn CertificateAuthority>,
        selector: Arc<CertificateSelector>,
    ) -> Self {
        let issuable = DomainSet::new(domains.iter().filter(|d| *d != LOCALHOST));
        if issuable.len() != domains.len() {
            debug!(
                configured = %domains,
                "Ignoring 'localhost' for certificate issuance"
            );
        }

        Self {
            domains: issuable,
            transport: HostTransport::default(),
            renewal: None,
            authority,
            repositories: Vec::new(),
            selector,
            clock: Arc::new(SystemClock),
            state: RwLock::new(ManagerState::Init),
        }
    }

    pub fn with_transport(mut self, transport: HostTransport) -> Self {
        self.transport = transport;
        self
    }

    /// Enable the renewal loop. `None` means issue once and stop.
    pub fn with_renewal(mut self, renewal: Option<RenewalPolicy>) -> Self {
        self.renewal = renewal;
        self
    }

    pub fn with_repository(mut self, repository: Arc<dyn CertificateRepository>) -> Self {
        self.repositories.push(repository);
        self
    }

    pub fn with_repositories(
        mut self,
        repositories: impl IntoIterator<Item = Arc<dyn CertificateRepository>>,
    ) -> Self {
        self.repositories.extend(repositories);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> ManagerState {
        *self.state.read()
    }

    pub fn selector(&self) -> &Arc<CertificateSelector> {
        &self.selector
    }

    pub fn domains(&self) -> &DomainSet {
        &self.domains
    }

    /// Run the state machine on a background task.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    /// Run the state machine until it stops or `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        self.transition(ManagerState::Init);
        info!(
            domains = %self.domains,
            repositories = self.repositories.len(),
            renewal = self.renewal.is_some(),
            "Starting certificate lifecycle manager"
        );

        self.load_from_repositories(&cancel).await;
        if cancel.is_cancelled() {
            return self.stop();
        }

        self.transition(ManagerState::CheckHostSupport);
        if !self.transport.supports_dynamic_certificates() {
            info!(
                transport = ?self.transport,
                reason = %LifecycleError::HostUnsupported,
                "Automatic certificates disabled"
            );
            return self.stop();
        }

        self.transition(ManagerState::CheckDomainsConfigured);
        if !self.domains.is_configured() {
            info!(
                reason = %LifecycleError::NotConfigured,
                "Automatic certificates disabled"
            );
            return self.stop();
        }

        self.transition(ManagerState::IssueIfMissing);
        match self.ensure_issued(&cancel).await {
            Ok(IssuanceOutcome::AlreadyIssued) => {}
            Ok(IssuanceOutcome::Issued(cert)) => {
                info!(
                    fingerprint = %cert.fingerprint(),
                    expires = %cert.not_after(),
                    "Initial certificate issued"
                );
            }
            Err(LifecycleError::Cancelled) => return self.stop(),
            Err(e) => {
                error!(error = %e, "Initial certificate issuance failed");
            }
        }

        let Some(policy) = self.renewal else {
            info!("No renewal policy configured, certificates will not be renewed");
            return self.stop();
        };

        self.transition(ManagerState::RenewalLoop);
        self.renewal_loop(policy, &cancel).await;
        self.stop()
    }

    /// Issue a certificate for the whole domain set unless every domain
    /// already has an unexpired one.
    ///
    /// Attempted once; retrying is the renewal loop's job. Authority and
    /// repository failures come back as
    /// [`LifecycleError::IssuanceAggregateFailure`].
    pub async fn ensure_issued(
        &self,
        cancel: &CancellationToken,
    ) -> Result<IssuanceOutcome, LifecycleError> {
        if !self.transport.supports_dynamic_certificates() {
            return Err(LifecycleError::HostUnsupported);
        }
        if !self.domains.is_configured() {
            return Err(LifecycleError::NotConfigured);
        }

        let now = self.clock.now();
        let missing = self.domains.iter().find(|domain| {
            !self
                .selector
                .try_get(domain)
                .is_some_and(|cert| !cert.is_expired_at(now))
        });

        match missing {
            None => {
                info!(
                    domains = %self.domains,
                    "Certificate already exists and is valid"
                );
                Ok(IssuanceOutcome::AlreadyIssued)
            }
            Some(domain) => {
                info!(domain = %domain, "Initial certificate issuance required");
                self.issue(cancel).await.map(IssuanceOutcome::Issued)
            }
        }
    }

    /// Check every domain once and reissue if any is due.
    ///
    /// One certificate covers the whole set, so the first due domain
    /// triggers a single reissuance and ends the check. Returns whether a
    /// certificate was issued.
    pub async fn check_renewals(&self, cancel: &CancellationToken) -> Result<bool, LifecycleError> {
        let lead_time = self
            .renewal
            .map(|policy| policy.lead_time)
            .unwrap_or_else(chrono::Duration::zero);
        let now = self.clock.now();

        debug!(domain_count = self.domains.len(), "Checking certificates for renewal");

        for domain in self.domains.iter() {
            match self.selector.try_get(domain) {
                None => {
                    info!(domain = %domain, "No certificate for domain, issuing");
                }
                Some(cert) if cert.renewal_due_at(now, lead_time) => {
                    info!(
                        domain = %domain,
                        expires = %cert.not_after(),
                        "Certificate needs renewal"
                    );
                }
                Some(cert) => {
                    debug!(
                        domain = %domain,
                        expires = %cert.not_after(),
                        "Certificate is still valid"
                    );
                    continue;
                }
            }

            let cert = self.issue(cancel).await?;
            info!(
                domain = %domain,
                expires = %cert.not_after(),
                "Certificate renewed successfully"
            );
            return Ok(true);
        }

        Ok(false)
    }

    async fn renewal_loop(&self, policy: RenewalPolicy, cancel: &CancellationToken) {
        info!(
            check_interval_secs = policy.check_interval.as_secs(),
            lead_time_days = policy.lead_time.num_days(),
            "Starting certificate renewal loop"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Renewal loop cancelled");
                    return;
                }
                _ = tokio::time::sleep(policy.check_interval) => {}
            }

            debug!("Running scheduled certificate renewal check");

            match self.check_renewals(cancel).await {
                Ok(_) => {}
                Err(LifecycleError::Cancelled) => return,
                Err(e) => {
                    // The current certificate stays in service until a later tick succeeds
                    error!(error = %e, "Certificate renewal check failed");
                }
            }
        }
    }

    /// Issue one certificate for the full domain set, make it live, then
    /// persist it everywhere.
    async fn issue(&self, cancel: &CancellationToken) -> Result<Arc<Certificate>, LifecycleError> {
        let start = Instant::now();

        let account = cancellable(cancel, self.authority.get_or_create_account(cancel))
            .await
            .map_err(LifecycleError::into_aggregate)?;
        debug!(account = %account.id, "Using ACME account");

        let certificate = cancellable(cancel, self.authority.create_certificate(&self.domains, cancel))
            .await
            .map_err(LifecycleError::into_aggregate)?;

        // A cancelled issuance must never reach the selector
        if cancel.is_cancelled() {
            return Err(LifecycleError::Cancelled);
        }

        let certificate = Arc::new(certificate);
        let registered = self.selector.add(Arc::clone(&certificate));
        info!(
            domains = %self.domains,
            registered,
            fingerprint = %certificate.fingerprint(),
            expires = %certificate.not_after(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Certificate issued and activated"
        );

        self.save_to_repositories(&certificate, cancel).await?;
        Ok(certificate)
    }

    /// Hand the certificate to every repository concurrently.
    ///
    /// All repositories are attempted; failures are reported together
    /// afterwards and never undo the selector update.
    async fn save_to_repositories(
        &self,
        certificate: &Certificate,
        cancel: &CancellationToken,
    ) -> Result<(), LifecycleError> {
        if self.repositories.is_empty() {
            debug!("No certificate repositories registered");
            return Ok(());
        }

        let saves = self.repositories.iter().map(|repository| async move {
            let result = AssertUnwindSafe(repository.save(certificate, cancel))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Err(StorageError::Backend("repository panicked while saving".to_string()))
                });
            (repository.name().to_string(), result)
        });

        let results = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LifecycleError::Cancelled),
            results = join_all(saves) => results,
        };

        let failures: Vec<LifecycleError> = results
            .into_iter()
            .filter_map(|(repository, result)| match result {
                Ok(()) => {
                    debug!(repository = %repository, "Certificate saved");
                    None
                }
                Err(source) => {
                    warn!(
                        repository = %repository,
                        error = %source,
                        "Failed to save certificate"
                    );
                    Some(LifecycleError::RepositorySaveFailed { repository, source })
                }
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(LifecycleError::IssuanceAggregateFailure(failures))
        }
    }

    /// Pre-populate the selector from repositories that can load.
    async fn load_from_repositories(&self, cancel: &CancellationToken) {
        for repository in &self.repositories {
            let loaded = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                loaded = repository.load(cancel) => loaded,
            };

            match loaded {
                Ok(certificates) => {
                    let count = certificates.len();
                    for certificate in certificates {
                        self.selector.add(Arc::new(certificate));
                    }
                    if count > 0 {
                        info!(
                            repository = %repository.name(),
                            count,
                            "Loaded stored certificates"
                        );
                    }
                }
                Err(e) => {
                    warn!(
                        repository = %repository.name(),
                        error = %e,
                        "Failed to load stored certificates"
                    );
                }
            }
        }
    }

    fn transition(&self, next: ManagerState) {
        let mut state = self.state.write();
        debug!(from = ?*state, to = ?next, "Lifecycle state transition");
        *state = next;
    }

    fn stop(&self) {
        self.transition(ManagerState::Stopped);
        info!("Certificate lifecycle manager stopped");
    }
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("domains", &self.domains)
            .field("transport", &self.transport)
            .field("renewal", &self.renewal)
            .field("repositories", &self.repositories.len())
            .field("state", &self.state())
            .finish()
    }
}

/// Race `fut` against cancellation.
async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, LifecycleError>
where
    F: Future<Output = Result<T, LifecycleError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(LifecycleError::Cancelled),
        result = fut => result,
    }
}
