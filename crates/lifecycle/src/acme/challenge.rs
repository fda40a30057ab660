//! HTTP-01 ACME challenge management
//!
//! Holds pending HTTP-01 challenges so whatever serves
//! `/.well-known/acme-challenge/<token>` can answer the authority.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// HTTP-01 challenge path prefix
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

#[derive(Debug, Clone)]
struct PendingChallenge {
    domain: String,
    key_authorization: String,
}

/// Pending ACME HTTP-01 challenges, keyed by token
///
/// Cloning shares the underlying map, so the authority client and the
/// challenge responder see the same set.
#[derive(Debug, Clone, Default)]
pub struct ChallengeManager {
    challenges: Arc<DashMap<String, PendingChallenge>>,
}

impl ChallengeManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending challenge for `domain`.
    ///
    /// The returned guard removes the token again when dropped, so an
    /// aborted or cancelled order does not leave stale responses behind.
    pub fn add_challenge(
        &self,
        domain: &str,
        token: &str,
        key_authorization: &str,
    ) -> ChallengeGuard {
        debug!(domain = %domain, token = %token, "Registering ACME HTTP-01 challenge");
        self.challenges.insert(
            token.to_string(),
            PendingChallenge {
                domain: domain.to_string(),
                key_authorization: key_authorization.to_string(),
            },
        );
        ChallengeGuard {
            manager: self.clone(),
            token: token.to_string(),
        }
    }

    pub fn remove_challenge(&self, token: &str) {
        if let Some((_, pending)) = self.challenges.remove(token) {
            debug!(domain = %pending.domain, token = %token, "Removed ACME challenge");
        }
    }

    /// Key authorization to serve for `token`, if registered.
    pub fn get_response(&self, token: &str) -> Option<String> {
        let result = self
            .challenges
            .get(token)
            .map(|pending| pending.key_authorization.clone());
        trace!(token = %token, found = result.is_some(), "ACME challenge lookup");
        result
    }

    /// Answer a request path: `Some(key_authorization)` when the path is a
    /// challenge URL for a registered token.
    pub fn respond(&self, path: &str) -> Option<String> {
        Self::extract_token(path).and_then(|token| self.get_response(token))
    }

    /// Token part of a challenge request path.
    pub fn extract_token(path: &str) -> Option<&str> {
        path.strip_prefix(ACME_CHALLENGE_PREFIX)
    }

    pub fn pending_count(&self) -> usize {
        self.challenges.len()
    }

    /// Domains with at least one outstanding challenge, sorted.
    pub fn pending_domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = self
            .challenges
            .iter()
            .map(|entry| entry.value().domain.clone())
            .collect();
        domains.sort();
        domains.dedup();
        domains
    }

    pub fn clear(&self) {
        let count = self.challenges.len();
        self.challenges.clear();
        if count > 0 {
            debug!(cleared = count, "Cleared all pending ACME challenges");
        }
    }
}

/// Removes its challenge token from the manager on drop
#[must_use = "dropping the guard removes the challenge immediately"]
#[derive(Debug)]
pub struct ChallengeGuard {
    manager: ChallengeManager,
    token: String,
}

impl ChallengeGuard {
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl Drop for ChallengeGuard {
    fn drop(&mut self) {
        self.manager.remove_challenge(&self.token);
    }
}
