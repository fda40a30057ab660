//! ACME automatic certificate management
//!
//! Certificates from Let's Encrypt and compatible CAs.
//!
//! - [`AcmeAuthority`] - issues certificates over `instant-acme`
//! - [`CertificateStorage`] - filesystem repository for certificates and account credentials
//! - [`ChallengeManager`] - pending HTTP-01 challenges for the responder
//!
//! # Challenge Flow
//!
//! 1. [`AcmeAuthority`] creates one order covering every configured domain
//! 2. For each domain the ACME server provides a challenge token
//! 3. [`ChallengeManager`] registers the token and key authorization
//! 4. The ACME server validates by requesting `/.well-known/acme-challenge/<token>`
//! 5. Once validated, the order is finalized and the chain downloaded
//! 6. The lifecycle manager activates the certificate and hands it to [`CertificateStorage`]

mod challenge;
mod client;
mod storage;

pub use challenge::{ChallengeGuard, ChallengeManager, ACME_CHALLENGE_PREFIX};
pub use client::{AcmeAccountSettings, AcmeAuthority};
pub use storage::{CertificateMeta, CertificateStorage};
