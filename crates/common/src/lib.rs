//! Shared building blocks for certkeeper crates.
//!
//! - [`clock`] - time source used for certificate expiry comparisons
//! - [`domains`] - the normalized set of domain names a certificate must cover
//! - [`observability`] - tracing subscriber installation for binaries

pub mod clock;
pub mod domains;
#[cfg(feature = "runtime")]
pub mod observability;

pub use clock::{Clock, ManualClock, SystemClock};
pub use domains::{DomainSet, LOCALHOST};
