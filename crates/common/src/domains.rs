//! The set of domain names covered by a managed certificate.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Loopback placeholder that never gets a publicly issued certificate.
pub const LOCALHOST: &str = "localhost";

/// Ordered, case-insensitively deduplicated list of domain names.
///
/// Names are stored lower-cased. The first name is the primary domain and
/// is used to key on-disk storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct DomainSet {
    names: Vec<String>,
}

impl DomainSet {
    /// Build a domain set, trimming, lower-casing and dropping duplicates
    /// while keeping first-seen order.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out: Vec<String> = Vec::new();
        for name in names {
            let name = name.as_ref().trim().to_ascii_lowercase();
            if name.is_empty() || out.contains(&name) {
                continue;
            }
            out.push(name);
        }
        Self { names: out }
    }

    /// Whether automatic issuance should run for this set.
    ///
    /// An empty set, or one holding only `localhost`, counts as not configured.
    pub fn is_configured(&self) -> bool {
        self.names.iter().any(|name| name != LOCALHOST)
    }

    /// First configured domain.
    pub fn primary(&self) -> Option<&str> {
        self.names.first().map(String::as_str)
    }

    /// Case-insensitive membership test.
    pub fn contains(&self, domain: &str) -> bool {
        self.names.iter().any(|name| name.eq_ignore_ascii_case(domain))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.names
    }
}

impl From<Vec<String>> for DomainSet {
    fn from(names: Vec<String>) -> Self {
        Self::new(names)
    }
}

impl From<DomainSet> for Vec<String> {
    fn from(set: DomainSet) -> Self {
        set.names
    }
}

impl<'a> IntoIterator for &'a DomainSet {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.names.iter()
    }
}

impl fmt::Display for DomainSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.names.join(", "))
    }
}
