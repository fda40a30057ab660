//! Configuration validation beyond structural checks.
//!
//! - [`lint`] flags settings that work but are probably not what the
//!   operator wants
//! - [`certs`] checks the fallback certificate on disk
//! - [`storage`] checks that the storage directory is usable

#[cfg(feature = "validation")]
pub mod certs;
pub mod lint;
pub mod storage;

use std::fmt;

use crate::Config;

#[cfg(feature = "validation")]
pub use certs::validate_certificates;
pub use lint::lint_config;
pub use storage::validate_storage;

/// What area a validation error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Certificate,
    Storage,
    Domain,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Certificate => f.write_str("certificate"),
            ErrorCategory::Storage => f.write_str("storage"),
            ErrorCategory::Domain => f.write_str("domain"),
        }
    }
}

/// A problem that prevents the configuration from working
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub category: ErrorCategory,
    pub message: String,
}

impl ValidationError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

/// Something worth a look, not fatal
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub message: String,
}

impl ValidationWarning {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Collected errors and warnings
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Run every available check.
pub fn validate_all(config: &Config) -> ValidationResult {
    let mut result = lint_config(config);
    result.merge(validate_storage(config));
    #[cfg(feature = "validation")]
    result.merge(validate_certificates(config));
    result
}
