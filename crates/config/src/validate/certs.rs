//! Certificate validation
//!
//! Validates the fallback certificate: existence, parseability and expiry.

use super::{ErrorCategory, ValidationError, ValidationResult, ValidationWarning};
use crate::Config;
use std::path::Path;
use std::time::{Duration, SystemTime};

/// Validate the configured fallback certificate
pub fn validate_certificates(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    let Some(ref fallback) = config.acme.fallback else {
        return result;
    };

    if !fallback.cert_file.exists() {
        result.add_error(ValidationError::new(
            ErrorCategory::Certificate,
            format!("Fallback certificate not found: {:?}", fallback.cert_file),
        ));
        return result;
    }

    if !fallback.key_file.exists() {
        result.add_error(ValidationError::new(
            ErrorCategory::Certificate,
            format!("Fallback private key not found: {:?}", fallback.key_file),
        ));
        return result;
    }

    match load_and_validate_cert(&fallback.cert_file) {
        Ok(Some(expiry_warning)) => result.add_warning(expiry_warning),
        Ok(None) => {}
        Err(e) => result.add_error(e),
    }

    result
}

/// Load a certificate and check its expiry
fn load_and_validate_cert(cert_path: &Path) -> Result<Option<ValidationWarning>, ValidationError> {
    let cert_pem = std::fs::read(cert_path).map_err(|e| {
        ValidationError::new(
            ErrorCategory::Certificate,
            format!("Failed to read certificate {:?}: {}", cert_path, e),
        )
    })?;

    let pem = pem::parse(&cert_pem).map_err(|e| {
        ValidationError::new(
            ErrorCategory::Certificate,
            format!("Failed to parse certificate {:?}: {}", cert_path, e),
        )
    })?;

    let (_, cert) = x509_parser::parse_x509_certificate(pem.contents()).map_err(|e| {
        ValidationError::new(
            ErrorCategory::Certificate,
            format!("Invalid X509 certificate {:?}: {}", cert_path, e),
        )
    })?;

    let now = SystemTime::now();
    let not_after = cert.validity().not_after.timestamp().max(0) as u64;
    let expiry_time = SystemTime::UNIX_EPOCH + Duration::from_secs(not_after);

    if expiry_time < now {
        return Err(ValidationError::new(
            ErrorCategory::Certificate,
            format!(
                "Fallback certificate expired: {:?} (expired at {})",
                cert_path,
                cert.validity().not_after
            ),
        ));
    }

    let thirty_days = Duration::from_secs(30 * 86400);
    if expiry_time < now + thirty_days {
        return Ok(Some(ValidationWarning::new(format!(
            "Fallback certificate expires soon: {:?} (expires at {})",
            cert_path,
            cert.validity().not_after
        ))));
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FallbackCertificateConfig;
    use rcgen::{CertificateParams, KeyPair};

    fn write_cert(dir: &Path, not_after: Option<(i32, u8, u8)>) -> FallbackCertificateConfig {
        let key_pair = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(vec!["fallback.local".to_string()]).unwrap();
        if let Some((y, m, d)) = not_after {
            params.not_before = rcgen::date_time_ymd(1999, 1, 1);
            params.not_after = rcgen::date_time_ymd(y, m, d);
        }
        let cert = params.self_signed(&key_pair).unwrap();

        let cert_file = dir.join("fallback.crt");
        let key_file = dir.join("fallback.key");
        std::fs::write(&cert_file, cert.pem()).unwrap();
        std::fs::write(&key_file, key_pair.serialize_pem()).unwrap();

        FallbackCertificateConfig {
            cert_file,
            key_file,
        }
    }

    #[test]
    fn test_validate_missing_certificate() {
        let mut config = Config::default();
        config.acme.fallback = Some(FallbackCertificateConfig {
            cert_file: "/nonexistent/cert.pem".into(),
            key_file: "/nonexistent/key.pem".into(),
        });

        let result = validate_certificates(&config);

        assert!(result
            .errors
            .iter()
            .any(|e| e.message.contains("Fallback certificate not found")));
    }

    #[test]
    fn test_validate_valid_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.acme.fallback = Some(write_cert(dir.path(), None));

        let result = validate_certificates(&config);

        assert!(result.is_ok());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_validate_expired_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.acme.fallback = Some(write_cert(dir.path(), Some((2000, 1, 1))));

        let result = validate_certificates(&config);

        assert!(result.errors[0].message.contains("expired"));
    }

    #[test]
    fn test_validate_garbage_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let fallback = write_cert(dir.path(), None);
        std::fs::write(&fallback.cert_file, "not a certificate").unwrap();

        let mut config = Config::default();
        config.acme.fallback = Some(fallback);

        let result = validate_certificates(&config);

        assert!(result.errors[0].message.contains("Failed to parse certificate"));
    }

    #[test]
    fn test_no_fallback_is_ok() {
        let result = validate_certificates(&Config::default());
        assert!(result.is_ok());
    }
}
