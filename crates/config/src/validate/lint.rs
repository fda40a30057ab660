//! Configuration linting
//!
//! Checks for settings that load fine but likely misbehave at runtime.

use certkeeper_common::LOCALHOST;

use super::{ValidationResult, ValidationWarning};
use crate::{Config, HostTransport};

/// Renewal checks more often than this hammer the CA for nothing
const MIN_SENSIBLE_CHECK_INTERVAL_SECS: u64 = 3600;

/// Let's Encrypt certificates live 90 days
const TYPICAL_CERT_LIFETIME_DAYS: u32 = 90;

/// Lint configuration for best practices
pub fn lint_config(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();
    let acme = &config.acme;

    if acme.domains.is_empty() {
        result.add_warning(ValidationWarning::new(
            "No domains configured; automatic certificates are disabled",
        ));
    } else if !acme.domains.is_configured() {
        result.add_warning(ValidationWarning::new(
            "Only 'localhost' is configured; automatic certificates are disabled",
        ));
    } else if acme.domains.contains(LOCALHOST) {
        result.add_warning(ValidationWarning::new(
            "'localhost' cannot be validated by a public CA; remove it from the domain list",
        ));
    }

    for domain in acme.domains.iter().filter(|d| d.starts_with("*.")) {
        result.add_warning(ValidationWarning::new(format!(
            "Wildcard domain '{}' cannot be validated with HTTP-01 challenges",
            domain
        )));
    }

    if acme.domains.is_configured() && !acme.accept_terms_of_service {
        result.add_warning(ValidationWarning::new(
            "accept-terms-of-service is not set; account registration will be refused",
        ));
    }

    if acme.domains.is_configured() && acme.email.is_none() {
        result.add_warning(ValidationWarning::new(
            "No contact email configured (expiry notices cannot be delivered)",
        ));
    }

    match (acme.check_interval_secs, acme.renew_before_days) {
        (Some(_), None) | (None, Some(_)) => {
            result.add_warning(ValidationWarning::new(
                "Renewal needs both check-interval-secs and renew-before-days; certificates will be issued once and never renewed",
            ));
        }
        (None, None) if acme.domains.is_configured() => {
            result.add_warning(ValidationWarning::new(
                "No renewal policy configured; certificates will be issued once and never renewed",
            ));
        }
        _ => {}
    }

    if let Some(secs) = acme.check_interval_secs {
        if secs > 0 && secs < MIN_SENSIBLE_CHECK_INTERVAL_SECS {
            result.add_warning(ValidationWarning::new(format!(
                "check-interval-secs {} is shorter than one hour",
                secs
            )));
        }
    }

    if let Some(days) = acme.renew_before_days {
        if days >= TYPICAL_CERT_LIFETIME_DAYS {
            result.add_warning(ValidationWarning::new(format!(
                "renew-before-days {} is not shorter than a typical {}-day certificate lifetime; every check will reissue",
                days, TYPICAL_CERT_LIFETIME_DAYS
            )));
        }
    }

    if acme.transport == HostTransport::Static && acme.domains.is_configured() {
        result.add_warning(ValidationWarning::new(
            "Transport 'static' cannot bind certificates dynamically; automatic certificates are disabled",
        ));
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use certkeeper_common::DomainSet;

    fn configured() -> Config {
        let mut config = Config::default();
        config.acme.domains = DomainSet::new(["example.com"]);
        config.acme.email = Some("admin@example.com".to_string());
        config.acme.accept_terms_of_service = true;
        config.acme.check_interval_secs = Some(43200);
        config.acme.renew_before_days = Some(30);
        config
    }

    fn has_warning(result: &ValidationResult, needle: &str) -> bool {
        result.warnings.iter().any(|w| w.message.contains(needle))
    }

    #[test]
    fn test_clean_config_has_no_warnings() {
        let result = lint_config(&configured());
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    }

    #[test]
    fn test_localhost_only() {
        let mut config = configured();
        config.acme.domains = DomainSet::new(["localhost"]);
        assert!(has_warning(&lint_config(&config), "Only 'localhost'"));
    }

    #[test]
    fn test_wildcard_domain() {
        let mut config = configured();
        config.acme.domains = DomainSet::new(["*.example.com"]);
        assert!(has_warning(&lint_config(&config), "HTTP-01"));
    }

    #[test]
    fn test_half_configured_renewal() {
        let mut config = configured();
        config.acme.renew_before_days = None;
        assert!(has_warning(&lint_config(&config), "needs both"));
    }

    #[test]
    fn test_short_interval_and_long_lead_time() {
        let mut config = configured();
        config.acme.check_interval_secs = Some(60);
        config.acme.renew_before_days = Some(120);
        let result = lint_config(&config);
        assert!(has_warning(&result, "shorter than one hour"));
        assert!(has_warning(&result, "every check will reissue"));
    }

    #[test]
    fn test_terms_not_accepted() {
        let mut config = configured();
        config.acme.accept_terms_of_service = false;
        assert!(has_warning(&lint_config(&config), "accept-terms-of-service"));
    }

    #[test]
    fn test_static_transport() {
        let mut config = configured();
        config.acme.transport = HostTransport::Static;
        assert!(has_warning(&lint_config(&config), "Transport 'static'"));
    }
}
