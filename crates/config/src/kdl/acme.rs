//! `acme` block KDL parsing.

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use tracing::trace;

use certkeeper_common::DomainSet;

use crate::acme::{default_storage, AcmeConfig, FallbackCertificateConfig, HostTransport};

use super::helpers::{
    find_child, get_bool_entry, get_int_entry, get_string_args, get_string_entry,
};

/// Parse the `acme` configuration block
pub fn parse_acme_config(node: &::kdl::KdlNode) -> Result<AcmeConfig> {
    trace!("Parsing acme configuration block");

    let transport_str = get_string_entry(node, "transport").unwrap_or_else(|| "rustls".to_string());
    let transport = match transport_str.to_lowercase().as_str() {
        "rustls" => HostTransport::Rustls,
        "static" => HostTransport::Static,
        other => {
            return Err(anyhow!(
                "Invalid transport '{}'. Valid transports: rustls, static",
                other
            ));
        }
    };

    let renew_before_days = get_int_entry(node, "renew-before-days")
        .map(|v| {
            u32::try_from(v).map_err(|_| anyhow!("renew-before-days must be a non-negative integer, got {}", v))
        })
        .transpose()?;

    let check_interval_secs = get_int_entry(node, "check-interval-secs")
        .map(|v| {
            u64::try_from(v).map_err(|_| anyhow!("check-interval-secs must be a non-negative integer, got {}", v))
        })
        .transpose()?;

    let fallback = find_child(node, "fallback-cert")
        .map(parse_fallback_cert)
        .transpose()?;

    let config = AcmeConfig {
        email: get_string_entry(node, "email"),
        domains: DomainSet::new(get_string_args(node, "domains")),
        accept_terms_of_service: get_bool_entry(node, "accept-terms-of-service").unwrap_or(false),
        staging: get_bool_entry(node, "staging").unwrap_or(false),
        directory_url: get_string_entry(node, "directory-url"),
        storage: get_string_entry(node, "storage")
            .map(PathBuf::from)
            .unwrap_or_else(default_storage),
        renew_before_days,
        check_interval_secs,
        transport,
        fallback,
    };

    trace!(
        domains = %config.domains,
        staging = config.staging,
        storage = %config.storage.display(),
        renew_before_days = ?config.renew_before_days,
        check_interval_secs = ?config.check_interval_secs,
        "Parsed acme configuration"
    );

    Ok(config)
}

fn parse_fallback_cert(node: &::kdl::KdlNode) -> Result<FallbackCertificateConfig> {
    let cert_file = get_string_entry(node, "cert-file").ok_or_else(|| {
        anyhow!("fallback-cert requires a 'cert-file' field, e.g., cert-file \"/etc/certs/default.crt\"")
    })?;
    let key_file = get_string_entry(node, "key-file").ok_or_else(|| {
        anyhow!("fallback-cert requires a 'key-file' field, e.g., key-file \"/etc/certs/default.key\"")
    })?;

    Ok(FallbackCertificateConfig {
        cert_file: PathBuf::from(cert_file),
        key_file: PathBuf::from(key_file),
    })
}

#[cfg(test)]
mod tests {
    use crate::{Config, ConfigError, DomainSet, HostTransport, MAX_RENEW_BEFORE_DAYS};
    use proptest::prelude::*;
    use std::time::Duration;

    #[test]
    fn test_parse_full_block() {
        let config = Config::from_kdl_str(
            r#"
            acme {
                email "admin@example.com"
                domains "Example.com" "www.example.com" "example.com"
                accept-terms-of-service #true
                staging #true
                storage "/tmp/certkeeper"
                renew-before-days 30
                check-interval-secs 3600
                transport "rustls"
                fallback-cert {
                    cert-file "/etc/certs/default.crt"
                    key-file "/etc/certs/default.key"
                }
            }
            "#,
        )
        .unwrap();

        let acme = config.acme;
        assert_eq!(acme.email.as_deref(), Some("admin@example.com"));
        assert_eq!(acme.domains.as_slice(), &["example.com", "www.example.com"]);
        assert!(acme.accept_terms_of_service);
        assert!(acme.staging);
        assert_eq!(acme.storage.to_str(), Some("/tmp/certkeeper"));
        assert_eq!(acme.transport, HostTransport::Rustls);
        let renewal = acme.renewal().unwrap();
        assert_eq!(renewal.check_interval, Duration::from_secs(3600));
        assert_eq!(renewal.renew_before_days, 30);
        let fallback = acme.fallback.unwrap();
        assert_eq!(fallback.cert_file.to_str(), Some("/etc/certs/default.crt"));
    }

    #[test]
    fn test_parse_minimal_block_disables_renewal() {
        let config = Config::from_kdl_str(
            r#"
            acme {
                domains "example.com"
            }
            "#,
        )
        .unwrap();

        assert!(config.acme.renewal().is_none());
        assert!(!config.acme.accept_terms_of_service);
        assert_eq!(config.acme.storage.to_str(), Some("/var/lib/certkeeper"));
    }

    #[test]
    fn test_parse_static_transport() {
        let config = Config::from_kdl_str(
            r#"
            acme {
                domains "example.com"
                transport "static"
            }
            "#,
        )
        .unwrap();

        assert_eq!(config.acme.transport, HostTransport::Static);
    }

    #[test]
    fn test_parse_invalid_transport() {
        let err = Config::from_kdl_str(
            r#"
            acme {
                transport "iis"
            }
            "#,
        )
        .unwrap_err();

        assert!(err.to_string().contains("Invalid transport 'iis'"));
    }

    #[test]
    fn test_parse_negative_lead_time() {
        let err = Config::from_kdl_str(
            r#"
            acme {
                renew-before-days -5
            }
            "#,
        )
        .unwrap_err();

        assert!(err.to_string().contains("renew-before-days"));
    }

    #[test]
    fn test_fallback_requires_key_file() {
        let err = Config::from_kdl_str(
            r#"
            acme {
                fallback-cert {
                    cert-file "/etc/certs/default.crt"
                }
            }
            "#,
        )
        .unwrap_err();

        assert!(err.to_string().contains("key-file"));
    }

    #[test]
    fn test_parse_error_is_reported() {
        let err = Config::from_kdl_str("acme {").unwrap_err();
        assert!(err.to_string().contains("KDL parse error"));
    }

    #[test]
    fn test_missing_acme_block() {
        let config = Config::from_kdl_str("").unwrap();
        assert!(config.acme.domains.is_empty());
    }

    proptest! {
        #[test]
        fn prop_domains_normalize_like_domain_set(names in prop::collection::vec("[a-zA-Z]{1,10}\\.(com|org|Net)", 1..8)) {
            let args: Vec<String> = names.iter().map(|name| format!("\"{}\"", name)).collect();
            let config = Config::from_kdl_str(&format!("acme {{ domains {} }}", args.join(" "))).unwrap();

            prop_assert_eq!(&config.acme.domains, &DomainSet::new(&names));
            prop_assert!(config.validate().is_ok());
        }

        #[test]
        fn prop_renew_before_days_is_bounded(days in 0u32..1_000_000) {
            let config = Config::from_kdl_str(&format!(
                "acme {{ domains \"example.com\"; renew-before-days {}; check-interval-secs 3600 }}",
                days
            ))
            .unwrap();

            prop_assert_eq!(config.acme.renew_before_days, Some(days));
            if days <= MAX_RENEW_BEFORE_DAYS {
                prop_assert!(config.validate().is_ok());
            } else {
                prop_assert_eq!(config.validate(), Err(ConfigError::RenewBeforeDaysTooLarge(days)));
            }
        }
    }
}
