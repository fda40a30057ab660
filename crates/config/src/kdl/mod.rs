//! KDL configuration parsing.

mod acme;
mod helpers;

use anyhow::{anyhow, Result};
use tracing::{trace, warn};

use crate::Config;

/// Parse a whole configuration document.
pub fn parse_document(source: &str) -> Result<Config> {
    let doc: ::kdl::KdlDocument = source.parse().map_err(|e: ::kdl::KdlError| {
        let report = miette::Report::new(e);
        anyhow!("KDL parse error:\n{:?}", report)
    })?;

    let mut config = Config::default();

    for node in doc.nodes() {
        match node.name().value() {
            "acme" => {
                config.acme = acme::parse_acme_config(node)?;
            }
            other => {
                warn!(node = %other, "Ignoring unknown top-level configuration node");
            }
        }
    }

    trace!("Finished parsing configuration document");
    Ok(config)
}
