//! Certkeeper - Main entry point
//!
//! Keeps a TLS certificate for the configured domains issued, persisted and
//! renewed.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use certkeeper::{CertKeeper, CertificateStorage};
use certkeeper_common::observability::init_tracing;
use certkeeper_config::{validate, Config};

const DEFAULT_CONFIG_PATH: &str = "/etc/certkeeper/certkeeper.kdl";

/// Certkeeper - automatic TLS certificate lifecycle management
#[derive(Parser, Debug)]
#[command(name = "certkeeper")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config", env = "CERTKEEPER_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long = "log-json", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Issue, serve and renew certificates (default)
    Run,
    /// Validate configuration file and exit
    Test,
    /// List stored certificates
    List,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    init_tracing(log_level, cli.log_json);

    let config_path = cli
        .config
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(&config_path),
        Commands::Test => test_config(&config_path),
        Commands::List => list_certificates(&config_path),
    }
}

/// Test configuration file and exit
fn test_config(config_path: &Path) -> Result<()> {
    info!("Testing configuration file: {}", config_path.display());
    let config = Config::from_file(config_path)?;

    config
        .validate()
        .context("Configuration validation failed")?;

    let result = validate::validate_all(&config);
    for warning in &result.warnings {
        warn!("{}", warning);
    }
    for err in &result.errors {
        error!("{}", err);
    }
    if !result.is_ok() {
        anyhow::bail!(
            "configuration has {} error(s), see log output",
            result.errors.len()
        );
    }

    let acme = &config.acme;
    info!("Configuration test successful:");
    info!("  - domains: {}", acme.domains);
    info!("  - directory: {}", acme.directory().url());
    info!("  - storage: {}", acme.storage.display());
    info!("  - transport: {:?}", acme.transport);
    match acme.renewal() {
        Some(renewal) => info!(
            "  - renewal: every {}s, {} days before expiry",
            renewal.check_interval.as_secs(),
            renewal.renew_before_days
        ),
        None => info!("  - renewal: disabled"),
    }

    println!(
        "certkeeper: configuration file {} test is successful",
        config_path.display()
    );

    Ok(())
}

/// Print every certificate in storage
fn list_certificates(config_path: &Path) -> Result<()> {
    let config = Config::from_file(config_path)?;
    let storage = CertificateStorage::new(&config.acme.storage).with_context(|| {
        format!(
            "Failed to open certificate storage at {}",
            config.acme.storage.display()
        )
    })?;

    let domains = storage.list_domains()?;
    if domains.is_empty() {
        println!("No stored certificates in {}", storage.base_path().display());
        return Ok(());
    }

    for domain in domains {
        match storage.load_certificate(&domain) {
            Ok(Some(cert)) => {
                println!(
                    "{}\n  names:       {}\n  expires:     {}\n  fingerprint: {}",
                    domain,
                    cert.domain_names().join(", "),
                    cert.not_after(),
                    cert.fingerprint()
                );
                match storage.load_meta(&domain) {
                    Ok(Some(meta)) if meta.fingerprint != cert.fingerprint() => {
                        println!("  metadata:    stale (records {})", meta.fingerprint)
                    }
                    Ok(Some(_)) => {}
                    Ok(None) => println!("  metadata:    missing"),
                    Err(e) => println!("  metadata:    unreadable: {}", e),
                }
            }
            Ok(None) => println!("{}\n  (no certificate)", domain),
            Err(e) => println!("{}\n  unreadable: {}", domain, e),
        }
    }

    Ok(())
}

/// Run the lifecycle manager until a shutdown signal
fn run(config_path: &Path) -> Result<()> {
    info!("Loading configuration from: {}", config_path.display());
    let config = Config::from_file(config_path)?;
    config
        .validate()
        .context("Configuration validation failed")?;
    for warning in validate::lint_config(&config).warnings {
        warn!("{}", warning);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(async {
        let keeper = CertKeeper::from_config(&config)?;
        let cancel = CancellationToken::new();
        let task = keeper.spawn(cancel.clone());

        info!("Certkeeper started");
        wait_for_shutdown().await?;

        info!("Received shutdown signal, stopping certificate lifecycle manager");
        cancel.cancel();
        task.await.context("Lifecycle manager task failed")?;

        info!("Certkeeper stopped");
        Ok::<(), anyhow::Error>(())
    })
}

#[cfg(unix)]
async fn wait_for_shutdown() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl-C"),
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")
}
