//! wsprobe - WebSocket connectivity probe
//!
//! Keeps a connection to a WebSocket endpoint alive, journals everything it
//! receives and reconnects after any failure until interrupted.

mod cli;
mod config;
mod connection;
mod error;
mod journal;
mod logging;
mod version;

use std::future;
use std::io::{self, Write};
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::cli::{Cli, Commands, ConfigSubcommand};
use crate::config::ProbeConfig;
use crate::connection::{ConnectionConfig, ConnectionManager};
use crate::error::{Error, Result};
use crate::journal::Journal;

fn main() -> Result<()> {
    // Parse CLI arguments first (before logging, so we know verbosity)
    let cli = Cli::parse();
    let (verbose, quiet) = (cli.verbose, cli.quiet);

    let (config_path, url) = match cli.command() {
        Commands::Version => {
            version::print_version();
            return Ok(());
        }
        Commands::Config { subcommand } => {
            // Config commands use minimal logging
            logging::init_simple(tracing::Level::WARN)?;
            if let Err(e) = handle_config_command(subcommand) {
                eprint!("{}", e.format_for_terminal());
                std::process::exit(e.exit_code());
            }
            return Ok(());
        }
        Commands::Run { config, url } => (config, url),
    };

    let config = match load_run_config(config_path.as_deref(), url) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprint!("{}", e.format_for_terminal());
            std::process::exit(e.exit_code());
        }
    };

    // The guards must be kept alive for the lifetime of the program
    let _log_guards = logging::init_logging(&config.logging, verbose, quiet)?;

    let build = version::build_info();
    info!(
        version = %build.full_version(),
        target = %build.target,
        profile = %build.profile,
        "Starting wsprobe"
    );

    run_probe(config, quiet)
}

/// Load configuration and apply the `--url` override, which outranks everything
fn load_run_config(path: Option<&str>, url: Option<String>) -> Result<ProbeConfig> {
    let mut config = ProbeConfig::load(path)?;
    if let Some(url) = url {
        config.endpoint.url = url;
        config.validate()?;
    }
    Ok(config)
}

/// Run the reconnect loop until Ctrl+C
fn run_probe(config: ProbeConfig, quiet: bool) -> Result<()> {
    let journal = Arc::new(Journal::new(config.journal_path(), config.journal.echo_stdout));
    if let Err(e) = journal.prepare() {
        eprint!("{}", e.format_for_terminal());
        std::process::exit(e.exit_code());
    }

    if !quiet {
        print_header(&config);
    }

    let manager = ConnectionManager::new(ConnectionConfig::from(&config.endpoint), journal.clone());

    // The probe is I/O bound; one thread carries the connection and its heartbeat
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create runtime: {}", e)))?;

    runtime.block_on(async {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let interrupt = async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Unable to listen for Ctrl+C");
                future::pending::<()>().await;
            }
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        };

        tokio::join!(manager.run(shutdown_rx), interrupt);
    });

    debug!(state = ?manager.connection_state(), "Reconnect loop finished");
    journal.banner("STOPPED by user (Ctrl+C)");

    let stats = manager.stats();
    info!(
        attempts = stats.attempts,
        connections = stats.connections,
        messages = stats.messages,
        probes_sent = stats.probes_sent,
        "Probe stopped"
    );

    Ok(())
}

/// Print the startup summary; a closed stdout is not worth stopping for
fn print_header(config: &ProbeConfig) {
    let endpoint = &config.endpoint;
    let header = format!(
        "WebSocket probe\n  \
         URL:             {}\n  \
         Journal:         {}\n  \
         Heartbeat:       every {} ms (timeout {} ms)\n  \
         Reconnect delay: {} ms\n\
         Press Ctrl+C to stop\n",
        endpoint.url,
        config.journal_path().display(),
        endpoint.heartbeat_interval_ms,
        endpoint.heartbeat_timeout_ms,
        endpoint.reconnect_delay_ms,
    );

    let mut stdout = io::stdout().lock();
    if let Err(e) = writeln!(stdout, "{}", header).and_then(|_| stdout.flush()) {
        debug!(error = %e, "Startup header not printed");
    }
}

/// Handle config subcommands
fn handle_config_command(subcommand: ConfigSubcommand) -> Result<()> {
    match subcommand {
        ConfigSubcommand::Show { config } => {
            let cfg = ProbeConfig::load(config.as_deref())?;
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
        ConfigSubcommand::Init { path, force } => {
            let created = config::init_config(path.as_deref(), force)?;
            println!("Configuration written to {}", created.display());
        }
        ConfigSubcommand::Validate { config } => {
            ProbeConfig::load(config.as_deref())?;
            println!("Configuration is valid.");
        }
    }

    Ok(())
}
