// ABOUTME: CLI entry point for canal-relay
// ABOUTME: Loads the config, sets up logging and signal handling, then runs the relay

use anyhow::Result;
use canal_relay::commands::{self, RelayOptions};
use canal_relay::config::RelayConfig;
use canal_relay::logging;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "canal-relay")]
#[command(about = "Relay MySQL binlog changes from a Canal server into a destination MySQL", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the TOML config file
    #[arg(short = 'c', long = "config")]
    config: PathBuf,
    /// Write changes to dest_mysql; without it changes are only consumed
    #[arg(short = 'w', long = "write", default_value_t = false)]
    write: bool,
    /// Print the subscription filter and every generated statement
    #[arg(short = 'v', long = "verbose", default_value_t = false)]
    verbose: bool,
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The config names the error log, so it is loaded before logging starts
    let config = RelayConfig::load(&cli.config)?;
    logging::init(&cli.log, config.error_log_path())?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);

    let ctrl_c_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received shutdown signal");
                let _ = ctrl_c_tx.send(());
            }
            Err(e) => tracing::warn!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let term_tx = shutdown_tx.clone();
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::spawn(async move {
                    if term.recv().await.is_some() {
                        tracing::info!("Received SIGTERM");
                        let _ = term_tx.send(());
                    }
                });
            }
            Err(e) => tracing::warn!("Failed to listen for SIGTERM: {}", e),
        }
    }

    let options = RelayOptions {
        write: cli.write,
        verbose: cli.verbose,
    };
    let stats = commands::relay(&config, options, shutdown_rx).await?;
    tracing::info!(
        "Relayed {} records into {} statements ({} applied, {} failed)",
        stats.records,
        stats.statements,
        stats.applied,
        stats.failed
    );

    drop(shutdown_tx);
    Ok(())
}
