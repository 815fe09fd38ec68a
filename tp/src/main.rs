//! tp - run a token-passing worker pool

use clap::Parser;
use eyre::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use tokenpool::cli::Cli;
use tokenpool::config::Config;
use tokenpool::{logging, session};

/// Turn SIGINT or SIGTERM into a single shutdown request
async fn forward_signals(shutdown_tx: mpsc::Sender<()>) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => {
            debug!("forward_signals: SIGINT received");
            warn!("SIGINT received");
        }
        _ = sigterm.recv() => {
            debug!("forward_signals: SIGTERM received");
            warn!("SIGTERM received");
        }
    }
    let _ = shutdown_tx.send(()).await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    cli.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    logging::init(&config.log.file, config.log.level.as_deref(), false).context("Failed to setup logging")?;
    info!(simulate = cli.simulate, "tp starting");
    debug!(?config, "main: configuration resolved");

    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let signals = tokio::spawn(forward_signals(shutdown_tx));

    let result = session::run(&config, cli.simulate, shutdown_rx).await;
    signals.abort();

    let report = result?;
    let json = serde_json::to_string(&report).context("Failed to serialize run report")?;
    info!(report = %json, "Run complete");

    if cli.json {
        println!("{}", json);
    } else {
        println!("{}", report);
    }
    Ok(())
}
