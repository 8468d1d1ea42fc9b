use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use common::cli::{CommonArgs, CommonCommands, DrainArgs, utils};
use common::config::Configuration;
use drain::{DrainOptions, DrainSummary, Drainer, LocalArchive, ObjectStoreRemote, RemoteStore};
use tokio::sync::oneshot;

/// Move rotated session logs from a bucket into a local day-partitioned archive
#[derive(Parser, Debug)]
#[command(name = "logdrain", version, about)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(flatten)]
    drain: DrainArgs,

    #[command(subcommand)]
    command: Option<CommonCommands>,
}

/// Waits for a shutdown signal (SIGINT or SIGTERM)
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        tokio::select! {
            _ = sigint.recv() => tracing::info!("Received SIGINT"),
            _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        tracing::info!("Received Ctrl+C");
    }

    Ok(())
}

/// One complete drain, with the cutoff evaluated now unless pinned.
async fn drain_once(remote: Arc<dyn RemoteStore>, config: &Configuration) -> Result<DrainSummary> {
    let cutoff = config
        .drain
        .day_until
        .unwrap_or_else(|| drain::default_cutoff(Utc::now()));

    let options = DrainOptions::new(cutoff)
        .with_batch_size(config.drain.batch_size)
        .with_dry_run(config.drain.dry_run);

    let mut drainer = Drainer::new(remote, LocalArchive::new(&config.archive.root), options);
    drainer.run().await.context("Drain failed")
}

async fn watch(remote: Arc<dyn RemoteStore>, config: &Configuration, every: Duration) -> Result<()> {
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            tracing::error!("Shutdown signal handler failed: {e:#}");
        }
        let _ = shutdown_tx.send(());
    });

    tracing::info!(
        "Watching bucket, pausing {} between runs",
        humantime_serde::re::humantime::format_duration(every)
    );

    loop {
        // A signal received mid-run takes effect once the run is over
        drain_once(remote.clone(), config).await?;

        tokio::select! {
            _ = tokio::time::sleep(every) => {}
            _ = &mut shutdown_rx => {
                tracing::info!("Stopping watch");
                return Ok(());
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    utils::init_logging(&cli.common);

    let mut config = utils::load_config(cli.common.config.as_ref())?;
    cli.drain.apply(&mut config);

    let today = Utc::now().date_naive();
    let command = cli.command.unwrap_or_default();
    if utils::handle_common_command(&command, &config, today)? {
        return Ok(());
    }

    utils::validate_config(&config, today)?;

    let store = common::storage::create_object_store(&config.store)
        .await
        .context("Failed to create object store")?;
    let remote: Arc<dyn RemoteStore> = Arc::new(ObjectStoreRemote::new(store));

    match config.drain.watch_interval {
        Some(every) if !config.drain.dry_run => watch(remote, &config, every).await,
        _ => drain_once(remote, &config).await.map(|_| ()),
    }
}
