//! New-market bot binary entrypoint.
//! Loads config and checkpoint, picks the live or dry-run notifier, then polls
//! until SIGINT/SIGTERM. Exits non-zero on a corrupt checkpoint, bad config,
//! or rejected credentials.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info};

use new_market_bot::ingest::providers::gamma::GammaEventsProvider;
use new_market_bot::notify::build_notifier;
use new_market_bot::{init_tracing, BotConfig, FileCheckpointStore, PollLoop};

async fn shutdown_signal(tx: watch::Sender<bool>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("shutdown signal received");
    let _ = tx.send(true);
}

async fn run() -> anyhow::Result<()> {
    let cfg = BotConfig::from_env().context("loading configuration")?;

    let store = Arc::new(FileCheckpointStore::new(&cfg.state_path));
    let fetcher = Arc::new(
        GammaEventsProvider::from_url(&cfg.api_base, cfg.http_timeout())
            .context("building listing client")?,
    );
    let notifier = build_notifier(cfg.credentials.clone(), cfg.http_timeout())
        .context("building notifier")?;

    info!(state_path = %store.path().display(), api_base = %cfg.api_base, "starting new-market bot");

    let poll = PollLoop::new(cfg, fetcher, notifier, store).context("loading checkpoint")?;

    let (tx, rx) = watch::channel(false);
    tokio::spawn(shutdown_signal(tx));

    poll.run(rx).await.context("poll loop stopped")?;
    info!("bot stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}
