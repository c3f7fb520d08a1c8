//! `lsync serve` command.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::Args;
use lsync_host::SyncDaemon;
use tokio::sync::broadcast;

use crate::opts::GlobalOpts;
use crate::util::{build_stores, host_config, setup_logging};

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Listen address (env: LSYNC_BIND)
    #[arg(long, env = "LSYNC_BIND")]
    pub bind: Option<SocketAddr>,

    /// Use in-memory stores instead of the remote ones
    #[arg(long)]
    pub offline: bool,
}

pub async fn cmd_serve(_opts: &GlobalOpts, args: &ServeArgs) -> Result<()> {
    setup_logging();

    let mut config = host_config()?;
    if let Some(bind) = args.bind {
        config.http_server.bind = bind;
    }
    let (table, ledger) = build_stores(&config, args.offline)?;

    let (shutdown_tx, _) = broadcast::channel(1);

    // Handle Ctrl-C and SIGTERM for graceful shutdown
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        let mut term =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl-C received, shutting down...");
            }
            _ = async {
                if let Some(ref mut t) = term { t.recv().await; }
            } => {
                tracing::info!("SIGTERM received, shutting down...");
            }
        }
        let _ = signal_tx.send(());
    });

    let daemon = SyncDaemon::start(config, table, ledger, shutdown_tx)
        .await
        .context("start sync daemon")?;
    daemon.run().await;
    Ok(())
}
