//! Long-running service: HTTP intake plus the reconciliation scheduler.
//!
//! The daemon waits for a shutdown broadcast, then:
//! 1. stops accepting HTTP requests
//! 2. cancels tasks that have not reached their commit
//! 3. waits for committing tasks to finish

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::clock::{Clock, SystemClock};
use crate::config::{CollectionKind, HostConfig};
use crate::error::SyncError;
use crate::http::{HttpState, spawn_http_server};
use crate::reconcile::Reconciler;
use crate::scheduler::TaskScheduler;
use crate::stores::{LedgerStore, TableStore};

pub struct SyncDaemon {
    scheduler: TaskScheduler,
    shutdown_rx: broadcast::Receiver<()>,
    http_server: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl SyncDaemon {
    /// Wire stores into a scheduler and start the HTTP server, if enabled.
    ///
    /// Fails when the listen address cannot be bound.
    pub async fn start(
        config: HostConfig,
        table: Arc<dyn TableStore>,
        ledger: Arc<dyn LedgerStore>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Result<Self, SyncError> {
        Self::start_with_clock(config, table, ledger, Arc::new(SystemClock), shutdown_tx).await
    }

    pub async fn start_with_clock(
        config: HostConfig,
        table: Arc<dyn TableStore>,
        ledger: Arc<dyn LedgerStore>,
        clock: Arc<dyn Clock>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Result<Self, SyncError> {
        let reconciler = Reconciler::new(table, ledger, clock);
        let scheduler =
            TaskScheduler::new(reconciler, &config.scheduler, config.retry, &config.collections);

        let enabled: Vec<&str> = config.collections.keys().map(CollectionKind::as_str).collect();
        if enabled.is_empty() {
            tracing::warn!("no collection secrets configured; every webhook will be rejected");
        } else {
            tracing::info!(collections = ?enabled, "accepting webhooks");
        }

        let shutdown_rx = shutdown_tx.subscribe();
        let state = HttpState::new(scheduler.clone(), config.collections);
        let server = spawn_http_server(config.http_server, state, &shutdown_tx).await?;
        let (http_server, local_addr) = match server {
            Some(server) => (Some(server.handle), Some(server.local_addr)),
            None => (None, None),
        };
        Ok(Self {
            scheduler,
            shutdown_rx,
            http_server,
            local_addr,
        })
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    /// Address the HTTP server is bound to, if it is enabled.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Run until shutdown is broadcast, then drain.
    pub async fn run(mut self) {
        tracing::info!("sync daemon started");
        // A closed channel means every sender is gone; treat it as shutdown.
        let _ = self.shutdown_rx.recv().await;
        tracing::info!("shutdown signal received");

        if let Some(handle) = self.http_server.take() {
            let _ = handle.await;
        }
        self.scheduler.shutdown().await;
        tracing::info!("sync daemon stopped");
    }
}
