//! Environment loading, logging setup and store construction.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use lsync_host::HostConfig;
use lsync_host::stores::ledger_http::GatewayLedgerStore;
use lsync_host::stores::memory::{MemLedgerStore, MemTableStore};
use lsync_host::stores::table_http::RestTableStore;
use lsync_host::stores::{LedgerStore, TableStore};
use tracing_subscriber::EnvFilter;

/// Load an env file without overriding existing environment variables.
pub fn load_env(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    for item in dotenvy::from_path_iter(path).with_context(|| format!("load {}", path.display()))? {
        let (key, val) = item?;
        if std::env::var_os(&key).is_none() {
            unsafe {
                std::env::set_var(&key, &val);
            }
        }
    }
    Ok(())
}

/// Set up tracing subscriber; `RUST_LOG` overrides the default `info` level.
pub fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .init();
}

pub fn host_config() -> Result<HostConfig> {
    HostConfig::from_env().context("read configuration from environment")
}

/// Build the configured remote stores, or in-memory ones when `offline`.
pub fn build_stores(
    config: &HostConfig,
    offline: bool,
) -> Result<(Arc<dyn TableStore>, Arc<dyn LedgerStore>)> {
    if offline {
        tracing::warn!("offline mode: using in-memory stores");
        let table: Arc<dyn TableStore> = Arc::new(MemTableStore::new());
        let ledger: Arc<dyn LedgerStore> = Arc::new(MemLedgerStore::new());
        return Ok((table, ledger));
    }
    let table: Arc<dyn TableStore> =
        Arc::new(RestTableStore::new(&config.table).context("configure table store")?);
    let ledger: Arc<dyn LedgerStore> =
        Arc::new(GatewayLedgerStore::new(&config.ledger).context("configure ledger store")?);
    Ok((table, ledger))
}
