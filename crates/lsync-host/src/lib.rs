//! Webhook-driven reconciliation between a table store and a ledger contract.

pub mod clock;
pub mod config;
pub mod daemon;
pub mod error;
pub mod http;
pub mod mac;
pub mod reconcile;
pub mod record;
pub mod retry;
pub mod scheduler;
pub mod stores;

pub use config::{CollectionConfig, CollectionKind, HostConfig};
pub use daemon::SyncDaemon;
pub use error::SyncError;
pub use reconcile::{MergeStrategy, Reconciler, Reconciliation};
pub use record::Record;
pub use scheduler::{TaskHandle, TaskScheduler, TaskState};
pub use stores::{CommitOutcome, LedgerStore, StoreError, TableStore};
