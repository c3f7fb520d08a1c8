use thiserror::Error;

use crate::config::CollectionKind;
use crate::stores::StoreError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid webhook: {0}")]
    Validation(String),
    #[error("content MAC mismatch for collection '{0}'")]
    Authentication(CollectionKind),
    #[error("fetch from {store} failed for collection '{collection}': {source}")]
    FetchFailed {
        collection: CollectionKind,
        store: &'static str,
        #[source]
        source: StoreError,
    },
    #[error("commit failed for collection '{collection}': {source}")]
    Commit {
        collection: CollectionKind,
        #[source]
        source: StoreError,
    },
    #[error("config error: {0}")]
    Config(String),
}

impl SyncError {
    pub fn validation(msg: impl Into<String>) -> Self {
        SyncError::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        SyncError::Config(msg.into())
    }
}
