//! Narrow interfaces to the two remote systems.
//!
//! - [`TableStore`]: the spreadsheet-like source of desired records
//! - [`LedgerStore`]: the contract account holding committed records
//!
//! Real clients live behind the `store-http` feature; [`memory`] provides
//! scriptable in-process stores.

pub mod memory;

#[cfg(feature = "store-http")]
pub mod ledger_http;
#[cfg(feature = "store-http")]
pub mod table_http;
#[cfg(feature = "store-http")]
mod transport;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::CollectionKind;
use crate::record::Record;
use crate::retry::Retryable;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("connection reset: {0}")]
    ConnectionReset(String),
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("decode error: {0}")]
    Decode(String),
    /// The ledger executed the call and reported a logic failure.
    #[error("rejected by ledger: {0}")]
    Rejected(String),
    #[error("transaction {tx_hash} not finalized after {attempts} status polls")]
    PollExhausted { tx_hash: String, attempts: u32 },
    #[error("collection '{0}' has no store mapping")]
    Unmapped(CollectionKind),
    #[error("{0}")]
    Other(String),
}

impl Retryable for StoreError {
    fn retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Timeout(_) | StoreError::ConnectionReset(_) | StoreError::RateLimited { .. }
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            StoreError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Result of a committed ledger write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitOutcome {
    /// Handle usable for status polling.
    pub tx_hash: String,
    pub success_value: Option<String>,
    #[serde(default)]
    pub logs: Vec<String>,
}

/// Desired-state provider.
#[async_trait]
pub trait TableStore: Send + Sync {
    async fn fetch_records(&self, collection: CollectionKind) -> Result<Vec<Record>, StoreError>;
}

/// Committed-state provider and write target.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn fetch_committed(&self, collection: CollectionKind) -> Result<Vec<Record>, StoreError>;

    async fn commit(
        &self,
        collection: CollectionKind,
        records: &[Record],
    ) -> Result<CommitOutcome, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_failures_are_retryable() {
        assert!(StoreError::Timeout("t".into()).retryable());
        assert!(StoreError::ConnectionReset("r".into()).retryable());
        assert!(StoreError::RateLimited { retry_after: None }.retryable());

        assert!(!StoreError::Rejected("logic".into()).retryable());
        assert!(!StoreError::Status { status: 500, body: String::new() }.retryable());
        assert!(!StoreError::Decode("bad".into()).retryable());
        assert!(
            !StoreError::PollExhausted {
                tx_hash: "h".into(),
                attempts: 20
            }
            .retryable()
        );
    }

    #[test]
    fn rate_limit_exposes_hint() {
        let err = StoreError::RateLimited {
            retry_after: Some(Duration::from_secs(3)),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
        assert_eq!(StoreError::Timeout("t".into()).retry_after(), None);
    }
}
