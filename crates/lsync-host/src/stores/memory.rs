//! In-process stores with scriptable failures.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{CommitOutcome, LedgerStore, StoreError, TableStore};
use crate::config::CollectionKind;
use crate::record::{Record, decode_records};

#[derive(Default)]
pub struct MemTableStore {
    records: Mutex<HashMap<CollectionKind, Vec<Record>>>,
    failures: Mutex<VecDeque<StoreError>>,
    fetches: AtomicUsize,
}

impl MemTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_records(&self, collection: CollectionKind, records: Vec<Record>) {
        lock(&self.records).insert(collection, records);
    }

    /// Make the next fetch fail with `err`.
    pub fn fail_next_fetch(&self, err: StoreError) {
        lock(&self.failures).push_back(err);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TableStore for MemTableStore {
    async fn fetch_records(&self, collection: CollectionKind) -> Result<Vec<Record>, StoreError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = lock(&self.failures).pop_front() {
            return Err(err);
        }
        Ok(lock(&self.records).get(&collection).cloned().unwrap_or_default())
    }
}

/// Ledger double that stores committed state as a JSON-encoded string, the
/// way the contract returns it.
#[derive(Default)]
pub struct MemLedgerStore {
    committed: Mutex<HashMap<CollectionKind, Value>>,
    commits: Mutex<Vec<(CollectionKind, Vec<Record>)>>,
    fetch_failures: Mutex<VecDeque<StoreError>>,
    commit_failures: Mutex<VecDeque<StoreError>>,
    commit_delay: Mutex<Option<Duration>>,
    commit_attempts: AtomicUsize,
}

impl MemLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the raw value the ledger returns for `collection`.
    pub fn set_committed_raw(&self, collection: CollectionKind, value: Value) {
        lock(&self.committed).insert(collection, value);
    }

    pub fn fail_next_fetch(&self, err: StoreError) {
        lock(&self.fetch_failures).push_back(err);
    }

    /// Queue a failure for the next commit attempt; queued failures are consumed in order.
    pub fn fail_next_commit(&self, err: StoreError) {
        lock(&self.commit_failures).push_back(err);
    }

    /// Make every commit take `delay` before it lands.
    pub fn set_commit_delay(&self, delay: Duration) {
        *lock(&self.commit_delay) = Some(delay);
    }

    /// Successful commits in the order they landed.
    pub fn commits(&self) -> Vec<(CollectionKind, Vec<Record>)> {
        lock(&self.commits).clone()
    }

    /// Commit invocations, including failed ones.
    pub fn commit_attempts(&self) -> usize {
        self.commit_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerStore for MemLedgerStore {
    async fn fetch_committed(&self, collection: CollectionKind) -> Result<Vec<Record>, StoreError> {
        if let Some(err) = lock(&self.fetch_failures).pop_front() {
            return Err(err);
        }
        let raw = lock(&self.committed)
            .get(&collection)
            .cloned()
            .unwrap_or(Value::Null);
        decode_records(raw).map_err(StoreError::Decode)
    }

    async fn commit(
        &self,
        collection: CollectionKind,
        records: &[Record],
    ) -> Result<CommitOutcome, StoreError> {
        let attempt = self.commit_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = *lock(&self.commit_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = lock(&self.commit_failures).pop_front() {
            return Err(err);
        }

        let encoded = serde_json::to_string(records).map_err(|e| StoreError::Decode(e.to_string()))?;
        lock(&self.committed).insert(collection, Value::String(encoded));
        lock(&self.commits).push((collection, records.to_vec()));
        Ok(CommitOutcome {
            tx_hash: format!("mem-tx-{attempt}"),
            success_value: None,
            logs: Vec::new(),
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn ledger_round_trips_through_string_encoding() {
        let ledger = MemLedgerStore::new();
        assert!(ledger.fetch_committed(CollectionKind::Agenda).await.unwrap().is_empty());

        let records = vec![record(json!({"title": "A", "Time": "2024-01-01T00:00:00.000Z"}))];
        let outcome = ledger.commit(CollectionKind::Agenda, &records).await.unwrap();
        assert_eq!(outcome.tx_hash, "mem-tx-1");

        let fetched = ledger.fetch_committed(CollectionKind::Agenda).await.unwrap();
        assert_eq!(fetched, records);
        assert!(ledger.fetch_committed(CollectionKind::Alerts).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn scripted_failures_are_consumed_in_order() {
        let ledger = MemLedgerStore::new();
        ledger.fail_next_commit(StoreError::Timeout("slow".into()));
        ledger.fail_next_commit(StoreError::Rejected("nope".into()));

        let records = vec![record(json!({"title": "A"}))];
        assert!(matches!(
            ledger.commit(CollectionKind::Alerts, &records).await,
            Err(StoreError::Timeout(_))
        ));
        assert!(matches!(
            ledger.commit(CollectionKind::Alerts, &records).await,
            Err(StoreError::Rejected(_))
        ));
        assert!(ledger.commit(CollectionKind::Alerts, &records).await.is_ok());
        assert_eq!(ledger.commit_attempts(), 3);
        assert_eq!(ledger.commits().len(), 1);
    }

    #[tokio::test]
    async fn table_returns_configured_records() {
        let table = MemTableStore::new();
        table.set_records(CollectionKind::Agenda, vec![record(json!({"title": "A"}))]);
        table.fail_next_fetch(StoreError::ConnectionReset("reset".into()));

        assert!(table.fetch_records(CollectionKind::Agenda).await.is_err());
        let records = table.fetch_records(CollectionKind::Agenda).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(table.fetch_count(), 2);
    }
}
