//! Diff desired against committed state and compute the next committed state.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::clock::Clock;
use crate::config::CollectionKind;
use crate::error::SyncError;
use crate::record::{Record, TIME_FIELD, canonical_json, canonical_records};
use crate::stores::{LedgerStore, TableStore};

/// How desired records are paired with committed ones when carrying timestamps over.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MergeStrategy {
    /// Pair by index.
    #[default]
    Positional,
    /// Pair by the value of the named identifier field.
    Keyed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reconciliation {
    pub changed: bool,
    /// State to commit when `changed`; otherwise the committed state as read.
    pub next_state: Vec<Record>,
}

pub struct Reconciler {
    table: Arc<dyn TableStore>,
    ledger: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
}

impl Reconciler {
    pub fn new(
        table: Arc<dyn TableStore>,
        ledger: Arc<dyn LedgerStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            table,
            ledger,
            clock,
        }
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerStore> {
        &self.ledger
    }

    /// Fetch both states fresh and decide what, if anything, to commit.
    pub async fn reconcile(
        &self,
        collection: CollectionKind,
        strategy: &MergeStrategy,
    ) -> Result<Reconciliation, SyncError> {
        let desired = self
            .table
            .fetch_records(collection)
            .await
            .map_err(|source| SyncError::FetchFailed {
                collection,
                store: "table",
                source,
            })?;
        let committed = self
            .ledger
            .fetch_committed(collection)
            .await
            .map_err(|source| SyncError::FetchFailed {
                collection,
                store: "ledger",
                source,
            })?;

        let result = diff(&desired, committed, strategy, &self.clock.timestamp());
        tracing::debug!(
            collection = %collection,
            desired = desired.len(),
            changed = result.changed,
            "reconciled collection"
        );
        Ok(result)
    }
}

/// Compare `desired` with `committed` and merge when they differ.
///
/// States that are deep-equal in canonical form are unchanged. So are states
/// where the merge would reproduce `committed` exactly, which is the case when
/// the only difference is the timestamps the ledger already holds.
pub fn diff(
    desired: &[Record],
    committed: Vec<Record>,
    strategy: &MergeStrategy,
    now: &str,
) -> Reconciliation {
    let committed_canonical = canonical_records(&committed);
    if canonical_records(desired) == committed_canonical {
        return Reconciliation {
            changed: false,
            next_state: committed,
        };
    }

    let merged = merge_states(desired, &committed, strategy, now);
    if canonical_records(&merged) == committed_canonical {
        return Reconciliation {
            changed: false,
            next_state: committed,
        };
    }
    Reconciliation {
        changed: true,
        next_state: merged,
    }
}

/// Copy every desired record, carrying over the paired committed `Time` or
/// stamping `now` where the pair has none.
pub fn merge_states(
    desired: &[Record],
    committed: &[Record],
    strategy: &MergeStrategy,
    now: &str,
) -> Vec<Record> {
    let stamp_with = |record: &Record, existing: Option<&Value>| {
        let mut next = record.clone();
        let time = existing
            .cloned()
            .unwrap_or_else(|| Value::String(now.to_string()));
        next.insert(TIME_FIELD.to_string(), time);
        next
    };

    match strategy {
        MergeStrategy::Positional => desired
            .iter()
            .enumerate()
            .map(|(i, record)| {
                stamp_with(record, committed.get(i).and_then(|c| c.get(TIME_FIELD)))
            })
            .collect(),
        MergeStrategy::Keyed(id_field) => {
            let mut times: HashMap<String, &Value> = HashMap::new();
            for record in committed {
                if let (Some(id), Some(time)) = (record.get(id_field), record.get(TIME_FIELD)) {
                    times.entry(canonical_json(id)).or_insert(time);
                }
            }
            desired
                .iter()
                .map(|record| {
                    let existing = record
                        .get(id_field)
                        .and_then(|id| times.get(&canonical_json(id)).copied());
                    stamp_with(record, existing)
                })
                .collect()
        }
    }
}
