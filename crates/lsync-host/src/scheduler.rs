//! Single-flight, debounced reconciliation per collection.
//!
//! `enqueue` supersedes whatever task is registered for the collection and
//! schedules a new one after the coalescing delay. A task runs in phases:
//!
//! 1. Scheduled: waiting out the delay
//! 2. Running: fetching both states and diffing
//! 3. Committing: writing the merged state with retry
//!
//! Cancellation is observed in the first two phases. The commit phase is
//! entered through a claim on the registry that only the currently registered,
//! uncancelled task can win; after that the write runs to completion.
//!
//! The registry is process-local. Several instances serving the same
//! collections do not coordinate with each other.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::{CollectionConfig, CollectionKind, SchedulerConfig};
use crate::error::SyncError;
use crate::reconcile::{MergeStrategy, Reconciler};
use crate::retry::{RetryPolicy, retry_async};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Scheduled,
    Running,
    Committing,
    Completed,
    Failed,
    Canceled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Canceled
        )
    }
}

/// State transition published to [`TaskScheduler::subscribe`] receivers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskEvent {
    pub collection: CollectionKind,
    pub task_id: u64,
    pub state: TaskState,
}

/// Caller-side view of a scheduled reconciliation.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: u64,
    collection: CollectionKind,
    created: Instant,
    cancel: CancellationToken,
    state: watch::Receiver<TaskState>,
}

impl TaskHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn collection(&self) -> CollectionKind {
        self.collection
    }

    pub fn created(&self) -> Instant {
        self.created
    }

    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    /// Request cancellation. Has no effect once the commit has been claimed.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait until the task reaches a terminal state.
    pub async fn wait(&self) -> TaskState {
        let mut rx = self.state.clone();
        if let Ok(state) = rx.wait_for(TaskState::is_terminal).await {
            return *state;
        }
        // Sender dropped: the task is gone, report what it last published.
        *rx.borrow()
    }
}

struct TaskSlot {
    id: u64,
    cancel: CancellationToken,
    claimed: bool,
}

struct Inner {
    registry: Mutex<HashMap<CollectionKind, TaskSlot>>,
    run_locks: HashMap<CollectionKind, Arc<tokio::sync::Mutex<()>>>,
    strategies: BTreeMap<CollectionKind, MergeStrategy>,
    reconciler: Reconciler,
    retry: RetryPolicy,
    coalesce_delay: Duration,
    next_id: AtomicU64,
    events: broadcast::Sender<TaskEvent>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<Inner>,
}

struct Task {
    id: u64,
    collection: CollectionKind,
    cancel: CancellationToken,
    state: watch::Sender<TaskState>,
    payload: Bytes,
}

impl TaskScheduler {
    pub fn new(
        reconciler: Reconciler,
        config: &SchedulerConfig,
        retry: RetryPolicy,
        collections: &BTreeMap<CollectionKind, CollectionConfig>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        let run_locks = CollectionKind::ALL
            .into_iter()
            .map(|kind| (kind, Arc::new(tokio::sync::Mutex::new(()))))
            .collect();
        let strategies = collections
            .iter()
            .map(|(kind, cfg)| (*kind, cfg.merge_strategy()))
            .collect();
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(HashMap::new()),
                run_locks,
                strategies,
                reconciler,
                retry,
                coalesce_delay: config.coalesce_delay,
                next_id: AtomicU64::new(1),
                events,
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// Supersede any live task for `collection` and schedule a fresh one.
    ///
    /// Returns immediately; the reconciliation runs on a spawned task.
    pub fn enqueue(&self, collection: CollectionKind, payload: Bytes) -> TaskHandle {
        let inner = &self.inner;
        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = inner.shutdown.child_token();
        let (state_tx, state_rx) = watch::channel(TaskState::Scheduled);

        {
            let mut registry = inner.registry();
            if let Some(previous) = registry.remove(&collection) {
                previous.cancel.cancel();
                tracing::debug!(
                    collection = %collection,
                    task_id = previous.id,
                    superseded_by = id,
                    committing = previous.claimed,
                    "superseded reconciliation task"
                );
            }
            registry.insert(
                collection,
                TaskSlot {
                    id,
                    cancel: cancel.clone(),
                    claimed: false,
                },
            );
        }
        inner.publish(collection, id, TaskState::Scheduled);

        let handle = TaskHandle {
            id,
            collection,
            created: Instant::now(),
            cancel: cancel.clone(),
            state: state_rx,
        };
        let task = Task {
            id,
            collection,
            cancel,
            state: state_tx,
            payload,
        };
        let runner = Arc::clone(inner);
        inner.tracker.spawn(async move { runner.run(task).await });
        handle
    }

    /// Tasks spawned and not yet finished, including superseded commits.
    pub fn in_flight(&self) -> usize {
        self.inner.tracker.len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.inner.events.subscribe()
    }

    /// Cancel everything not yet committing and wait for all tasks to finish.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        inner.shutdown.cancel();
        inner.tracker.close();
        tracing::info!(in_flight = inner.tracker.len(), "draining reconciliation tasks");
        inner.tracker.wait().await;
    }
}

impl Inner {
    fn registry(&self) -> MutexGuard<'_, HashMap<CollectionKind, TaskSlot>> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, collection: CollectionKind, task_id: u64, state: TaskState) {
        // No subscribers is fine.
        let _ = self.events.send(TaskEvent {
            collection,
            task_id,
            state,
        });
    }

    fn transition(&self, task: &Task, state: TaskState) {
        task.state.send_replace(state);
        self.publish(task.collection, task.id, state);
    }

    /// Point of no return: succeeds only for the registered, uncancelled task.
    fn claim(&self, task: &Task) -> bool {
        let mut registry = self.registry();
        match registry.get_mut(&task.collection) {
            Some(slot) if slot.id == task.id && !task.cancel.is_cancelled() => {
                slot.claimed = true;
                true
            }
            _ => false,
        }
    }

    fn release(&self, task: &Task) {
        let mut registry = self.registry();
        if registry
            .get(&task.collection)
            .is_some_and(|slot| slot.id == task.id)
        {
            registry.remove(&task.collection);
        }
    }

    async fn run(&self, task: Task) {
        let state = self.execute(&task).await;
        self.release(&task);
        self.transition(&task, state);
    }

    async fn execute(&self, task: &Task) -> TaskState {
        let collection = task.collection;
        let task_id = task.id;

        tokio::select! {
            _ = task.cancel.cancelled() => return self.canceled(task, "scheduled"),
            _ = tokio::time::sleep(self.coalesce_delay) => {}
        }

        // Serialize runs per collection so a fresh read never races an earlier commit.
        let run_lock = Arc::clone(&self.run_locks[&collection]);
        let _running = tokio::select! {
            _ = task.cancel.cancelled() => return self.canceled(task, "scheduled"),
            guard = run_lock.lock_owned() => guard,
        };

        self.transition(task, TaskState::Running);
        tracing::debug!(
            collection = %collection,
            task_id,
            payload_bytes = task.payload.len(),
            "reconciliation started"
        );

        let strategy = self.strategies.get(&collection).cloned().unwrap_or_default();
        let reconciliation = tokio::select! {
            _ = task.cancel.cancelled() => return self.canceled(task, "running"),
            result = self.reconciler.reconcile(collection, &strategy) => result,
        };
        let reconciliation = match reconciliation {
            Ok(r) => r,
            Err(err) => return self.failed(task, &err),
        };

        if !reconciliation.changed {
            tracing::info!(collection = %collection, task_id, "collection already up to date");
            return TaskState::Completed;
        }

        if !self.claim(task) {
            return self.canceled(task, "running");
        }
        self.transition(task, TaskState::Committing);

        let ledger = self.reconciler.ledger();
        let records = &reconciliation.next_state;
        let result = retry_async(&self.retry, || ledger.commit(collection, records)).await;
        match result {
            Ok(outcome) => {
                tracing::info!(
                    collection = %collection,
                    task_id,
                    tx_hash = %outcome.tx_hash,
                    records = records.len(),
                    "committed collection"
                );
                TaskState::Completed
            }
            Err(source) => self.failed(task, &SyncError::Commit { collection, source }),
        }
    }

    fn canceled(&self, task: &Task, phase: &'static str) -> TaskState {
        tracing::debug!(
            collection = %task.collection,
            task_id = task.id,
            phase,
            "reconciliation canceled"
        );
        TaskState::Canceled
    }

    fn failed(&self, task: &Task, err: &SyncError) -> TaskState {
        tracing::error!(
            collection = %task.collection,
            task_id = task.id,
            error = %err,
            "reconciliation failed"
        );
        TaskState::Failed
    }
}
