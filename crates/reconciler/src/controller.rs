//! Controller loop: turns store notifications and poll ticks into passes.
//!
//! Passes for different records run in parallel on a bounded worker pool.
//! Passes for the same record never overlap: the work queue hands an id to
//! at most one worker, and an id that changes while its pass runs is queued
//! again once the pass finishes.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use silo_core::{ResourceId, ResultExt};
use silo_events::{Error as StoreError, EventKind, RecordStore, RecordWatch};

use crate::error::ReconcileError;
use crate::reconciler::Reconciler;

/// Default number of passes running at once.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Default interval between full resyncs.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Default upper bound on one pass.
pub const DEFAULT_PASS_TIMEOUT: Duration = Duration::from_secs(120);

/// Controller configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSettings {
    /// Maximum passes in flight.
    pub max_concurrency: usize,
    /// Every record is re-queued this often.
    pub poll_interval: Duration,
    /// A pass running longer is abandoned and counts as transient.
    pub pass_timeout: Option<Duration>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            poll_interval: DEFAULT_POLL_INTERVAL,
            pass_timeout: Some(DEFAULT_PASS_TIMEOUT),
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<ResourceId>,
    queued: HashSet<ResourceId>,
    processing: HashSet<ResourceId>,
    dirty: HashSet<ResourceId>,
    shutdown: bool,
}

/// A de-duplicating work queue of record ids.
#[derive(Debug, Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `id`. An id already waiting is not queued twice; an id being
    /// processed is queued again when its pass finishes.
    pub fn add(&self, id: ResourceId) {
        let mut state = self.state();
        if state.shutdown {
            return;
        }
        if state.processing.contains(&id) {
            state.dirty.insert(id);
            return;
        }
        if state.queued.insert(id.clone()) {
            state.pending.push_back(id);
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Wait for the next id. Returns `None` once the queue is shut down.
    ///
    /// The caller owns the id until it calls [`WorkQueue::done`].
    pub async fn next(&self) -> Option<ResourceId> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state();
                if state.shutdown {
                    return None;
                }
                if let Some(id) = state.pending.pop_front() {
                    state.queued.remove(&id);
                    state.processing.insert(id.clone());
                    let more = !state.pending.is_empty();
                    drop(state);
                    if more {
                        self.notify.notify_one();
                    }
                    return Some(id);
                }
            }

            notified.await;
        }
    }

    /// Release `id` after its pass.
    pub fn done(&self, id: &ResourceId) {
        let mut state = self.state();
        state.processing.remove(id);
        if state.dirty.remove(id) && !state.shutdown && state.queued.insert(id.clone()) {
            state.pending.push_back(id.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stop handing out ids and wake every waiting worker.
    pub fn shutdown(&self) {
        self.state().shutdown = true;
        self.notify.notify_waiters();
    }

    /// Ids waiting for a worker.
    pub fn len(&self) -> usize {
        self.state().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().pending.is_empty()
    }

    /// Ids currently being processed.
    pub fn in_flight(&self) -> usize {
        self.state().processing.len()
    }
}

/// Runs passes for every record in a store until cancelled.
pub struct Controller {
    reconciler: Reconciler,
    queue: Arc<WorkQueue>,
    settings: ControllerSettings,
}

impl Controller {
    pub fn new(reconciler: Reconciler, settings: ControllerSettings) -> Self {
        Self {
            reconciler,
            queue: Arc::new(WorkQueue::new()),
            settings,
        }
    }

    pub const fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    pub const fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Run workers, the watch forwarder and the poll ticker until `cancel`
    /// fires. Every task is joined before this returns.
    pub async fn run(&self, cancel: CancellationToken) {
        let store = self.reconciler.store().clone();
        // Subscribe before the first listing so no change falls in between.
        let watch = store.watch();
        resync(store.as_ref(), &self.queue).await;

        let workers = self.settings.max_concurrency.max(1);
        info!(
            workers,
            poll_interval_secs = self.settings.poll_interval.as_secs(),
            "Controller starting"
        );

        let mut tasks = JoinSet::new();
        for worker in 0..workers {
            tasks.spawn(work(
                worker,
                self.reconciler.clone(),
                self.queue.clone(),
                self.settings.pass_timeout,
                cancel.clone(),
            ));
        }
        tasks.spawn(forward(
            watch,
            store.clone(),
            self.queue.clone(),
            cancel.clone(),
        ));
        tasks.spawn(poll(
            store,
            self.queue.clone(),
            self.settings.poll_interval,
            cancel.clone(),
        ));

        cancel.cancelled().await;
        self.queue.shutdown();
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Controller task failed");
            }
        }
        info!("Controller stopped");
    }
}

/// Queue every record in the store.
async fn resync(store: &dyn RecordStore, queue: &WorkQueue) {
    let records = store
        .list()
        .await
        .or_default_logged(Vec::new(), "Cannot list records for resync");
    debug!(records = records.len(), "Resync");
    for record in records {
        queue.add(record.id);
    }
}

async fn work(
    worker: usize,
    reconciler: Reconciler,
    queue: Arc<WorkQueue>,
    pass_timeout: Option<Duration>,
    cancel: CancellationToken,
) {
    while let Some(id) = queue.next().await {
        let pass_cancel = cancel.child_token();
        let pass = reconciler.reconcile(&id, &pass_cancel);
        let result = match pass_timeout {
            Some(after) => match tokio::time::timeout(after, pass).await {
                Ok(result) => result,
                Err(_) => {
                    pass_cancel.cancel();
                    Err(ReconcileError::Timeout { after })
                }
            },
            None => pass.await,
        };

        match result {
            Ok(outcome) => debug!(worker, resource = %id, %outcome, "Pass complete"),
            Err(ReconcileError::Cancelled) => debug!(worker, resource = %id, "Pass abandoned"),
            Err(e) => debug!(worker, resource = %id, error = %e, "Pass will be retried"),
        }
        queue.done(&id);
    }
    debug!(worker, "Worker stopped");
}

async fn forward(
    mut watch: RecordWatch,
    store: Arc<dyn RecordStore>,
    queue: Arc<WorkQueue>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = watch.recv() => event,
        };
        match event {
            Ok(event) if event.kind == EventKind::Deleted => {
                debug!(resource = %event.id(), "Record erased");
            }
            Ok(event) => queue.add(event.record.id),
            Err(StoreError::Lagged { skipped }) => {
                warn!(skipped, "Record watch lagged, resyncing");
                resync(store.as_ref(), &queue).await;
            }
            Err(StoreError::ChannelClosed) => {
                info!("Record watch closed");
                break;
            }
            Err(e) => warn!(error = %e, "Record watch failed"),
        }
    }
}

async fn poll(
    store: Arc<dyn RecordStore>,
    queue: Arc<WorkQueue>,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately; `run` already resynced.
    ticker.tick().await;
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => resync(store.as_ref(), &queue).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> ResourceId {
        ResourceId::new(name)
    }

    #[tokio::test]
    async fn test_add_deduplicates_waiting_ids() {
        let queue = WorkQueue::new();
        queue.add(id("a"));
        queue.add(id("a"));
        queue.add(id("b"));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.next().await, Some(id("a")));
        assert_eq!(queue.next().await, Some(id("b")));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_id_in_flight_is_not_handed_out_twice() {
        let queue = WorkQueue::new();
        queue.add(id("a"));
        assert_eq!(queue.next().await, Some(id("a")));

        queue.add(id("a"));
        assert!(queue.is_empty());
        assert_eq!(queue.in_flight(), 1);

        queue.done(&id("a"));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next().await, Some(id("a")));
    }

    #[tokio::test]
    async fn test_done_without_changes_does_not_requeue() {
        let queue = WorkQueue::new();
        queue.add(id("a"));
        let _ = queue.next().await;
        queue.done(&id("a"));
        assert!(queue.is_empty());
        assert_eq!(queue.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_wakes_waiting_worker() {
        let queue = Arc::new(WorkQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await })
        };
        tokio::task::yield_now().await;
        queue.shutdown();

        let next = tokio::time::timeout(Duration::from_secs(5), waiter).await;
        assert!(matches!(next, Ok(Ok(None))));
    }

    #[tokio::test]
    async fn test_add_after_shutdown_is_ignored() {
        let queue = WorkQueue::new();
        queue.shutdown();
        queue.add(id("a"));
        assert!(queue.is_empty());
        assert_eq!(queue.next().await, None);
    }

    #[tokio::test]
    async fn test_waiting_worker_wakes_on_add() {
        let queue = Arc::new(WorkQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await })
        };
        tokio::task::yield_now().await;
        queue.add(id("a"));

        let next = tokio::time::timeout(Duration::from_secs(5), waiter).await;
        assert!(matches!(next, Ok(Ok(Some(ref got))) if *got == id("a")));
    }
}
