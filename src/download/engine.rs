//! Download engine: queue ownership, the single worker task, and the
//! caller-facing control surface.
//!
//! The engine owns the [`SchedulingQueue`] and one worker that repeatedly
//! pops the highest-priority record and hands it to the
//! [`TransferExecutor`]. Control operations (`add`/`pause`/`resume`/
//! `cancel`/`pause_all`/`requeue_all`) may be called from any task
//! concurrently with the worker; intents aimed at the in-flight record are
//! delivered cooperatively through the [`ControlTable`] and take effect at
//! the next chunk boundary.
//!
//! At most one record is ever `InProgress` — this is deliberately a
//! single-concurrent-transfer model, not a worker pool.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::config::EngineConfig;
use super::control::{ControlSignal, ControlTable};
use super::listener::DownloadStatusListener;
use super::transfer::{TransferExecutor, TransferOutcome};
use crate::queue::SchedulingQueue;
use crate::record::{DownloadRecord, DownloadState, Priority};
use crate::store::{RecordStore, StoreError};

/// Errors from engine control operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Persistent store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The id names no known record.
    #[error("no record with id {0}")]
    RecordNotFound(String),
}

struct EngineInner {
    queue: SchedulingQueue,
    store: RecordStore,
    control: ControlTable,
    executor: TransferExecutor,
    /// Connectivity signal pushed by the host; gates wifi-only records on
    /// `add`/`resume`.
    preferred_network: AtomicBool,
    /// Set by `release()`; the worker checks it and never respawns after.
    quit: AtomicBool,
    /// Wakes the worker out of queue waits and in-flight transfers on
    /// `release()`.
    shutdown: Notify,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Resumable, queued download engine.
///
/// Cheap to clone; all clones share the same queue, worker and store.
#[derive(Clone)]
pub struct DownloadEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for DownloadEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadEngine").finish_non_exhaustive()
    }
}

impl DownloadEngine {
    /// Creates an engine over the given store, reporting to `listener`.
    ///
    /// The worker is started lazily by the first `add`/`resume`/`reload`.
    /// The connectivity signal starts as available; hosts push updates via
    /// [`set_preferred_network_available`](Self::set_preferred_network_available).
    #[must_use]
    pub fn new(
        store: RecordStore,
        listener: Arc<dyn DownloadStatusListener>,
        config: &EngineConfig,
    ) -> Self {
        let executor = TransferExecutor::new(config, store.clone(), listener);
        Self {
            inner: Arc::new(EngineInner {
                queue: SchedulingQueue::new(),
                store,
                control: ControlTable::new(),
                executor,
                preferred_network: AtomicBool::new(true),
                quit: AtomicBool::new(false),
                shutdown: Notify::new(),
                worker: Mutex::new(None),
            }),
        }
    }

    /// Accepts a new download request.
    ///
    /// No-op if the id is already queued or in-flight. The record is
    /// persisted as `Queued`; a wifi-only record is kept out of the queue
    /// while the preferred network is unavailable and picked up again by
    /// [`reload`](Self::reload). Ensures the worker is running.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if persisting the record fails.
    #[instrument(skip(self, record), fields(id = %record.id))]
    pub async fn add(&self, record: DownloadRecord) -> Result<(), EngineError> {
        if self.inner.queue.contains(&record.id).await
            || self.inner.control.is_current(&record.id).await
        {
            debug!("add skipped, id already managed");
            return Ok(());
        }

        let mut record = record;
        record.set_state(DownloadState::Queued);
        record.set_priority(Priority::Normal);
        self.inner.store.insert_or_update(&record).await?;

        if record.wifi_only && !self.preferred_network_available() {
            info!("wifi-only record deferred, preferred network unavailable");
            return Ok(());
        }

        self.inner.queue.enqueue(record).await;
        self.ensure_worker().await;
        Ok(())
    }

    /// Pauses the in-flight transfer if `id` is the one running.
    ///
    /// Pause targets only the active transfer; a queued-only id is left
    /// untouched (use [`pause_all`](Self::pause_all) to park the queue).
    /// Takes effect at the next chunk boundary.
    #[instrument(skip(self))]
    pub async fn pause(&self, id: &str) {
        if self.inner.control.is_current(id).await {
            self.inner.control.signal(id, ControlSignal::Pause).await;
        } else {
            debug!("pause ignored, id not in flight");
        }
    }

    /// Resumes a record.
    ///
    /// A queued copy is promoted to the front and the in-flight transfer
    /// (if any) is signalled to pause, so the promoted record runs next.
    /// A record absent from the queue is re-enqueued from the store at
    /// `Normal` priority.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::RecordNotFound`] if the id names no stored
    /// record, or [`EngineError::Store`] on store failure.
    #[instrument(skip(self))]
    pub async fn resume(&self, id: &str) -> Result<(), EngineError> {
        if self.inner.queue.promote(id).await {
            if let Some(current) = self.inner.control.current().await {
                self.inner
                    .control
                    .signal(&current, ControlSignal::Pause)
                    .await;
            }
            self.ensure_worker().await;
            return Ok(());
        }

        if self.inner.control.is_current(id).await {
            debug!("resume ignored, id already in flight");
            return Ok(());
        }

        let Some(mut record) = self.inner.store.find_by_id(id).await? else {
            return Err(EngineError::RecordNotFound(id.to_string()));
        };
        record.set_state(DownloadState::Queued);
        record.set_priority(Priority::Normal);
        self.inner.store.insert_or_update(&record).await?;

        if record.wifi_only && !self.preferred_network_available() {
            info!("wifi-only record deferred, preferred network unavailable");
            return Ok(());
        }

        self.inner.queue.enqueue(record).await;
        self.ensure_worker().await;
        Ok(())
    }

    /// Cancels a record: the destination file and the stored record are
    /// removed.
    ///
    /// An in-flight id is signalled and cleaned up by the executor at the
    /// next chunk boundary; a queued or parked id is cleaned up immediately
    /// without touching the network.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::RecordNotFound`] if the id names no record,
    /// or [`EngineError::Store`] on store failure.
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: &str) -> Result<(), EngineError> {
        if self.inner.control.is_current(id).await {
            self.inner.control.signal(id, ControlSignal::Cancel).await;
            return Ok(());
        }

        let destination_path = if let Some(record) = self.inner.queue.remove_by_id(id).await {
            record.destination_path
        } else if let Some(record) = self.inner.store.find_by_id(id).await? {
            record.destination_path
        } else {
            return Err(EngineError::RecordNotFound(id.to_string()));
        };

        if let Err(error) = tokio::fs::remove_file(&destination_path).await
            && error.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %destination_path, error = %error, "failed to delete destination");
        }
        self.inner.store.delete(id).await?;
        info!("cancelled");
        Ok(())
    }

    /// Pauses everything: drains the queue, marks each drained record
    /// `Paused` in the store, and signals the in-flight transfer to pause.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if persisting a drained record failed.
    /// Every drained record is attempted even when an earlier one errors,
    /// since a drained record left behind is only recoverable via `reload`.
    #[instrument(skip(self))]
    pub async fn pause_all(&self) -> Result<(), EngineError> {
        let drained = self.inner.queue.clear().await;
        let mut first_error = None;
        for record in &drained {
            if let Err(error) = self
                .inner
                .store
                .set_state(&record.id, DownloadState::Paused)
                .await
            {
                warn!(id = %record.id, error = %error, "failed to mark drained record paused");
                first_error.get_or_insert(error);
            }
        }
        info!(parked = drained.len(), "queue paused");

        if let Some(current) = self.inner.control.current().await {
            self.inner
                .control
                .signal(&current, ControlSignal::Pause)
                .await;
        }
        match first_error {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }

    /// Returns every managed record to the `Queued` state: drains the queue
    /// (drained records are already persisted as `Queued`) and signals the
    /// in-flight transfer to stop with its progress kept.
    ///
    /// Used when the host is being torn down so no record is silently lost;
    /// [`reload`](Self::reload) restores them on the next start.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if persisting a drained record failed.
    /// Every drained record is attempted even when an earlier one errors.
    #[instrument(skip(self))]
    pub async fn requeue_all(&self) -> Result<(), EngineError> {
        let drained = self.inner.queue.clear().await;
        let mut first_error = None;
        for record in &drained {
            if let Err(error) = self
                .inner
                .store
                .set_state(&record.id, DownloadState::Queued)
                .await
            {
                warn!(id = %record.id, error = %error, "failed to mark drained record queued");
                first_error.get_or_insert(error);
            }
        }
        info!(requeued = drained.len(), "queue drained for requeue");

        if let Some(current) = self.inner.control.current().await {
            self.inner
                .control
                .signal(&current, ControlSignal::Requeue)
                .await;
        }
        match first_error {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }

    /// Startup/crash recovery: any record left `InProgress` by a previous
    /// session becomes `Queued` (resumable, never complete), then every
    /// `Queued` record re-enters the scheduling queue, wifi gating applied.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] on store failure.
    #[instrument(skip(self))]
    pub async fn reload(&self) -> Result<(), EngineError> {
        let reset = self.inner.store.reset_in_progress().await?;
        if reset > 0 {
            info!(reset, "reset in-progress leftovers to queued");
        }

        let pending = self
            .inner
            .store
            .find_all_by_state_in(&[DownloadState::Queued])
            .await?;
        let mut enqueued = 0usize;
        for mut record in pending {
            if self.inner.queue.contains(&record.id).await
                || self.inner.control.is_current(&record.id).await
            {
                continue;
            }
            if record.wifi_only && !self.preferred_network_available() {
                continue;
            }
            record.set_priority(Priority::Normal);
            if self.inner.queue.enqueue(record).await {
                enqueued += 1;
            }
        }
        info!(enqueued, "reloaded queue from store");

        if enqueued > 0 {
            self.ensure_worker().await;
        }
        Ok(())
    }

    /// Stops the worker promptly, requeueing the in-flight record with its
    /// progress kept. The engine does not restart after release.
    #[instrument(skip(self))]
    pub async fn release(&self) {
        self.inner.quit.store(true, Ordering::SeqCst);
        // notify_one stores a permit, so a shutdown landing before the single
        // worker registers its wait is not lost.
        self.inner.shutdown.notify_one();

        let handle = self.inner.worker.lock().await.take();
        if let Some(handle) = handle
            && let Err(error) = handle.await
        {
            warn!(error = %error, "worker task panicked");
        }
    }

    /// Pushes the host's connectivity signal. Read by `add`/`resume`/
    /// `reload` when gating wifi-only records; the engine performs no
    /// network detection of its own.
    pub fn set_preferred_network_available(&self, available: bool) {
        self.inner
            .preferred_network
            .store(available, Ordering::SeqCst);
    }

    /// Whether the preferred network is currently available.
    #[must_use]
    pub fn preferred_network_available(&self) -> bool {
        self.inner.preferred_network.load(Ordering::SeqCst)
    }

    /// Id of the record currently owned by the transfer executor, if any.
    pub async fn current_download_id(&self) -> Option<String> {
        self.inner.control.current().await
    }

    /// Whether the scheduling queue is empty.
    pub async fn is_queue_empty(&self) -> bool {
        self.inner.queue.is_empty().await
    }

    /// Spawns the worker task if it is not already running.
    async fn ensure_worker(&self) {
        let mut guard = self.inner.worker.lock().await;
        let running = guard.as_ref().is_some_and(|handle| !handle.is_finished());
        if running || self.inner.quit.load(Ordering::SeqCst) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        *guard = Some(tokio::spawn(worker_loop(inner)));
    }
}

/// The single worker: pops the next record and runs it through the
/// executor, one transfer at a time, until released.
async fn worker_loop(inner: Arc<EngineInner>) {
    info!("download worker started");
    loop {
        if inner.quit.load(Ordering::SeqCst) {
            break;
        }

        let popped = tokio::select! {
            () = inner.shutdown.notified() => break,
            record = inner.queue.pop() => record,
        };
        let id = popped.id.clone();
        inner.control.set_current(Some(id.clone())).await;

        // The stored copy is authoritative; the queued copy may carry stale
        // byte counters from before a pause.
        let mut record = match inner.store.find_by_id(&id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(id, "record vanished before transfer, skipping");
                inner.control.clear(&id).await;
                inner.control.set_current(None).await;
                continue;
            }
            Err(error) => {
                warn!(id, error = %error, "failed to load record, using queued copy");
                popped
            }
        };

        if let Err(error) = inner
            .store
            .update_progress(&id, record.downloaded_bytes, DownloadState::InProgress)
            .await
        {
            warn!(id, error = %error, "failed to mark record in progress");
        }
        record.set_state(DownloadState::InProgress);
        debug!(id, "transfer starting");

        let interrupted = tokio::select! {
            () = inner.shutdown.notified() => true,
            outcome = inner.executor.run(&mut record, &inner.control) => {
                match outcome {
                    TransferOutcome::Completed => debug!(id, "worker observed completion"),
                    TransferOutcome::Paused => debug!(id, "worker observed pause"),
                    TransferOutcome::Requeued => debug!(id, "worker observed requeue"),
                    TransferOutcome::Cancelled => debug!(id, "worker observed cancel"),
                    TransferOutcome::Failed(error) => {
                        debug!(id, code = error.code(), "worker observed failure");
                    }
                }
                false
            }
        };

        inner.control.clear(&id).await;
        inner.control.set_current(None).await;

        if interrupted {
            // Shutdown mid-transfer: the record stays resumable. Bytes are
            // already persisted per chunk, only the state needs fixing.
            if let Err(error) = inner.store.set_state(&id, DownloadState::Queued).await {
                warn!(id, error = %error, "failed to requeue record on shutdown");
            }
            break;
        }
    }
    info!("download worker stopped");
}
