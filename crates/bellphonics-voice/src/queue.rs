//! Ordered, fire-and-forget delivery of accepted events.
//!
//! Jobs go into an unbounded FIFO channel and a single worker task speaks
//! them one at a time, since the audio device cannot render two utterances
//! at once. The queue has no depth limit: an overwhelmed backend shows up as
//! growing latency-to-speak, never as a rejected request.
//!
//! # Stopping
//!
//! [`DeliveryQueue::stop`] lets the job currently being spoken finish, then
//! halts the worker. Jobs still waiting at that point are cancelled and their
//! count is logged; they are never spoken twice or partially. `start` is
//! refused while a stop is in progress, so the drain always completes.

use crate::capability::SpeechCapability;
use bellphonics_types::SpeechEvent;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// One accepted event waiting to be spoken.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub event: SpeechEvent,
    pub enqueued_at: Instant,
}

impl QueuedJob {
    fn new(event: SpeechEvent) -> Self {
        Self {
            event,
            enqueued_at: Instant::now(),
        }
    }
}

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<QueuedJob>>>;

#[derive(Debug)]
struct Worker {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct WorkerSlot {
    worker: Option<Worker>,
    /// `stop` calls that have not finished draining yet.
    stopping: usize,
}

/// Ends one in-progress stop, even if the `stop` future is dropped early.
struct StoppingGuard<'a>(&'a DeliveryQueue);

impl Drop for StoppingGuard<'_> {
    fn drop(&mut self) {
        let mut slot = self.0.lock_worker();
        slot.stopping = slot.stopping.saturating_sub(1);
    }
}

/// FIFO buffer plus the background worker that drains it.
#[derive(Debug)]
pub struct DeliveryQueue {
    capability: Arc<dyn SpeechCapability>,
    tx: mpsc::UnboundedSender<QueuedJob>,
    rx: SharedReceiver,
    pending: Arc<AtomicUsize>,
    worker: Mutex<WorkerSlot>,
}

impl DeliveryQueue {
    pub fn new(capability: Arc<dyn SpeechCapability>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            capability,
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
            pending: Arc::new(AtomicUsize::new(0)),
            worker: Mutex::new(WorkerSlot::default()),
        }
    }

    /// Appends `event` to the queue. Never blocks and never fails.
    pub fn enqueue(&self, event: SpeechEvent) {
        let event_id = event.event_id.clone();
        self.pending.fetch_add(1, Ordering::SeqCst);
        // The receiver lives as long as `self`, so sending cannot fail.
        if self.tx.send(QueuedJob::new(event)).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            tracing::error!(event_id = %event_id, "speech queue receiver closed, job dropped");
            return;
        }
        tracing::debug!(event_id = %event_id, pending = self.pending(), "job enqueued");
    }

    /// Jobs accepted but not yet picked up by the worker.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.lock_worker()
            .worker
            .as_ref()
            .is_some_and(|worker| !worker.task.is_finished())
    }

    /// Whether a `stop` call is still waiting for the worker or draining.
    pub fn is_stopping(&self) -> bool {
        self.lock_worker().stopping > 0
    }

    /// Spawns the worker unless one is already running.
    ///
    /// Returns whether a worker is running afterwards; `false` means a stop
    /// is in progress and the call was ignored. Must be called from within a
    /// Tokio runtime.
    pub fn start(&self) -> bool {
        let mut slot = self.lock_worker();
        if slot.stopping > 0 {
            tracing::warn!("speech queue is stopping, start ignored");
            return false;
        }
        if slot
            .worker
            .as_ref()
            .is_some_and(|worker| !worker.task.is_finished())
        {
            return true;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_worker(
            self.rx.clone(),
            self.capability.clone(),
            self.pending.clone(),
            stop_rx,
        ));
        slot.worker = Some(Worker { stop_tx, task });
        true
    }

    /// Stops the worker after its current job and cancels the backlog.
    ///
    /// Returns the number of cancelled jobs. Calling `stop` on a queue that
    /// is not running only cancels the backlog.
    pub async fn stop(&self) -> usize {
        let worker = {
            let mut slot = self.lock_worker();
            slot.stopping += 1;
            slot.worker.take()
        };
        let _stopping = StoppingGuard(self);

        if let Some(worker) = worker {
            let _ = worker.stop_tx.send(true);
            if let Err(e) = worker.task.await {
                tracing::error!(error = %e, "speech worker task failed");
            }
        }

        let cancelled = {
            let mut rx = self.rx.lock().await;
            let mut cancelled = 0;
            while rx.try_recv().is_ok() {
                cancelled += 1;
            }
            cancelled
        };
        self.pending.fetch_sub(cancelled, Ordering::SeqCst);

        if cancelled > 0 {
            tracing::warn!(cancelled, "speech queue stopped with jobs outstanding");
        }
        cancelled
    }

    fn lock_worker(&self) -> MutexGuard<'_, WorkerSlot> {
        self.worker.lock().unwrap_or_else(|poisoned| {
            tracing::error!("speech worker lock poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

async fn run_worker(
    rx: SharedReceiver,
    capability: Arc<dyn SpeechCapability>,
    pending: Arc<AtomicUsize>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut rx = rx.lock().await;
    tracing::info!("speech worker started");

    loop {
        let job = tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };
        pending.fetch_sub(1, Ordering::SeqCst);

        // Delivery runs outside the select so a stop request cannot cut an
        // utterance short.
        deliver(capability.as_ref(), job).await;
    }

    tracing::info!("speech worker stopped");
}

async fn deliver(capability: &dyn SpeechCapability, job: QueuedJob) {
    let event = &job.event;
    tracing::info!(
        event_id = %event.event_id,
        severity = %event.severity,
        room = event.room.as_deref(),
        waited_ms = job.enqueued_at.elapsed().as_millis() as u64,
        "speaking event"
    );

    let outcome = AssertUnwindSafe(capability.speak(
        &event.text,
        event.voice.as_deref(),
        event.volume,
    ))
    .catch_unwind()
    .await;

    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::error!(event_id = %event.event_id, error = %e, "speech backend failed");
        }
        Err(_) => {
            tracing::error!(event_id = %event.event_id, "speech backend panicked");
        }
    }
}
