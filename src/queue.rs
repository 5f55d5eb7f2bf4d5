//! Task queue and worker pool.
//!
//! A [`WorkQueue`] owns a fixed-size pool of worker threads and matches
//! incoming tile requests to idle workers. Requests that arrive while
//! every worker is busy wait in a FIFO pending queue; completing (or
//! merely replying) workers immediately pick up the next pending request.
//!
//! # Dispatch algorithm
//!
//! Every reply from a worker drives the same step: settle the matching
//! task if one is recorded for that worker, then either hand the worker
//! the oldest pending task or return it to the idle set. The ready signal
//! is how a worker enters circulation in the first place, so the pool
//! becomes usable as soon as the first worker reports in.
//!
//! # Cancellation
//!
//! Cancellation is cooperative and non-preemptive. `cancel_pending`
//! settles queued tasks only; `cancel_all` additionally settles in-flight
//! tasks but does not interrupt the workers running them; their eventual
//! replies find no matching task and are silently dropped at the lookup.
//!
//! # Concurrency
//!
//! The idle set, busy map and pending queue form one state structure
//! guarded by one mutex, so a dispatch decision is never made on a stale
//! snapshot. Critical sections never block: worker sends are non-blocking
//! by the one-outstanding-job invariant, and settlements are one-shot
//! sends.

use crate::buffer::TileBitmap;
use crate::encode::{BitmapEncoder, RgbaEncoder};
use crate::error::{Error, Result};
use crate::kernel::ComputeKernel;
use crate::worker::{self, Reply, TileJob, TileRequest, WorkerConfig, WorkerHandle, WorkerId};
use bytes::Bytes;
use smallvec::SmallVec;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::{oneshot, watch};

/// Pool size used by default: at least two workers, more when the host
/// offers more parallelism.
pub fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(2)
}

/// Configuration for a [`WorkQueue`].
#[derive(Clone, Debug)]
pub struct QueueConfig {
    /// Number of workers to spawn. Clamped to at least 1.
    pub pool_size: usize,
    /// Per-worker configuration.
    pub worker: WorkerConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            worker: WorkerConfig::default(),
        }
    }
}

impl QueueConfig {
    /// Config with an explicit pool size and default worker settings.
    pub fn with_pool_size(pool_size: usize) -> Self {
        Self {
            pool_size,
            ..Self::default()
        }
    }
}

/// Counters describing queue state and history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Number of workers in the pool.
    pub pool_size: usize,
    /// Workers currently idle (ready and unassigned).
    pub idle: usize,
    /// Workers currently holding a task.
    pub busy: usize,
    /// Tasks waiting for an idle worker.
    pub pending: usize,
    /// Tasks ever submitted.
    pub submitted: u64,
    /// Tasks settled with a result.
    pub completed: u64,
    /// Tasks settled with `Cancelled`.
    pub cancelled: u64,
}

/// The caller's handle to one submitted task.
///
/// Resolves with the tile bitmap on success or `Error::Cancelled` if the
/// task was superseded. A task settles exactly once.
#[derive(Debug)]
pub struct TaskTicket {
    rx: oneshot::Receiver<Result<TileBitmap>>,
}

impl Future for TaskTicket {
    type Output = Result<TileBitmap>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|settled| match settled {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Protocol("task dropped without settlement".into())),
        })
    }
}

/// The settlement side of a task's future. Consuming it enforces the
/// settle-exactly-once rule at the type level: a stale reply for an
/// already-settled task has nothing left to resolve.
struct Settlement(oneshot::Sender<Result<TileBitmap>>);

impl Settlement {
    fn settle(self, outcome: Result<TileBitmap>) {
        if self.0.send(outcome).is_err() {
            tracing::trace!("task ticket dropped before settlement");
        }
    }
}

/// A task waiting in the pending queue: payload still attached.
struct PendingTask {
    job: TileJob,
    settlement: Settlement,
}

#[derive(Default)]
struct QueueState {
    /// Ready, unassigned workers, in the order they became free.
    idle: SmallVec<[WorkerId; 16]>,
    /// Worker -> settlement for its one in-flight task.
    busy: HashMap<WorkerId, Settlement>,
    /// FIFO: insertion order is dispatch order.
    pending: VecDeque<PendingTask>,
    submitted: u64,
    completed: u64,
    cancelled: u64,
}

struct Inner {
    workers: Vec<WorkerHandle>,
    state: Mutex<QueueState>,
    ready_rx: watch::Receiver<bool>,
}

/// A fixed-size pool of parallel workers with a FIFO task queue.
pub struct WorkQueue {
    inner: Arc<Inner>,
    pump: tokio::task::JoinHandle<()>,
}

impl WorkQueue {
    /// Spawn a pool with the default configuration and encoder.
    ///
    /// Must be called within a Tokio runtime: the queue runs a reply-pump
    /// task on it.
    pub fn spawn<K: ComputeKernel>(kernel: K) -> Result<Self> {
        Self::spawn_with_config(kernel, QueueConfig::default())
    }

    /// Spawn a pool with an explicit configuration.
    pub fn spawn_with_config<K: ComputeKernel>(kernel: K, config: QueueConfig) -> Result<Self> {
        Self::spawn_with_encoder(Arc::new(kernel), Arc::new(RgbaEncoder), config)
    }

    /// Spawn a pool with explicit kernel, encoder and configuration.
    pub fn spawn_with_encoder(
        kernel: Arc<dyn ComputeKernel>,
        encoder: Arc<dyn BitmapEncoder>,
        config: QueueConfig,
    ) -> Result<Self> {
        let pool_size = config.pool_size.max(1);
        let (reply_tx, reply_rx) = kanal::unbounded::<(WorkerId, Reply)>();

        // Reply routing is in place before any submission is accepted.
        let mut workers = Vec::with_capacity(pool_size);
        for index in 0..pool_size {
            workers.push(worker::spawn(
                WorkerId(index),
                kernel.clone(),
                encoder.clone(),
                config.worker.clone(),
                reply_tx.clone(),
            )?);
        }
        drop(reply_tx);

        let (ready_tx, ready_rx) = watch::channel(false);
        let inner = Arc::new(Inner {
            workers,
            state: Mutex::new(QueueState::default()),
            ready_rx,
        });

        let pump = tokio::spawn(pump_replies(inner.clone(), reply_rx, ready_tx));

        tracing::debug!(pool_size, "work queue spawned");
        Ok(Self { inner, pump })
    }

    /// Number of workers in the pool.
    pub fn pool_size(&self) -> usize {
        self.inner.workers.len()
    }

    /// Wait until the first worker has reported its readiness signal.
    ///
    /// The pool is usable as soon as one worker is live; the remaining
    /// workers join through the normal idle path. Later readiness signals
    /// do not re-trigger this future.
    pub async fn ready(&self) {
        let mut rx = self.inner.ready_rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Submit a tile request, moving ownership of `transfer` buffers into
    /// the channel.
    ///
    /// Dispatches immediately if an idle worker exists, otherwise appends
    /// to the pending queue. Never blocks.
    pub fn submit(&self, request: TileRequest, transfer: Vec<Bytes>) -> TaskTicket {
        let (tx, rx) = oneshot::channel();
        let task = PendingTask {
            job: TileJob { request, transfer },
            settlement: Settlement(tx),
        };

        let mut state = self.inner.state.lock().unwrap();
        state.submitted += 1;
        if state.idle.is_empty() {
            state.pending.push_back(task);
            tracing::trace!(pending = state.pending.len(), "all workers busy, task queued");
        } else {
            // Oldest-free worker first.
            let id = state.idle.remove(0);
            dispatch_locked(&self.inner, &mut state, id, task);
        }

        TaskTicket { rx }
    }

    /// Settle every pending task with `Cancelled` and empty the queue.
    /// In-flight tasks are unaffected.
    pub fn cancel_pending(&self) {
        let mut state = self.inner.state.lock().unwrap();
        cancel_pending_locked(&mut state);
    }

    /// Settle every pending and in-flight task with `Cancelled`.
    ///
    /// Workers are not interrupted: a worker still computing will emit its
    /// reply eventually, find no matching task, and the result is dropped.
    pub fn cancel_all(&self) {
        let mut state = self.inner.state.lock().unwrap();
        let state = &mut *state;
        cancel_pending_locked(state);
        let in_flight = state.busy.len();
        for (_, settlement) in state.busy.drain() {
            settlement.settle(Err(Error::Cancelled));
            state.cancelled += 1;
        }
        if in_flight > 0 {
            tracing::debug!(in_flight, "in-flight tasks cancelled, workers keep running");
        }
    }

    /// Current queue counters.
    pub fn stats(&self) -> QueueStats {
        let state = self.inner.state.lock().unwrap();
        QueueStats {
            pool_size: self.inner.workers.len(),
            idle: state.idle.len(),
            busy: state.busy.len(),
            pending: state.pending.len(),
            submitted: state.submitted,
            completed: state.completed,
            cancelled: state.cancelled,
        }
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        // The pump holds the worker handles through `Inner`; aborting it
        // lets the job channels close so worker threads exit.
        self.pump.abort();
    }
}

impl std::fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue")
            .field("pool_size", &self.inner.workers.len())
            .finish()
    }
}

fn cancel_pending_locked(state: &mut QueueState) {
    let count = state.pending.len();
    for task in state.pending.drain(..) {
        task.settlement.settle(Err(Error::Cancelled));
        state.cancelled += 1;
    }
    if count > 0 {
        tracing::debug!(count, "pending tasks cancelled");
    }
}

/// Send a task to a specific worker and record it as busy.
fn dispatch_locked(inner: &Inner, state: &mut QueueState, id: WorkerId, task: PendingTask) {
    let PendingTask { job, settlement } = task;
    match inner.workers[id.0].dispatch(job) {
        Ok(()) => {
            tracing::trace!(%id, "task dispatched");
            state.busy.insert(id, settlement);
        }
        Err(e) => {
            // A full or closed job channel breaks the one-job-per-worker
            // contract; surface it on the task instead of hiding it.
            tracing::error!(%id, error = %e, "dispatch failed");
            debug_assert!(false, "dispatch to unavailable worker {id}");
            settlement.settle(Err(e));
        }
    }
}

/// After any reply from `id`: hand the worker the oldest pending task, or
/// return it to the idle set.
fn next_for_worker_locked(inner: &Inner, state: &mut QueueState, id: WorkerId) {
    match state.pending.pop_front() {
        Some(task) => dispatch_locked(inner, state, id, task),
        None => state.idle.push(id),
    }
}

async fn pump_replies(
    inner: Arc<Inner>,
    replies: kanal::Receiver<(WorkerId, Reply)>,
    ready_tx: watch::Sender<bool>,
) {
    while let Ok((id, reply)) = replies.as_async().recv().await {
        match reply {
            Reply::Ready => {
                tracing::debug!(%id, "worker ready");
                // First signal settles `ready()`; repeats are no-ops.
                ready_tx.send_replace(true);
                let mut state = inner.state.lock().unwrap();
                next_for_worker_locked(&inner, &mut state, id);
            }
            Reply::Frame(bitmap) => {
                let mut state = inner.state.lock().unwrap();
                match state.busy.remove(&id) {
                    Some(settlement) => {
                        state.completed += 1;
                        settlement.settle(Ok(bitmap));
                    }
                    None => {
                        // Cancelled while in flight; drop the stale result
                        // at the point of matching.
                        tracing::debug!(%id, "stale result dropped");
                    }
                }
                next_for_worker_locked(&inner, &mut state, id);
            }
        }
    }
    tracing::debug!("reply channel closed, queue pump exiting");
}
