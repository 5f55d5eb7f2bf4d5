//! Worker threads: the remote side of the task queue.
//!
//! Each worker is an OS thread owning a [`FrameArena`]. It announces
//! itself with a single `Ready` reply once local setup is complete, then
//! serves jobs one at a time: ensure a buffer, run the compute kernel in
//! place, snapshot the pixels, encode (retrying transient failures), and
//! reply with the bitmap. Workers never talk to each other, only to the
//! coordinator through their channels.

use crate::arena::FrameArena;
use crate::buffer::TileBitmap;
use crate::encode::BitmapEncoder;
use crate::error::{Error, Result};
use crate::kernel::ComputeKernel;
use crate::tile::TileRect;
use crate::view::ViewWindow;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

/// Identity of one worker in a pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WorkerId(pub(crate) usize);

impl WorkerId {
    /// The worker's index within its pool.
    pub fn index(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// The payload of one tile computation request.
#[derive(Clone, Debug)]
pub struct TileRequest {
    /// Pixel rectangle of the tile within the parent render.
    pub rect: TileRect,
    /// The tile's plane-space sub-window.
    pub window: ViewWindow,
    /// Iteration budget for the compute kernel.
    pub max_iter: u32,
}

/// Worker-side configuration.
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Delay between bitmap encode attempts. Retries are unbounded.
    pub encode_retry_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            encode_retry_delay: Duration::from_secs(1),
        }
    }
}

/// Inbound message: the request plus any buffers whose ownership moves to
/// the worker with the send.
pub(crate) struct TileJob {
    pub request: TileRequest,
    #[allow(dead_code)]
    pub transfer: Vec<Bytes>,
}

/// Outbound message, decoded at the channel boundary.
pub(crate) enum Reply {
    /// One-time initialization-complete signal, sent before any frame.
    Ready,
    /// A rendered tile.
    Frame(TileBitmap),
}

/// Coordinator-side handle to one worker.
pub(crate) struct WorkerHandle {
    jobs: kanal::Sender<TileJob>,
    _thread: std::thread::JoinHandle<()>,
}

impl WorkerHandle {
    /// Hand a job to the worker. Non-blocking: the job channel has room
    /// for exactly one outstanding job, and the queue only dispatches to
    /// idle workers.
    pub fn dispatch(&self, job: TileJob) -> Result<()> {
        match self.jobs.try_send(job) {
            Ok(true) => Ok(()),
            Ok(false) => Err(Error::Protocol(
                "dispatch to a worker that already holds a job".into(),
            )),
            Err(_) => Err(Error::Protocol("worker job channel closed".into())),
        }
    }
}

/// Spawn one worker thread.
pub(crate) fn spawn(
    id: WorkerId,
    kernel: Arc<dyn ComputeKernel>,
    encoder: Arc<dyn BitmapEncoder>,
    config: WorkerConfig,
    replies: kanal::Sender<(WorkerId, Reply)>,
) -> Result<WorkerHandle> {
    // Capacity 1: a worker never holds a second job while busy.
    let (tx, rx) = kanal::bounded::<TileJob>(1);
    let thread = std::thread::Builder::new()
        .name(format!("fractile-{id}"))
        .spawn(move || worker_main(id, rx, replies, kernel, encoder, config))?;
    Ok(WorkerHandle {
        jobs: tx,
        _thread: thread,
    })
}

fn worker_main(
    id: WorkerId,
    jobs: kanal::Receiver<TileJob>,
    replies: kanal::Sender<(WorkerId, Reply)>,
    kernel: Arc<dyn ComputeKernel>,
    encoder: Arc<dyn BitmapEncoder>,
    config: WorkerConfig,
) {
    let mut arena = FrameArena::new();

    tracing::debug!(%id, "worker initialized");
    if replies.send((id, Reply::Ready)).is_err() {
        // Queue already gone.
        return;
    }

    while let Ok(job) = jobs.recv() {
        let TileRequest {
            rect,
            window,
            max_iter,
        } = job.request;

        let slot = match arena.ensure(rect.width, rect.height) {
            Ok(slot) => slot,
            Err(e) => {
                // The task stays outstanding forever; same contract as a
                // hung worker.
                tracing::error!(%id, error = %e, "render buffer unavailable, dropping job");
                continue;
            }
        };

        kernel.compute(slot.pixels_mut(), rect.width, rect.height, &window, max_iter);

        // Copy before the encode step: the slot may be reshaped by the
        // next job while the bitmap is still in flight.
        let snapshot = slot.snapshot();

        let bitmap = loop {
            match encoder.encode(snapshot.clone(), rect.width, rect.height) {
                Ok(bitmap) => break bitmap,
                Err(e) => {
                    tracing::warn!(%id, error = %e, "bitmap encode failed, retrying");
                    std::thread::sleep(config.encode_retry_delay);
                }
            }
        };

        if replies.send((id, Reply::Frame(bitmap))).is_err() {
            return;
        }
    }

    tracing::debug!(%id, "worker shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::RgbaEncoder;
    use crate::kernel::Mandelbrot;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn request(w: u32, h: u32) -> TileRequest {
        TileRequest {
            rect: TileRect::new(0, 0, w, h),
            window: ViewWindow::reset(w, h),
            max_iter: 16,
        }
    }

    fn spawn_test_worker(
        encoder: Arc<dyn BitmapEncoder>,
        delay: Duration,
    ) -> (WorkerHandle, kanal::Receiver<(WorkerId, Reply)>) {
        let (reply_tx, reply_rx) = kanal::unbounded();
        let handle = spawn(
            WorkerId(0),
            Arc::new(Mandelbrot),
            encoder,
            WorkerConfig {
                encode_retry_delay: delay,
            },
            reply_tx,
        )
        .unwrap();
        (handle, reply_rx)
    }

    #[test]
    fn test_ready_precedes_frames() {
        let (handle, replies) = spawn_test_worker(Arc::new(RgbaEncoder), Duration::ZERO);

        let (id, first) = replies.recv().unwrap();
        assert_eq!(id, WorkerId(0));
        assert!(matches!(first, Reply::Ready));

        handle
            .dispatch(TileJob {
                request: request(8, 4),
                transfer: Vec::new(),
            })
            .unwrap();

        let (_, reply) = replies.recv().unwrap();
        match reply {
            Reply::Frame(bitmap) => {
                assert_eq!(bitmap.width(), 8);
                assert_eq!(bitmap.height(), 4);
            }
            Reply::Ready => panic!("second ready signal"),
        }
    }

    #[test]
    fn test_serves_jobs_sequentially() {
        let (handle, replies) = spawn_test_worker(Arc::new(RgbaEncoder), Duration::ZERO);
        let _ = replies.recv().unwrap(); // ready

        for (w, h) in [(8u32, 8u32), (4, 4), (16, 16)] {
            handle
                .dispatch(TileJob {
                    request: request(w, h),
                    transfer: Vec::new(),
                })
                .unwrap();
            match replies.recv().unwrap() {
                (_, Reply::Frame(bitmap)) => {
                    assert_eq!((bitmap.width(), bitmap.height()), (w, h));
                }
                _ => panic!("expected frame"),
            }
        }
    }

    #[test]
    fn test_encode_retries_until_success() {
        struct Flaky {
            failures_left: AtomicU32,
            inner: RgbaEncoder,
        }
        impl BitmapEncoder for Flaky {
            fn encode(&self, pixels: Bytes, width: u32, height: u32) -> Result<TileBitmap> {
                if self
                    .failures_left
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
                {
                    return Err(Error::EncodeFailed("transient".into()));
                }
                self.inner.encode(pixels, width, height)
            }
        }

        let encoder = Arc::new(Flaky {
            failures_left: AtomicU32::new(3),
            inner: RgbaEncoder,
        });
        let (handle, replies) = spawn_test_worker(encoder, Duration::from_millis(5));
        let _ = replies.recv().unwrap(); // ready

        handle
            .dispatch(TileJob {
                request: request(4, 4),
                transfer: Vec::new(),
            })
            .unwrap();

        match replies.recv().unwrap() {
            (_, Reply::Frame(bitmap)) => assert_eq!(bitmap.width(), 4),
            _ => panic!("expected frame after retries"),
        }
    }

    #[test]
    fn test_worker_exits_when_jobs_close() {
        let (handle, replies) = spawn_test_worker(Arc::new(RgbaEncoder), Duration::ZERO);
        let _ = replies.recv().unwrap(); // ready

        drop(handle);
        // Reply channel closes once the thread exits.
        assert!(replies.recv().is_err());
    }
}
