//! End-to-end render tests: scheduler, queue, workers and surface
//! working together.

use fractile::buffer::TileBitmap;
use fractile::clock::FrameClock;
use fractile::kernel::{ComputeKernel, Mandelbrot};
use fractile::prelude::*;
use fractile::queue::QueueConfig;
use fractile::scheduler::TileScheduler;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn init_logging() {
    static ONCE: AtomicBool = AtomicBool::new(false);
    if !ONCE.swap(true, Ordering::SeqCst) {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }
}

fn fast_clock() -> FrameClock {
    FrameClock::new(Duration::from_millis(1))
}

#[tokio::test]
async fn test_full_render_in_both_modes() {
    init_logging();
    let queue = WorkQueue::spawn_with_config(Mandelbrot, QueueConfig::with_pool_size(3)).unwrap();
    queue.ready().await;
    let view = ViewWindow::reset(96, 64);

    for vsync in [false, true] {
        let scheduler = TileScheduler::new(6, 4).with_vsync(vsync).with_clock(fast_clock());
        let mut canvas = Canvas::new(96, 64);
        scheduler
            .render(&queue, &view, 96, 64, 64, &mut canvas)
            .await
            .unwrap();
        assert!(
            canvas.pixels().chunks_exact(4).all(|p| p[3] == 255),
            "hole in composited frame (vsync={vsync})"
        );
    }
}

#[tokio::test]
async fn test_modes_produce_identical_frames() {
    init_logging();
    let queue = WorkQueue::spawn_with_config(Mandelbrot, QueueConfig::with_pool_size(2)).unwrap();
    let view = ViewWindow::reset(40, 30);

    let mut batched = Canvas::new(40, 30);
    TileScheduler::new(4, 3)
        .with_clock(fast_clock())
        .render(&queue, &view, 40, 30, 48, &mut batched)
        .await
        .unwrap();

    let mut immediate = Canvas::new(40, 30);
    TileScheduler::new(4, 3)
        .with_vsync(false)
        .render(&queue, &view, 40, 30, 48, &mut immediate)
        .await
        .unwrap();

    // Completion order differs; the composited result must not.
    assert_eq!(batched.pixels(), immediate.pixels());
}

#[tokio::test]
async fn test_repeat_render_after_arena_churn_is_deterministic() {
    init_logging();
    let queue = WorkQueue::spawn_with_config(Mandelbrot, QueueConfig::with_pool_size(2)).unwrap();
    let view = ViewWindow::reset(40, 30);

    let mut first = Canvas::new(40, 30);
    TileScheduler::new(4, 3)
        .with_vsync(false)
        .render(&queue, &view, 40, 30, 48, &mut first)
        .await
        .unwrap();

    // A render with much larger tiles forces every worker arena through
    // its release-and-reallocate path before the second pass.
    let mut churn = Canvas::new(40, 30);
    TileScheduler::new(2, 1)
        .with_vsync(false)
        .render(&queue, &view, 40, 30, 48, &mut churn)
        .await
        .unwrap();

    let mut second = Canvas::new(40, 30);
    TileScheduler::new(4, 3)
        .with_vsync(false)
        .render(&queue, &view, 40, 30, 48, &mut second)
        .await
        .unwrap();

    // Buffer reuse and reshaping must never leak state between frames.
    assert_eq!(first.pixels(), second.pixels());
}

/// Kernel that blocks until the test releases permits, for exercising
/// cancellation mid-render.
struct GatedKernel {
    gate: Arc<Mutex<mpsc::Receiver<()>>>,
}

impl ComputeKernel for GatedKernel {
    fn compute(&self, pixels: &mut [u8], _w: u32, _h: u32, _window: &ViewWindow, _iter: u32) {
        let gate = self.gate.lock().unwrap();
        let _ = gate.recv();
        for p in pixels.chunks_exact_mut(4) {
            p[3] = 255;
        }
    }
}

/// Surface that counts draw calls.
struct CountingSurface {
    draws: usize,
}

impl RenderSurface for CountingSurface {
    fn width(&self) -> u32 {
        64
    }
    fn height(&self) -> u32 {
        64
    }
    fn draw_bitmap(&mut self, _bitmap: &TileBitmap, _x: u32, _y: u32) {
        self.draws += 1;
    }
}

#[tokio::test]
async fn test_superseded_render_rejects_with_cancelled() {
    init_logging();
    let (permit_tx, permit_rx) = mpsc::channel();
    let kernel = GatedKernel {
        gate: Arc::new(Mutex::new(permit_rx)),
    };
    let queue = Arc::new(
        WorkQueue::spawn_with_config(kernel, QueueConfig::with_pool_size(2)).unwrap(),
    );
    queue.ready().await;

    let render_queue = queue.clone();
    let render = tokio::spawn(async move {
        let scheduler = TileScheduler::new(2, 2).with_clock(fast_clock());
        let mut surface = CountingSurface { draws: 0 };
        let outcome = scheduler
            .render(&render_queue, &ViewWindow::reset(64, 64), 64, 64, 32, &mut surface)
            .await;
        (outcome, surface.draws)
    });

    // Wait until the pool is saturated, then supersede everything.
    tokio::time::timeout(Duration::from_secs(5), async {
        while queue.stats().busy < 2 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap();
    queue.cancel_all();

    let (outcome, draws) = render.await.unwrap();
    assert!(matches!(outcome, Err(Error::Cancelled)));
    // Vsync mode: a superseded frame never reaches the surface.
    assert_eq!(draws, 0);

    // Unblock the workers still grinding on cancelled tiles.
    for _ in 0..2 {
        let _ = permit_tx.send(());
    }
}

#[tokio::test]
async fn test_supersede_and_resubmit() {
    init_logging();
    let queue = WorkQueue::spawn_with_config(Mandelbrot, QueueConfig::with_pool_size(2)).unwrap();
    queue.ready().await;
    let scheduler = TileScheduler::new(4, 4).with_vsync(false);
    let view = ViewWindow::reset(32, 32);

    // The interactive pattern: drop what hasn't started, render anew.
    queue.cancel_pending();
    let mut canvas = Canvas::new(32, 32);
    let zoomed = view.zoom_at(16.0, 16.0, 0.75);
    scheduler
        .render(&queue, &zoomed, 32, 32, 32, &mut canvas)
        .await
        .unwrap();
    assert!(canvas.pixels().chunks_exact(4).all(|p| p[3] == 255));
}
