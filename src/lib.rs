//! # Fractile
//!
//! A parallel tile-compute scheduler with worker-local frame arenas.
//!
//! Fractile takes one large rectangular computation, splits it into a grid
//! of independent tiles, and fans the tiles out across a fixed pool of
//! worker threads. Each worker owns a reusable pixel buffer that survives
//! across requests, so steady-state rendering allocates nothing. Results
//! are composited onto a caller-provided surface either as they arrive or
//! batched into one refresh-aligned frame update.
//!
//! ## Architecture
//!
//! - [`queue::WorkQueue`]: the worker pool and FIFO task queue, with
//!   cooperative cancellation
//! - [`scheduler::TileScheduler`]: grid decomposition and compositing
//! - [`arena::FrameArena`]: the per-worker buffer lifecycle manager
//! - [`kernel::ComputeKernel`] / [`encode::BitmapEncoder`] /
//!   [`surface::RenderSurface`]: the seams callers plug into
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fractile::prelude::*;
//!
//! let queue = WorkQueue::spawn(Mandelbrot)?;
//! queue.ready().await;
//!
//! let scheduler = TileScheduler::new(16, 8);
//! let view = ViewWindow::reset(1280, 720);
//! let mut canvas = Canvas::new(1280, 720);
//!
//! scheduler.render(&queue, &view, 1280, 720, 100, &mut canvas).await?;
//! ```
//!
//! Superseding a render is cheap: call `cancel_pending()` (or
//! `cancel_all()`) and resubmit; the displaced render's future rejects
//! with [`Error::Cancelled`], which callers swallow.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod arena;
pub mod buffer;
pub mod clock;
pub mod encode;
pub mod error;
pub mod kernel;
pub mod queue;
pub mod scheduler;
pub mod surface;
pub mod tile;
pub mod view;
pub mod worker;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::buffer::TileBitmap;
    pub use crate::error::{Error, Result};
    pub use crate::kernel::{ComputeKernel, Mandelbrot};
    pub use crate::queue::{QueueConfig, WorkQueue};
    pub use crate::scheduler::TileScheduler;
    pub use crate::surface::{Canvas, RenderSurface};
    pub use crate::view::ViewWindow;
    pub use crate::worker::TileRequest;
}

pub use error::{Error, Result};
