//! Tile scheduler: fans one large render across the worker pool.
//!
//! The scheduler decomposes a `width * height` request into a grid of
//! tiles, submits one task per tile, and composites the returned bitmaps
//! onto the target surface. Two compositing modes:
//!
//! - **Immediate** (`vsync` off): each bitmap is drawn the moment its
//!   tile resolves, in completion order. The frame builds up visibly.
//! - **Vsync** (`vsync` on, the default): composites are deferred until
//!   every tile has resolved, then replayed on the next frame-clock
//!   boundary in tile-submission order, as one atomic update. Each bitmap
//!   is dropped as soon as it is drawn.
//!
//! The scheduler holds no state beyond its grid dimensions, the vsync
//! flag and the frame clock.

use crate::buffer::TileBitmap;
use crate::clock::FrameClock;
use crate::error::Result;
use crate::queue::{TaskTicket, WorkQueue};
use crate::surface::RenderSurface;
use crate::tile::{TileGrid, TileRect};
use crate::view::{self, ViewWindow};
use crate::worker::TileRequest;
use futures::future;
use futures::stream::{FuturesUnordered, StreamExt};

/// Fans tiled renders out across a [`WorkQueue`].
#[derive(Debug, Clone)]
pub struct TileScheduler {
    cols: u32,
    rows: u32,
    vsync: bool,
    clock: FrameClock,
}

impl TileScheduler {
    /// Create a scheduler splitting renders into `cols * rows` tiles,
    /// with vsync compositing enabled.
    ///
    /// # Panics
    ///
    /// Panics if `cols` or `rows` is zero.
    pub fn new(cols: u32, rows: u32) -> Self {
        assert!(cols >= 1 && rows >= 1, "grid must have at least one tile");
        Self {
            cols,
            rows,
            vsync: true,
            clock: FrameClock::default(),
        }
    }

    /// Set the compositing mode.
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Replace the frame clock used in vsync mode.
    pub fn with_clock(mut self, clock: FrameClock) -> Self {
        self.clock = clock;
        self
    }

    /// Number of columns.
    pub fn cols(&self) -> u32 {
        self.cols
    }

    /// Number of rows.
    pub fn rows(&self) -> u32 {
        self.rows
    }

    /// Whether composites are batched to the frame clock.
    pub fn vsync(&self) -> bool {
        self.vsync
    }

    /// Render `view` over a `width * height` region onto `surface`.
    ///
    /// Submits one task per non-empty tile, carrying the tile's pixel
    /// rectangle and its plane-space sub-window. Resolves once the whole
    /// region is rendered.
    ///
    /// # Errors
    ///
    /// Rejects with `Error::Cancelled` if any tile task was superseded;
    /// callers that triggered the supersession are expected to swallow it.
    pub async fn render<S: RenderSurface + ?Sized>(
        &self,
        queue: &WorkQueue,
        view: &ViewWindow,
        width: u32,
        height: u32,
        max_iter: u32,
        surface: &mut S,
    ) -> Result<()> {
        let max_iter = view::clamp_iterations(max_iter);
        let grid = TileGrid::new(width, height, self.cols, self.rows);

        let mut tickets: Vec<(TileRect, TaskTicket)> = Vec::with_capacity(grid.len());
        for rect in grid.tiles() {
            if rect.is_empty() {
                continue;
            }
            let request = TileRequest {
                rect,
                window: view.tile_window(rect.x, rect.y),
                max_iter,
            };
            tickets.push((rect, queue.submit(request, Vec::new())));
        }

        tracing::debug!(
            tiles = tickets.len(),
            width,
            height,
            vsync = self.vsync,
            "tiled render started"
        );

        if self.vsync {
            self.render_batched(tickets, surface).await
        } else {
            Self::render_immediate(tickets, surface).await
        }
    }

    /// Draw each tile as soon as it resolves, in completion order.
    ///
    /// Already-resolved tiles still land on the surface when another tile
    /// is cancelled; the first error is reported once every tile has
    /// settled.
    async fn render_immediate<S: RenderSurface + ?Sized>(
        tickets: Vec<(TileRect, TaskTicket)>,
        surface: &mut S,
    ) -> Result<()> {
        let mut resolving: FuturesUnordered<_> = tickets
            .into_iter()
            .map(|(rect, ticket)| async move { (rect, ticket.await) })
            .collect();

        let mut first_error = None;
        while let Some((rect, outcome)) = resolving.next().await {
            match outcome {
                Ok(bitmap) => {
                    surface.draw_bitmap(&bitmap, rect.x, rect.y);
                    // Bitmap dropped here; no reference outlives the draw.
                }
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Join all tiles, then replay every composite on the next frame
    /// boundary in tile-submission order.
    ///
    /// If any tile fails, nothing is drawn: the deferred composites are
    /// discarded along with their bitmaps.
    async fn render_batched<S: RenderSurface + ?Sized>(
        &self,
        tickets: Vec<(TileRect, TaskTicket)>,
        surface: &mut S,
    ) -> Result<()> {
        let (rects, pending): (Vec<TileRect>, Vec<TaskTicket>) = tickets.into_iter().unzip();
        let outcomes = future::join_all(pending).await;

        let mut deferred: Vec<(TileRect, TileBitmap)> = Vec::with_capacity(rects.len());
        for (rect, outcome) in rects.into_iter().zip(outcomes) {
            deferred.push((rect, outcome?));
        }

        self.clock.wait_refresh().await;
        for (rect, bitmap) in deferred {
            surface.draw_bitmap(&bitmap, rect.x, rect.y);
            drop(bitmap); // reclaim each tile right after it is drawn
        }
        Ok(())
    }
}
