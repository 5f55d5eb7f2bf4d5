//! Per-worker frame arena: one reusable pixel buffer.
//!
//! Each worker owns a [`FrameArena`] for its lifetime and renders every
//! tile into the single slot it manages. The arena minimizes reallocation:
//! a request that fits the existing region reshapes it in place, and only
//! a request that outgrows the region releases and reallocates.
//!
//! # Invariant
//!
//! At most one slot is live at any time. On a grow, the old region is
//! released strictly before the new one is allocated.

use crate::buffer::{self, PixelBuffer};
use crate::error::Result;

/// Counters describing arena behavior, mainly for tests and monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaStats {
    /// Fresh regions allocated.
    pub allocations: u64,
    /// Requests satisfied by reinterpreting the existing region.
    pub reshapes: u64,
    /// Regions released because a request outgrew them.
    pub releases: u64,
}

/// Owner of a worker's single reusable render buffer.
#[derive(Debug, Default)]
pub struct FrameArena {
    slot: Option<PixelBuffer>,
    stats: ArenaStats,
}

impl FrameArena {
    /// Create an empty arena. The first `ensure` call allocates.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a buffer sized for `width * height`, reusing the existing
    /// region whenever it is large enough.
    ///
    /// - No slot yet: allocate exactly `width * height * 4` bytes.
    /// - Same dimensions: return the slot as-is.
    /// - Different dimensions that fit the capacity: reshape in place,
    ///   no reallocation and no copy.
    /// - Larger than the capacity: release the old region, then allocate.
    ///
    /// # Errors
    ///
    /// Returns an error for zero dimensions or a failed allocation.
    pub fn ensure(&mut self, width: u32, height: u32) -> Result<&mut PixelBuffer> {
        let required = buffer::byte_len(width, height)?;

        match self.slot.take() {
            None => {
                self.slot = Some(PixelBuffer::new(width, height)?);
                self.stats.allocations += 1;
            }
            Some(slot) if slot.width() == width && slot.height() == height => {
                self.slot = Some(slot);
            }
            Some(mut slot) if required <= slot.capacity() => {
                slot.reshape(width, height);
                self.slot = Some(slot);
                self.stats.reshapes += 1;
            }
            Some(slot) => {
                // Release before allocating: never two live regions.
                drop(slot);
                self.stats.releases += 1;
                self.slot = Some(PixelBuffer::new(width, height)?);
                self.stats.allocations += 1;
            }
        }

        Ok(self.slot.as_mut().expect("slot populated above"))
    }

    /// Arena behavior counters.
    pub fn stats(&self) -> ArenaStats {
        self.stats
    }
}
