//! Pixel buffers and immutable tile bitmaps.
//!
//! [`PixelBuffer`] is the mutable render target a worker's arena owns: a
//! contiguous heap region with logical dimensions that may describe less
//! than the full allocation after a reshape. [`TileBitmap`] is the
//! immutable snapshot that travels back to the coordinator; it is backed
//! by [`Bytes`], so clones are cheap and ownership moves across channels
//! are explicit.

use crate::error::{Error, Result};
use crate::tile::BYTES_PER_PIXEL;
use bytes::Bytes;

/// Byte length of an RGBA8 region for `width * height` pixels.
///
/// # Errors
///
/// Returns an error if either dimension is zero or the product overflows.
pub fn byte_len(width: u32, height: u32) -> Result<usize> {
    if width == 0 || height == 0 {
        return Err(Error::AllocationFailed(
            "dimensions must be greater than 0".into(),
        ));
    }
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|px| px.checked_mul(BYTES_PER_PIXEL))
        .ok_or_else(|| Error::AllocationFailed(format!("{}x{} overflows", width, height)))
}

/// A reusable RGBA8 render buffer.
///
/// The backing region never shrinks while the buffer lives; a reshape to
/// smaller logical dimensions reinterprets the existing allocation.
/// Exclusively owned by the worker that allocated it, never shared.
pub struct PixelBuffer {
    /// Backing region. A boxed slice keeps the allocation contiguous and
    /// at a stable address.
    data: Box<[u8]>,
    width: u32,
    height: u32,
}

impl PixelBuffer {
    /// Allocate a zeroed buffer of exactly `width * height * 4` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if either dimension is zero.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let len = byte_len(width, height)?;
        let data = vec![0u8; len].into_boxed_slice();
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Logical width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Logical height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Byte length of the logical pixel region (`width * height * 4`).
    pub fn len(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL
    }

    /// A pixel buffer always holds at least one pixel.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Total capacity of the backing region in bytes.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Reinterpret the existing region under new logical dimensions
    /// without reallocating or copying.
    ///
    /// Callers must have checked that the new dimensions fit the capacity;
    /// the arena is the only caller.
    pub(crate) fn reshape(&mut self, width: u32, height: u32) {
        debug_assert!(
            width as usize * height as usize * BYTES_PER_PIXEL <= self.data.len(),
            "reshape exceeds backing region"
        );
        self.width = width;
        self.height = height;
    }

    /// The logical pixel region.
    pub fn pixels(&self) -> &[u8] {
        &self.data[..self.len()]
    }

    /// The logical pixel region, mutable. The compute kernel writes here.
    pub fn pixels_mut(&mut self) -> &mut [u8] {
        let len = self.len();
        &mut self.data[..len]
    }

    /// Take an immutable copy of the logical pixel region.
    ///
    /// The copy is mandatory before any asynchronous use of the data: the
    /// backing region may be reused or reshaped by the very next request.
    pub fn snapshot(&self) -> Bytes {
        Bytes::copy_from_slice(self.pixels())
    }
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// An immutable rendered tile.
///
/// Cheap to clone (the pixel data is reference-counted); sending one over
/// a channel moves ownership of the reference.
#[derive(Clone)]
pub struct TileBitmap {
    data: Bytes,
    width: u32,
    height: u32,
}

impl TileBitmap {
    /// Wrap pixel data into a bitmap.
    ///
    /// # Errors
    ///
    /// Returns an error if `data.len()` does not equal `width * height * 4`.
    pub fn new(data: Bytes, width: u32, height: u32) -> Result<Self> {
        let expected = byte_len(width, height)?;
        if data.len() != expected {
            return Err(Error::EncodeFailed(format!(
                "pixel data is {} bytes, expected {}",
                data.len(),
                expected
            )));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Bitmap width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Bitmap height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// The pixel data as a byte slice.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// One row of pixels.
    ///
    /// # Panics
    ///
    /// Panics if `y >= height`.
    pub fn row(&self, y: u32) -> &[u8] {
        assert!(y < self.height, "row out of bitmap");
        let stride = self.width as usize * BYTES_PER_PIXEL;
        &self.data[y as usize * stride..(y as usize + 1) * stride]
    }
}

impl std::fmt::Debug for TileBitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileBitmap")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}
