//! Bitmap encoding boundary.
//!
//! Encoding turns a worker's pixel snapshot into the [`TileBitmap`] that
//! travels back to the coordinator. The step is fallible: the worker loop
//! treats any error as transient and retries after a fixed delay, without
//! bound and without surfacing the failure to the task's caller.

use crate::buffer::TileBitmap;
use crate::error::Result;
use bytes::Bytes;

/// Converts an immutable pixel snapshot into a tile bitmap.
///
/// Failures are treated as transient by the worker and retried.
pub trait BitmapEncoder: Send + Sync + 'static {
    /// Encode a `width * height` RGBA8 snapshot.
    fn encode(&self, pixels: Bytes, width: u32, height: u32) -> Result<TileBitmap>;
}

impl<E: BitmapEncoder + ?Sized> BitmapEncoder for std::sync::Arc<E> {
    fn encode(&self, pixels: Bytes, width: u32, height: u32) -> Result<TileBitmap> {
        (**self).encode(pixels, width, height)
    }
}

/// Default encoder: wraps the snapshot without transformation.
#[derive(Clone, Copy, Debug, Default)]
pub struct RgbaEncoder;

impl BitmapEncoder for RgbaEncoder {
    fn encode(&self, pixels: Bytes, width: u32, height: u32) -> Result<TileBitmap> {
        TileBitmap::new(pixels, width, height)
    }
}
