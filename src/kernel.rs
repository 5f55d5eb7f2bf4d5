//! Compute kernel boundary.
//!
//! The scheduler treats tile computation as an opaque operation behind the
//! [`ComputeKernel`] trait: given a pixel region, a view window and an
//! iteration budget, the kernel fills the region with RGBA8 pixels. It is
//! assumed to succeed on valid inputs; fallibility lives at the encode
//! boundary, not here.
//!
//! [`Mandelbrot`] is the built-in kernel.

use crate::tile::BYTES_PER_PIXEL;
use crate::view::ViewWindow;

/// A pure tile computation: fills `pixels` with `width * height` RGBA8
/// values for the plane region described by `window`.
///
/// Implementations must be callable from any worker thread and must write
/// every pixel of the region.
pub trait ComputeKernel: Send + Sync + 'static {
    /// Render one tile in place.
    ///
    /// `pixels` is exactly `width * height * 4` bytes, row-major.
    fn compute(&self, pixels: &mut [u8], width: u32, height: u32, window: &ViewWindow, max_iter: u32);
}

impl<K: ComputeKernel + ?Sized> ComputeKernel for std::sync::Arc<K> {
    fn compute(&self, pixels: &mut [u8], width: u32, height: u32, window: &ViewWindow, max_iter: u32) {
        (**self).compute(pixels, width, height, window, max_iter)
    }
}

/// Escape-time Mandelbrot kernel.
#[derive(Clone, Copy, Debug, Default)]
pub struct Mandelbrot;

impl Mandelbrot {
    /// Iterations until escape, or `max_iter` for points in the set.
    #[inline]
    fn escape(cr: f64, ci: f64, max_iter: u32) -> u32 {
        let mut zr = 0.0f64;
        let mut zi = 0.0f64;
        let mut n = 0;
        while n < max_iter {
            let zr2 = zr * zr;
            let zi2 = zi * zi;
            if zr2 + zi2 > 4.0 {
                break;
            }
            zi = 2.0 * zr * zi + ci;
            zr = zr2 - zi2 + cr;
            n += 1;
        }
        n
    }

    /// Map an escape count to an RGBA8 color. Points in the set are
    /// opaque black; outside points follow a polynomial gradient.
    #[inline]
    fn shade(n: u32, max_iter: u32) -> [u8; 4] {
        if n >= max_iter {
            return [0, 0, 0, 255];
        }
        let t = n as f64 / max_iter as f64;
        let r = (9.0 * (1.0 - t) * t * t * t * 255.0) as u8;
        let g = (15.0 * (1.0 - t) * (1.0 - t) * t * t * 255.0) as u8;
        let b = (8.5 * (1.0 - t) * (1.0 - t) * (1.0 - t) * t * 255.0) as u8;
        [r, g, b, 255]
    }
}

impl ComputeKernel for Mandelbrot {
    fn compute(&self, pixels: &mut [u8], width: u32, height: u32, window: &ViewWindow, max_iter: u32) {
        debug_assert_eq!(
            pixels.len(),
            width as usize * height as usize * BYTES_PER_PIXEL
        );
        let mut offset = 0;
        for py in 0..height {
            let ci = window.y0 + py as f64 * window.dy;
            for px in 0..width {
                let cr = window.x0 + px as f64 * window.dx;
                let n = Self::escape(cr, ci, max_iter);
                pixels[offset..offset + BYTES_PER_PIXEL].copy_from_slice(&Self::shade(n, max_iter));
                offset += BYTES_PER_PIXEL;
            }
        }
    }
}
