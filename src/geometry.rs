// src/geometry.rs
//! Plain-data geometry and pixel types exchanged between the loop
//! controller and the render worker.

use serde::{Deserialize, Serialize};

/// Size of a window surface in pixels.
///
/// A size with either dimension zero is "empty"; empty windows are skipped
/// during sync and render rather than treated as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
}

impl SurfaceSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Surface format requested by a window, picked up when the worker creates
/// its GPU context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceFormat {
    pub samples: u8,
    pub depth_bits: u8,
    pub stencil_bits: u8,
    pub srgb: bool,
}

impl Default for SurfaceFormat {
    fn default() -> Self {
        SurfaceFormat {
            samples: 0,
            depth_bits: 24,
            stencil_bits: 8,
            srgb: false,
        }
    }
}

/// A grabbed frame: RGBA8, row-major, tightly packed.
///
/// The empty image is the failure value of `grab` (worker not running).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameImage {
    pub size: SurfaceSize,
    pub pixels: Vec<u8>,
}

impl FrameImage {
    pub fn new(size: SurfaceSize, pixels: Vec<u8>) -> Self {
        Self { size, pixels }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.size.is_empty() || self.pixels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_dimension_is_empty() {
        assert!(SurfaceSize::new(0, 480).is_empty());
        assert!(SurfaceSize::new(640, 0).is_empty());
        assert!(!SurfaceSize::new(640, 480).is_empty());
    }

    #[test]
    fn empty_image_is_the_failure_value() {
        assert!(FrameImage::empty().is_empty());
        let img = FrameImage::new(SurfaceSize::new(2, 2), vec![0u8; 16]);
        assert!(!img.is_empty());
    }
}
