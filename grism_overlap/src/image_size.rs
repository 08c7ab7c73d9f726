//! Image dimensions for the fixed pipeline frames

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::instrument::{CANVAS_SIZE, DETECTOR_SIZE, POM_SIZE};

/// Image dimensions structure
///
/// Represents the width and height of a frame in pixels. Arrays use the
/// ndarray row-major convention, so the shape of a frame is `(height, width)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSize {
    /// Image width in pixels (columns)
    pub width: usize,
    /// Image height in pixels (rows)
    pub height: usize,
}

impl ImageSize {
    /// The oversized working canvas every scene is built on
    pub const CANVAS: ImageSize = ImageSize::square(CANVAS_SIZE);

    /// The POM (point of minimum) image area read out by the dispersion engine
    pub const POM: ImageSize = ImageSize::square(POM_SIZE);

    /// The light-sensitive detector area
    pub const DETECTOR: ImageSize = ImageSize::square(DETECTOR_SIZE);

    /// Create a new ImageSize
    pub fn from_width_height(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    /// Create a square ImageSize
    pub const fn square(size: usize) -> Self {
        Self {
            width: size,
            height: size,
        }
    }

    /// Size of an existing array
    pub fn of(array: &ArrayView2<f64>) -> Self {
        let (height, width) = array.dim();
        Self { width, height }
    }

    /// Create a zero-filled array with this size
    ///
    /// Returns an ndarray Array2 of zeros with shape (height, width).
    pub fn zeros(&self) -> Array2<f64> {
        Array2::zeros(self.shape())
    }

    /// Array shape `(rows, cols)` for this size
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// Get total number of pixels
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// Whether a pixel-coordinate point lies on this frame
    pub fn contains(&self, x: f64, y: f64) -> bool {
        if self.width == 0 || self.height == 0 {
            return false;
        }
        x >= 0.0 && y >= 0.0 && x <= (self.width - 1) as f64 && y <= (self.height - 1) as f64
    }
}

impl From<(usize, usize)> for ImageSize {
    /// Build from a `(width, height)` tuple
    fn from(dimensions: (usize, usize)) -> Self {
        Self::from_width_height(dimensions.0, dimensions.1)
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_edges() {
        let size = ImageSize::from_width_height(4, 3);
        assert!(size.contains(0.0, 0.0));
        assert!(size.contains(3.0, 2.0));
        assert!(!size.contains(3.5, 1.0));
        assert!(!size.contains(-0.1, 1.0));
        assert!(!size.contains(f64::NAN, 1.0));
    }

    #[test]
    fn test_empty_frame_contains_nothing() {
        for size in [
            ImageSize::from_width_height(0, 5),
            ImageSize::from_width_height(5, 0),
            ImageSize::square(0),
        ] {
            assert!(!size.contains(0.0, 0.0));
            assert!(!size.contains(2.0, 2.0));
        }
    }

    #[test]
    fn test_named_sizes_nest() {
        assert!(ImageSize::DETECTOR.pixel_count() < ImageSize::POM.pixel_count());
        assert!(ImageSize::POM.pixel_count() < ImageSize::CANVAS.pixel_count());
    }

    #[test]
    fn test_shape_is_rows_first() {
        let size = ImageSize::from_width_height(30, 20);
        assert_eq!(size.shape(), (20, 30));
        assert_eq!(size.zeros().dim(), (20, 30));
        assert_eq!(format!("{size}"), "30x20");
    }

    #[test]
    fn test_contains() {
        let size = ImageSize::square(10);
        assert!(size.contains(0.0, 9.0));
        assert!(!size.contains(-0.5, 3.0));
        assert!(!size.contains(3.0, 9.5));
    }
}
