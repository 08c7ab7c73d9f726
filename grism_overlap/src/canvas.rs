//! The fixed-size working canvas a scene is composed on

use ndarray::{Array2, ArrayView2};

use crate::error::GeometryError;
use crate::image_size::ImageSize;

/// Square 4231x4231 grid of count rates.
///
/// The size is checked once at construction so later stages can rely on it.
/// A canvas is only mutated while a scene is being composed; afterwards it is
/// borrowed read-only by every pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneCanvas {
    data: Array2<f64>,
}

impl SceneCanvas {
    /// An empty canvas
    pub fn zeros() -> Self {
        Self {
            data: ImageSize::CANVAS.zeros(),
        }
    }

    /// Wrap an existing array, which must be exactly canvas sized
    pub fn from_array(data: Array2<f64>) -> Result<Self, GeometryError> {
        check_canvas_shape(&data.view())?;
        Ok(Self { data })
    }

    /// Wrap the output of a shape-preserving transform of a canvas
    pub(crate) fn from_rotated(data: Array2<f64>) -> Self {
        debug_assert_eq!(ImageSize::of(&data.view()), ImageSize::CANVAS);
        Self { data }
    }

    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    pub fn as_array(&self) -> &Array2<f64> {
        &self.data
    }

    pub(crate) fn as_array_mut(&mut self) -> &mut Array2<f64> {
        &mut self.data
    }

    pub fn into_array(self) -> Array2<f64> {
        self.data
    }

    /// Sum of all pixel values
    pub fn total_flux(&self) -> f64 {
        self.data.sum()
    }

    /// Add a uniform level to every pixel
    pub(crate) fn add_background(&mut self, level: f64) {
        self.data += level;
    }

    /// Add another canvas pixel by pixel
    pub(crate) fn add_canvas(&mut self, other: &SceneCanvas) {
        self.data += &other.data;
    }
}

/// Error unless `array` has the full canvas shape
pub fn check_canvas_shape(array: &ArrayView2<f64>) -> Result<(), GeometryError> {
    let got = ImageSize::of(array);
    if got != ImageSize::CANVAS {
        return Err(GeometryError::WrongShape {
            what: "scene canvas",
            expected: ImageSize::CANVAS,
            got,
        });
    }
    Ok(())
}
