//! Trimming of dispersed frames to the read-out regions.
//!
//! Crop offsets are fixed by the instrument layout. Whenever a frame is
//! cropped, a paired [`SourceTable`] is shifted by the same offsets so the
//! recorded source positions stay on the image.

use std::fmt;

use log::debug;
use ndarray::{s, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::GeometryError;
use crate::image_size::ImageSize;
use crate::instrument::{DETECTOR_OFFSET, DETECTOR_SIZE, POM_OFFSET, POM_SIZE};
use crate::table::SourceTable;

/// Part of the working frame to return
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    /// The whole frame as given
    Scene,
    /// The 2322 pixel POM image area
    Pom,
    /// The 2048 pixel detector area
    #[default]
    Detector,
}

impl Region {
    pub fn name(&self) -> &'static str {
        match self {
            Region::Scene => "scene",
            Region::Pom => "pom",
            Region::Detector => "detector",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Detector read-out sub-array
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
pub enum Subarray {
    #[default]
    #[serde(rename = "FULL")]
    #[value(name = "FULL")]
    Full,
    #[serde(rename = "SUBSTRIP256")]
    #[value(name = "SUBSTRIP256")]
    Substrip256,
    #[serde(rename = "SUBSTRIP96")]
    #[value(name = "SUBSTRIP96")]
    Substrip96,
}

impl Subarray {
    pub fn name(&self) -> &'static str {
        match self {
            Subarray::Full => "FULL",
            Subarray::Substrip256 => "SUBSTRIP256",
            Subarray::Substrip96 => "SUBSTRIP96",
        }
    }

    /// Detector rows read out, as `(first, count)`
    pub fn rows(&self) -> (usize, usize) {
        match self {
            Subarray::Full => (0, DETECTOR_SIZE),
            Subarray::Substrip256 => (DETECTOR_SIZE - 256, 256),
            Subarray::Substrip96 => (DETECTOR_SIZE - 256, 96),
        }
    }

    /// Shape `(rows, cols)` of a frame read out with this sub-array
    pub fn shape(&self) -> (usize, usize) {
        (self.rows().1, DETECTOR_SIZE)
    }
}

impl fmt::Display for Subarray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Canvas offset of the first pixel of a frame the extractor accepts
fn frame_origin(frame: &ArrayView2<f64>) -> Result<usize, GeometryError> {
    match ImageSize::of(frame) {
        ImageSize::CANVAS => Ok(0),
        ImageSize::POM => Ok(POM_OFFSET),
        other => Err(GeometryError::UnsupportedFrame(other)),
    }
}

/// Cut `region` (and for the detector, `subarray`) out of a full canvas or a
/// POM window, shifting `table` positions into the returned frame.
///
/// A POM window is taken to sit at the POM offset of the canvas. Sub-arrays
/// other than [`Subarray::Full`] are only read from the detector region;
/// they take rows without moving columns, so only `y` changes for them.
pub fn extract(
    frame: &ArrayView2<f64>,
    region: Region,
    subarray: Subarray,
    table: Option<&mut SourceTable>,
) -> Result<Array2<f64>, GeometryError> {
    if subarray != Subarray::Full && region != Region::Detector {
        return Err(GeometryError::SubarrayRequiresDetector {
            subarray: subarray.name(),
            region: region.name(),
        });
    }
    let origin = frame_origin(frame)?;
    let (rows, cols) = frame.dim();

    let (row0, col0, height, width) = match region {
        Region::Scene => (0, 0, rows, cols),
        Region::Pom => {
            let offset = POM_OFFSET - origin;
            (offset, offset, POM_SIZE, POM_SIZE)
        }
        Region::Detector => {
            let offset = DETECTOR_OFFSET - origin;
            let (first, count) = subarray.rows();
            (offset + first, offset, count, DETECTOR_SIZE)
        }
    };

    debug!(
        "Extracting {region} {subarray}: rows {row0}..{}, cols {col0}..{}",
        row0 + height,
        col0 + width
    );
    if let Some(table) = table {
        table.shift(-(col0 as f64), -(row0 as f64));
    }
    Ok(frame
        .slice(s![row0..row0 + height, col0..col0 + width])
        .to_owned())
}
