//! Error types for the overlap pipeline.
//!
//! Every component returns its failures as values. The top-level
//! [`OverlapError`] groups them into the categories a caller acts on:
//! bad configuration, bad geometry, bad source data, kernel loading and
//! failures isolated to a single position angle of a sweep.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::fits::FitsError;
use crate::image_size::ImageSize;

/// Unknown names or out-of-range parameters supplied by the caller
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Unknown filter '{0}', expected one of F090W, F115W, F140M, F150W, F158M, F200W")]
    UnknownFilter(String),
    #[error("Unknown grism '{0}', expected GR150R or GR150C")]
    UnknownGrism(String),
    #[error("Throughput {0} must be finite and non-negative")]
    InvalidThroughput(f64),
    #[error("Failed to read configuration {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse configuration {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0}")]
    Invalid(String),
}

/// Array shapes, crop windows and offsets that do not fit the frame layout
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("{what} must be {expected}, got {got}")]
    WrongShape {
        what: &'static str,
        expected: ImageSize,
        got: ImageSize,
    },
    #[error("Read-out window {size} at ({x0}, {y0}) does not fit inside {canvas}")]
    WindowOutOfBounds {
        x0: i64,
        y0: i64,
        size: ImageSize,
        canvas: ImageSize,
    },
    #[error("Mask {mask} is larger than field {field}")]
    MaskTooLarge { mask: ImageSize, field: ImageSize },
    #[error("Cannot split {rows} rows into {tiles} equal tiles")]
    UnevenTiles { rows: usize, tiles: usize },
    #[error("Sub-array {subarray} can only be read from the detector region, not {region}")]
    SubarrayRequiresDetector {
        subarray: &'static str,
        region: &'static str,
    },
    #[error("Frame {0} is neither a full canvas nor a POM window")]
    UnsupportedFrame(ImageSize),
}

/// Catalog files that are missing or cannot be parsed
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Catalog {path} line {line}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },
    #[error("Source {id} has an unusable shape: {reason}")]
    InvalidShape { id: i64, reason: &'static str },
    #[error("Catalog {0} contains no sources")]
    Empty(PathBuf),
    #[error("Invalid sky position '{0}', expected \"ra, dec\" in degrees")]
    InvalidPosition(String),
    #[error("Catalog provider failed: {0}")]
    Provider(String),
}

/// Kernel and mask files that are missing, malformed or inconsistent
#[derive(Error, Debug)]
pub enum KernelError {
    #[error(transparent)]
    Fits(#[from] FitsError),
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("No kernel tiles found for {0}")]
    MissingTiles(PathBuf),
    #[error("Kernel tiles for {stem} skip index {missing}")]
    TileGap { stem: String, missing: usize },
    #[error("Kernel tile {index} has {got} columns, expected {expected}")]
    TileWidthMismatch {
        index: usize,
        expected: usize,
        got: usize,
    },
    #[error("Kernel {0} contains negative or non-finite values")]
    InvalidValues(PathBuf),
}

/// Top-level failure of a pipeline operation
#[derive(Error, Debug)]
pub enum OverlapError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(#[from] ConfigurationError),
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(#[from] GeometryError),
    #[error("Source data error: {0}")]
    SourceData(#[from] CatalogError),
    #[error("Kernel error: {0}")]
    Kernel(#[from] KernelError),
    #[error("FITS I/O error: {0}")]
    Fits(#[from] FitsError),
    #[error("Position angle {angle} failed: {source}")]
    TaskFailure {
        angle: f64,
        #[source]
        source: Box<OverlapError>,
    },
    #[error("Failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

impl OverlapError {
    /// Wrap an error raised while processing one position angle
    pub fn at_angle(angle: f64, error: OverlapError) -> Self {
        OverlapError::TaskFailure {
            angle,
            source: Box::new(error),
        }
    }

    /// The position angle of a task failure, if this is one
    pub fn failed_angle(&self) -> Option<f64> {
        match self {
            OverlapError::TaskFailure { angle, .. } => Some(*angle),
            _ => None,
        }
    }
}

pub type Result<T, E = OverlapError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions_pick_category() {
        let err: OverlapError = ConfigurationError::UnknownFilter("F999W".into()).into();
        assert!(matches!(err, OverlapError::InvalidConfiguration(_)));
        assert!(err.to_string().contains("F999W"));

        let err: OverlapError = GeometryError::UnevenTiles { rows: 10, tiles: 3 }.into();
        assert!(matches!(err, OverlapError::InvalidGeometry(_)));
    }

    #[test]
    fn test_task_failure_keeps_angle_and_cause() {
        let cause = GeometryError::UnsupportedFrame(ImageSize::square(5));
        let err = OverlapError::at_angle(120.0, cause.into());
        assert_eq!(err.failed_angle(), Some(120.0));
        let source = std::error::Error::source(&err).expect("task failure has a source");
        assert!(source.to_string().contains("5x5"));
    }
}
