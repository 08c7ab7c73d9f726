//! Test fixtures for the overlap simulator.
//!
//! Small synthetic images, kernels and catalog text with known answers, so
//! tests do not need the multi-gigabyte instrument files.
//!
//! # Usage
//! ```rust
//! use test_helpers::{delta_kernel, gaussian_blob};
//!
//! let blob = gaussian_blob((64, 64), (20.0, 30.0), 2.5, 100.0);
//! assert!((blob.sum() - 100.0).abs() < 1e-9);
//!
//! let kernel = delta_kernel(3);
//! assert_eq!(kernel[[1, 1]], 1.0);
//! ```

use ndarray::Array2;
use std::fmt::Write;

/// Circular Gaussian of total `flux` centred on `(row, col)` in an image of
/// `shape` (rows, cols).
///
/// The profile is normalised over the image itself, so the pixel sum is
/// exactly `flux` up to rounding even when the wings are cut off.
pub fn gaussian_blob(shape: (usize, usize), centre: (f64, f64), sigma: f64, flux: f64) -> Array2<f64> {
    let (cy, cx) = centre;
    let two_sigma_sq = 2.0 * sigma * sigma;
    let mut image = Array2::from_shape_fn(shape, |(r, c)| {
        let dy = r as f64 - cy;
        let dx = c as f64 - cx;
        (-(dx * dx + dy * dy) / two_sigma_sq).exp()
    });
    let total = image.sum();
    if total > 0.0 {
        image *= flux / total;
    }
    image
}

/// Odd-sized kernel with a single 1 at its centre
pub fn delta_kernel(size: usize) -> Array2<f64> {
    let mut kernel = Array2::zeros((size, size));
    kernel[[size / 2, size / 2]] = 1.0;
    kernel
}

/// Kernel shaped like a dispersed trace: a row of `cols` pixels falling off
/// linearly from the centre, repeated with half weight on the neighbouring
/// rows. The maximum is unique and sits at `((rows-1)/2, (cols-1)/2)`.
pub fn trace_kernel(rows: usize, cols: usize) -> Array2<f64> {
    let (cr, cc) = ((rows - 1) / 2, (cols - 1) / 2);
    Array2::from_shape_fn((rows, cols), |(r, c)| {
        let along = 1.0 / (1.0 + c.abs_diff(cc) as f64);
        let across = 0.5_f64.powi(r.abs_diff(cr) as i32);
        along * across
    })
}

/// Spot mask that passes everything
pub fn open_mask(size: usize) -> Array2<f64> {
    Array2::ones((size, size))
}

/// One row of a point-source catalog fixture
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogRow {
    pub index: i64,
    pub ra: f64,
    pub dec: f64,
    /// `(band, magnitude)` pairs, e.g. `("f200w", 9.5)`
    pub magnitudes: Vec<(&'static str, f64)>,
}

/// Mirage-style point-source catalog text for `rows`.
///
/// Magnitude columns are taken from the first row; later rows must list the
/// same bands in the same order.
pub fn mirage_catalog_text(rows: &[CatalogRow]) -> String {
    let mut text = String::from("# position_RA_Dec\n# abmag\nindex x_or_RA y_or_Dec");
    if let Some(first) = rows.first() {
        for (band, _) in &first.magnitudes {
            write!(text, " niriss_{}_magnitude", band.to_ascii_lowercase()).unwrap();
        }
    }
    text.push('\n');
    for row in rows {
        write!(text, "{} {:.10} {:.10}", row.index, row.ra, row.dec).unwrap();
        for (_, magnitude) in &row.magnitudes {
            write!(text, " {magnitude}").unwrap();
        }
        text.push('\n');
    }
    text
}
