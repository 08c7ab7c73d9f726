//! Rotation of scenes to a telescope position angle.
//!
//! Positive angles turn the image content counter-clockwise when the array is
//! displayed with row 0 at the bottom, the usual orientation for astronomical
//! frames. Rotation is about the exact array centre `((rows-1)/2, (cols-1)/2)`.
//!
//! Resampling is by pixel-area overlap: each input pixel is treated as a unit
//! square, turned about the centre, and its value shared among the output
//! pixels it covers in proportion to the covered area. The shares of every
//! input pixel add up to one, so a point source keeps its flux at any angle,
//! and the turned squares tile the plane, so a flat field stays flat. Flux
//! that lands off the output is lost and the corners exposed by a rotation
//! are empty rather than wrapped or reflected. Exact quarter turns of square
//! images are done as an index permutation and lose nothing.

use ndarray::{Array2, ArrayView2, Axis, Zip};
use rayon::prelude::*;

use crate::canvas::SceneCanvas;
use crate::image_size::ImageSize;
use crate::instrument::wrap_angle;

/// Radius in pixels about the canvas centre inside which no flux is ever
/// clipped, whatever the angle.
///
/// The outer edge of the canvas lies 2115.5 pixels from its centre. A turned
/// pixel reaches at most `sqrt(2) / 2` beyond its own centre, and one more
/// pixel is kept back for the footprint of a source sitting exactly on the
/// radius. The POM window corners are 1641 pixels out, well inside.
pub const SAFE_RADIUS: f64 = 2113.0;

/// Rotate a scene canvas about its centre
pub fn rotate(canvas: &SceneCanvas, angle_degrees: f64) -> SceneCanvas {
    SceneCanvas::from_rotated(rotate_image(&canvas.view(), angle_degrees))
}

/// Rotate any 2D image about its centre, keeping its shape
pub fn rotate_image(image: &ArrayView2<f64>, angle_degrees: f64) -> Array2<f64> {
    rotate_region(image, angle_degrees, (0, 0), image.dim())
}

/// Rotate an image about its centre, producing only the window of the result
/// with top-left index `origin` and `shape` (both `(row, col)`).
///
/// Pixels of the window that lie outside the image are zero. Rotating only
/// the part of the canvas that is read out afterwards avoids resampling the
/// margins.
pub fn rotate_region(
    image: &ArrayView2<f64>,
    angle_degrees: f64,
    origin: (usize, usize),
    shape: (usize, usize),
) -> Array2<f64> {
    let (rows, cols) = image.dim();
    let mut out = Array2::<f64>::zeros(shape);
    if rows == 0 || cols == 0 {
        return out;
    }
    let angle = wrap_angle(angle_degrees);

    if let Some(turns) = quarter_turns(angle) {
        if turns == 0 || rows == cols {
            Zip::indexed(&mut out).par_for_each(|(r, c), value| {
                let (row, col) = (r + origin.0, c + origin.1);
                if row < rows && col < cols {
                    let (sr, sc) = quarter_turn_source(row, col, turns, rows);
                    *value = image[[sr, sc]];
                }
            });
            return out;
        }
    }

    let (sin, cos) = angle.to_radians().sin_cos();
    let cy = (rows as f64 - 1.0) / 2.0;
    let cx = (cols as f64 - 1.0) / 2.0;
    // Half the width of a turned pixel along either axis
    let reach = 0.5 * (sin.abs() + cos.abs());
    let corners = [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)]
        .map(|(a, b): (f64, f64)| (a * cos - b * sin, a * sin + b * cos));

    let width = shape.1;
    let x_lo = origin.1 as f64 - 0.5 - reach;
    let x_hi = (origin.1 + width) as f64 - 0.5 + reach;

    // Every output row gathers from input pixels in a fixed order, so the
    // result is independent of the window and of the thread count
    out.axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(r, mut line)| {
            let row = (r + origin.0) as f64;
            let (top, bottom) = (row - 0.5, row + 0.5);

            for i in 0..rows {
                let dy = i as f64 - cy;
                // Forward position of input pixel (i, j) is linear in j
                let x_start = cx - cx * cos - dy * sin;
                let y_start = cy - cx * sin + dy * cos;
                let Some((j_first, j_last)) = index_span(y_start, sin, top - reach, bottom + reach, cols)
                    .and_then(|(a, b)| {
                        let (c, d) = index_span(x_start, cos, x_lo, x_hi, cols)?;
                        let (first, last) = (a.max(c), b.min(d));
                        (first <= last).then_some((first, last))
                    })
                else {
                    continue;
                };

                for j in j_first..=j_last {
                    let value = image[[i, j]];
                    if value == 0.0 {
                        continue;
                    }
                    let x = x_start + j as f64 * cos;
                    let y = y_start + j as f64 * sin;
                    let band = Polygon::from_corners(corners.map(|(u, v)| (x + u, y + v)))
                        .clip(|p| p.1 - top)
                        .clip(|p| bottom - p.1);
                    if band.len < 3 {
                        continue;
                    }

                    let first_col = (x - reach).round().max(origin.1 as f64);
                    let last_col = (x + reach).round().min((origin.1 + width) as f64 - 1.0);
                    if first_col > last_col {
                        continue;
                    }
                    for col in first_col as usize..=last_col as usize {
                        let left = col as f64 - 0.5;
                        let area = band
                            .clip(|p| p.0 - left)
                            .clip(|p| left + 1.0 - p.0)
                            .area();
                        if area > 0.0 {
                            line[col - origin.1] += value * area;
                        }
                    }
                }
            }
        });
    out
}

/// Forward-map a pixel coordinate through the same rotation as
/// [`rotate_image`] applied to an image of `size`.
pub fn rotate_pixel(x: f64, y: f64, angle_degrees: f64, size: ImageSize) -> (f64, f64) {
    let cx = (size.width as f64 - 1.0) / 2.0;
    let cy = (size.height as f64 - 1.0) / 2.0;
    let (sin, cos) = wrap_angle(angle_degrees).to_radians().sin_cos();
    let (dx, dy) = (x - cx, y - cy);
    (cx + dx * cos - dy * sin, cy + dx * sin + dy * cos)
}

fn quarter_turns(angle: f64) -> Option<usize> {
    [0.0, 90.0, 180.0, 270.0]
        .iter()
        .position(|&quarter| angle == quarter)
}

/// Source index of output pixel `(row, col)` for `turns` counter-clockwise
/// quarter turns of an `n`x`n` image.
fn quarter_turn_source(row: usize, col: usize, turns: usize, n: usize) -> (usize, usize) {
    match turns {
        1 => (n - 1 - col, row),
        2 => (n - 1 - row, n - 1 - col),
        3 => (col, n - 1 - row),
        _ => (row, col),
    }
}

/// Indices `j` in `0..len` for which `start + slope * j` lies in `[lo, hi]`,
/// widened by one on each side to absorb rounding
fn index_span(start: f64, slope: f64, lo: f64, hi: f64, len: usize) -> Option<(usize, usize)> {
    let last_index = len as f64 - 1.0;
    let (first, last) = if slope.abs() < 1e-12 {
        if start < lo || start > hi {
            return None;
        }
        (0.0, last_index)
    } else {
        let (a, b) = ((lo - start) / slope, (hi - start) / slope);
        (a.min(b).floor() - 1.0, a.max(b).ceil() + 1.0)
    };
    let (first, last) = (first.max(0.0), last.min(last_index));
    (first <= last).then_some((first as usize, last as usize))
}

/// Convex polygon small enough to live on the stack.
///
/// A square clipped by four lines never has more than eight vertices.
#[derive(Debug, Clone, Copy)]
struct Polygon {
    vertices: [(f64, f64); 8],
    len: usize,
}

impl Polygon {
    fn from_corners(corners: [(f64, f64); 4]) -> Self {
        let mut polygon = Self {
            vertices: [(0.0, 0.0); 8],
            len: 0,
        };
        corners.into_iter().for_each(|p| polygon.push(p));
        polygon
    }

    fn push(&mut self, vertex: (f64, f64)) {
        if self.len < self.vertices.len() {
            self.vertices[self.len] = vertex;
            self.len += 1;
        }
    }

    /// Part of the polygon where `distance` is non-negative, for a `distance`
    /// that is linear in the coordinates
    fn clip(&self, distance: impl Fn((f64, f64)) -> f64) -> Self {
        let mut kept = Self {
            vertices: [(0.0, 0.0); 8],
            len: 0,
        };
        for k in 0..self.len {
            let a = self.vertices[k];
            let b = self.vertices[(k + 1) % self.len];
            let (da, db) = (distance(a), distance(b));
            if da >= 0.0 {
                kept.push(a);
            }
            if (da >= 0.0) != (db >= 0.0) {
                let t = da / (da - db);
                kept.push((a.0 + t * (b.0 - a.0), a.1 + t * (b.1 - a.1)));
            }
        }
        kept
    }

    /// Shoelace area
    fn area(&self) -> f64 {
        if self.len < 3 {
            return 0.0;
        }
        let twice: f64 = (0..self.len)
            .map(|k| {
                let (x0, y0) = self.vertices[k];
                let (x1, y1) = self.vertices[(k + 1) % self.len];
                x0 * y1 - x1 * y0
            })
            .sum();
        0.5 * twice.abs()
    }
}
