//! Scene composition: catalog sources rendered onto the working canvas.
//!
//! Point sources are deposited with bilinear weights over the four pixels
//! around their projected position, so the canvas total equals the catalog
//! flux and sub-pixel positions survive. Extended sources are rendered as
//! normalised elliptical Gaussians on a canvas of their own that is added at
//! the end. A flat background is added last.
//!
//! Only sources with a usable magnitude in the target band are placed. A
//! missing, non-numeric or sentinel (>= 99) magnitude drops the source from
//! both the canvas and the table.

use std::path::Path;

use log::{debug, info};

use crate::astrometry::{angular_distance_arcsec, SkyProjector};
use crate::canvas::SceneCanvas;
use crate::catalog::{Catalog, CatalogEntry, Morphology};
use crate::error::{CatalogError, Result};
use crate::image_size::ImageSize;
use crate::instrument::Filter;
use crate::table::{SourceKind, SourceRecord, SourceTable};

/// Magnitudes at or above this value are catalog placeholders
pub const MAGNITUDE_SENTINEL: f64 = 99.0;

/// Ratio of half-light radius to sigma for a 2D Gaussian, `sqrt(2 ln 2)`
const HALF_LIGHT_PER_SIGMA: f64 = 1.177_410_022_515_474_7;

/// Profiles narrower than this (pixels) are deposited as points. From one
/// pixel up the pixel sum of a sampled Gaussian matches its integral to
/// better than 1e-8.
const MIN_PROFILE_SIGMA: f64 = 1.0;

/// Gaussian profiles are rendered out to this many sigma
const PROFILE_EXTENT_SIGMA: f64 = 8.0;

/// Which point sources take part in a scene, by catalog row position
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Exclusion {
    #[default]
    None,
    /// Leave these sources out
    Remove(Vec<usize>),
    /// Use only these sources, e.g. to isolate a target from its field
    KeepOnly(Vec<usize>),
}

impl Exclusion {
    pub fn admits(&self, index: usize) -> bool {
        match self {
            Exclusion::None => true,
            Exclusion::Remove(indices) => !indices.contains(&index),
            Exclusion::KeepOnly(indices) => indices.contains(&index),
        }
    }
}

/// Usable magnitude of `entry` in `filter`, if any
pub fn valid_magnitude(entry: &CatalogEntry, filter: Filter) -> Option<f64> {
    entry
        .magnitude(filter.name())
        .filter(|m| m.is_finite() && *m < MAGNITUDE_SENTINEL)
}

/// Build a scene canvas and its source table.
///
/// `background` is clamped to be non-negative. The exclusion applies to the
/// point-source catalog; extended sources are always included when they have
/// a valid magnitude.
pub fn compose_scene(
    point_sources: &Catalog,
    extended_sources: Option<&Catalog>,
    target_filter: Filter,
    background: f64,
    exclusion: &Exclusion,
    projector: &dyn SkyProjector,
) -> Result<(SceneCanvas, SourceTable)> {
    let mut canvas = SceneCanvas::zeros();
    let mut table = SourceTable::new();
    let reference = projector.reference();

    let mut placed_points = 0;
    for (index, entry) in point_sources.entries().iter().enumerate() {
        if !exclusion.admits(index) {
            continue;
        }
        let Some(record) = place_record(index, entry, target_filter, projector, reference) else {
            continue;
        };
        deposit_point(canvas.as_array_mut(), record.x, record.y, record.flux);
        table.push(record);
        placed_points += 1;
    }

    let mut placed_extended = 0;
    if let Some(extended) = extended_sources {
        let mut galaxies = SceneCanvas::zeros();
        for (index, entry) in extended.entries().iter().enumerate() {
            let Some(mut record) = place_record(index, entry, target_filter, projector, reference)
            else {
                continue;
            };
            let morphology = entry.morphology.unwrap_or(Morphology {
                radius_arcsec: 0.0,
                ellipticity: 0.0,
                position_angle: 0.0,
            });
            morphology
                .check()
                .map_err(|reason| CatalogError::InvalidShape { id: entry.id, reason })?;
            let scale = projector_scale(projector, entry);
            deposit_extended(galaxies.as_array_mut(), &record, &morphology, scale);
            record.kind = SourceKind::Extended(morphology);
            table.push(record);
            placed_extended += 1;
        }
        canvas.add_canvas(&galaxies);
    }

    let level = background.max(0.0);
    canvas.add_background(level);

    info!(
        "Composed {} scene: {} point and {} extended sources, background {}",
        target_filter, placed_points, placed_extended, level
    );
    Ok((canvas, table))
}

/// Load the catalogs and compose a scene.
///
/// The filter name is checked before any file is read. A missing or
/// malformed catalog fails the whole call.
pub fn compose_scene_from_files(
    point_file: &Path,
    extended_file: Option<&Path>,
    target_filter: &str,
    background: f64,
    exclusion: &Exclusion,
    projector: &dyn SkyProjector,
) -> Result<(SceneCanvas, SourceTable)> {
    let filter: Filter = target_filter.parse()?;
    let points = Catalog::load(point_file)?;
    let extended = extended_file.map(Catalog::load).transpose()?;
    compose_scene(
        &points,
        extended.as_ref(),
        filter,
        background,
        exclusion,
        projector,
    )
}

fn place_record(
    index: usize,
    entry: &CatalogEntry,
    filter: Filter,
    projector: &dyn SkyProjector,
    reference: (f64, f64),
) -> Option<SourceRecord> {
    let Some(magnitude) = valid_magnitude(entry, filter) else {
        debug!("Source {} has no usable {} magnitude", entry.id, filter);
        return None;
    };
    let (ra, dec) = (entry.position.ra, entry.position.dec);
    let Some((x, y)) = projector.project(ra, dec).filter(|&(x, y)| ImageSize::CANVAS.contains(x, y))
    else {
        debug!("Source {} at ({ra}, {dec}) falls outside the canvas", entry.id);
        return None;
    };

    Some(SourceRecord {
        index,
        id: entry.id,
        name: entry
            .name
            .clone()
            .unwrap_or_else(|| format!("source {}", entry.id)),
        kind: SourceKind::Point,
        ra,
        dec,
        magnitudes: entry.magnitudes.clone(),
        magnitude,
        flux: filter.magnitude_to_flux(magnitude),
        x,
        y,
        distance_arcsec: angular_distance_arcsec(reference.0, reference.1, ra, dec),
        position_angle: None,
    })
}

/// Local plate scale in pixels per arcsecond at a source
fn projector_scale(projector: &dyn SkyProjector, entry: &CatalogEntry) -> f64 {
    let (ra, dec) = (entry.position.ra, entry.position.dec);
    let step_deg = 1.0 / 3600.0;
    match (projector.project(ra, dec), projector.project(ra, dec + step_deg)) {
        (Some((x0, y0)), Some((x1, y1))) => ((x1 - x0).powi(2) + (y1 - y0).powi(2)).sqrt(),
        _ => 1.0 / crate::instrument::PIXEL_SCALE_ARCSEC,
    }
}

/// Split `flux` over the four pixels around `(x, y)`; weights landing off the
/// array are dropped.
fn deposit_point(canvas: &mut ndarray::Array2<f64>, x: f64, y: f64, flux: f64) {
    let (rows, cols) = canvas.dim();
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let (x0, y0) = (x0 as isize, y0 as isize);

    for (yy, wy) in [(y0, 1.0 - fy), (y0 + 1, fy)] {
        for (xx, wx) in [(x0, 1.0 - fx), (x0 + 1, fx)] {
            let weight = wy * wx;
            if weight == 0.0 || yy < 0 || xx < 0 || yy >= rows as isize || xx >= cols as isize {
                continue;
            }
            canvas[[yy as usize, xx as usize]] += flux * weight;
        }
    }
}

/// Render an elliptical Gaussian of total `record.flux`.
///
/// The profile is normalised analytically and only pixels on the canvas are
/// visited, so flux beyond the edge is lost and the work is bounded by the
/// canvas size however wide the profile is.
fn deposit_extended(
    canvas: &mut ndarray::Array2<f64>,
    record: &SourceRecord,
    morphology: &Morphology,
    pixels_per_arcsec: f64,
) {
    let sigma_major = morphology.radius_arcsec * pixels_per_arcsec / HALF_LIGHT_PER_SIGMA;
    let sigma_minor = sigma_major * (1.0 - morphology.ellipticity);

    if !(sigma_minor >= MIN_PROFILE_SIGMA) {
        deposit_point(canvas, record.x, record.y, record.flux);
        return;
    }
    if !sigma_major.is_finite() {
        return;
    }

    let (rows, cols) = canvas.dim();
    let half = PROFILE_EXTENT_SIGMA * sigma_major;
    let clip = |centre: f64, len: usize| {
        let lo = (centre - half).floor().max(0.0);
        let hi = (centre + half).ceil().min(len as f64 - 1.0);
        (lo as usize, hi as usize, lo <= hi)
    };
    let (row_lo, row_hi, rows_hit) = clip(record.y, rows);
    let (col_lo, col_hi, cols_hit) = clip(record.x, cols);
    if !(rows_hit && cols_hit) {
        return;
    }

    let (sin, cos) = morphology.position_angle.to_radians().sin_cos();
    let scale = record.flux / (std::f64::consts::TAU * sigma_major * sigma_minor);
    let mut window = canvas.slice_mut(ndarray::s![row_lo..=row_hi, col_lo..=col_hi]);
    window.indexed_iter_mut().for_each(|((r, c), pixel)| {
        let dx = (col_lo + c) as f64 - record.x;
        let dy = (row_lo + r) as f64 - record.y;
        let u = dx * cos + dy * sin;
        let v = -dx * sin + dy * cos;
        *pixel += scale * (-0.5 * ((u / sigma_major).powi(2) + (v / sigma_minor).powi(2))).exp();
    });
}
