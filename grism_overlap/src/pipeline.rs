//! Rotate, disperse and trim a scene at one or many position angles.
//!
//! A sweep runs the single-angle pipeline for every visible angle on a rayon
//! pool. The scene and the prepared disperser (kernel spectrum and spot mask)
//! are borrowed read-only by all workers; each angle owns its output frame
//! and its copy of the source table. Anything that would fail every angle,
//! such as a missing kernel or a non-finite angle, is reported before any
//! work is dispatched. Errors from a single angle are recorded against that
//! angle and the rest of the sweep carries on.

use log::{debug, info, warn};
use ndarray::{Array2, Array3, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::astrometry::SkyProjector;
use crate::canvas::SceneCanvas;
use crate::catalog::Catalog;
use crate::disperse::{embed_pom_frame, DispersionEngine, DispersionMode, DispersionOptions, PreparedDisperser};
use crate::error::{ConfigurationError, GeometryError, OverlapError, Result};
use crate::extract::{extract, Region, Subarray};
use crate::image_size::ImageSize;
use crate::instrument::{wrap_angle, Filter};
use crate::rotate::rotate_region;
use crate::scene::{compose_scene, Exclusion};
use crate::table::SourceTable;

/// A composed scene and the table of sources placed on it
#[derive(Debug, Clone)]
pub struct Scene {
    pub canvas: SceneCanvas,
    pub table: SourceTable,
}

impl Scene {
    pub fn new(canvas: SceneCanvas, table: SourceTable) -> Self {
        Self { canvas, table }
    }

    /// Compose a scene from catalogs, see [`compose_scene`]
    pub fn compose(
        point_sources: &Catalog,
        extended_sources: Option<&Catalog>,
        target_filter: Filter,
        background: f64,
        exclusion: &Exclusion,
        projector: &dyn SkyProjector,
    ) -> Result<Self> {
        let (canvas, table) = compose_scene(
            point_sources,
            extended_sources,
            target_filter,
            background,
            exclusion,
            projector,
        )?;
        Ok(Self { canvas, table })
    }
}

/// Everything that selects what one pipeline run produces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub mode: DispersionMode,
    pub options: DispersionOptions,
    pub region: Region,
    pub subarray: Subarray,
    /// Sweep worker threads, all cores when unset
    pub workers: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: DispersionMode::Soss {
                offset_to_acquisition: true,
            },
            options: DispersionOptions::default(),
            region: Region::Detector,
            subarray: Subarray::Full,
            workers: None,
        }
    }
}

impl PipelineConfig {
    /// Shape `(rows, cols)` of the frames this configuration produces
    pub fn frame_shape(&self) -> (usize, usize) {
        match self.region {
            Region::Scene => ImageSize::CANVAS.shape(),
            Region::Pom => ImageSize::POM.shape(),
            Region::Detector => self.subarray.shape(),
        }
    }
}

/// Output of the pipeline at one position angle
#[derive(Debug, Clone, PartialEq)]
pub struct AngleResult {
    /// Position angle in [0, 360)
    pub angle: f64,
    pub frame: Array2<f64>,
    /// Source positions in `frame`, tagged with `angle`
    pub table: SourceTable,
}

fn checked_angle(angle: f64) -> Result<f64> {
    if !angle.is_finite() {
        return Err(ConfigurationError::Invalid(format!(
            "Position angle {angle} is not a finite number of degrees"
        ))
        .into());
    }
    Ok(wrap_angle(angle))
}

/// Rotate, disperse and extract `scene` at one position angle.
///
/// Only the POM window read by the disperser is resampled. The table is
/// rotated with the scene, moved by the mode's acquisition shift and then
/// shifted by the extraction offsets.
pub fn run_single_angle(
    scene: &Scene,
    angle: f64,
    config: &PipelineConfig,
    disperser: &PreparedDisperser,
) -> Result<AngleResult> {
    let angle = checked_angle(angle)?;
    let mode = disperser.mode();

    let window = rotate_region(
        &scene.canvas.view(),
        angle,
        mode.window_origin(),
        ImageSize::POM.shape(),
    );
    let dispersed = disperser.disperse_window(&window.view())?;

    let mut table = scene.table.clone();
    table.rotate(angle, ImageSize::CANVAS);
    let (dx, dy) = mode.table_shift();
    table.shift(dx, dy);

    let frame = match config.region {
        Region::Scene => {
            let full = embed_pom_frame(&dispersed.view())?;
            extract(&full.view(), config.region, config.subarray, Some(&mut table))?
        }
        // The extractor reads the POM window directly at its canvas offset
        _ => extract(&dispersed.view(), config.region, config.subarray, Some(&mut table))?,
    };
    table.tag_position_angle(angle);
    debug!("PA {angle}: frame {:?}, {} sources", frame.dim(), table.len());
    Ok(AngleResult { angle, frame, table })
}

/// [`run_single_angle`] preparing the disperser for `config` first
pub fn simulate_angle(
    engine: &DispersionEngine,
    scene: &Scene,
    angle: f64,
    config: &PipelineConfig,
) -> Result<AngleResult> {
    checked_angle(angle)?;
    let disperser = engine.prepare(config.mode, &config.options)?;
    run_single_angle(scene, angle, config, &disperser)
}

/// Position angles that are skipped in a sweep
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum Visibility {
    #[default]
    All,
    /// Individual angles, compared after wrapping to [0, 360)
    ExcludeAngles(Vec<f64>),
    /// Closed ranges `(from, to)`; a range with `from > to` wraps through 0
    ExcludeRanges(Vec<(f64, f64)>),
}

const ANGLE_TOLERANCE: f64 = 1e-9;

impl Visibility {
    pub fn is_visible(&self, angle: f64) -> bool {
        let angle = wrap_angle(angle);
        match self {
            Visibility::All => true,
            Visibility::ExcludeAngles(excluded) => !excluded.iter().any(|&bad| {
                let diff = (wrap_angle(bad) - angle).abs();
                diff.min(360.0 - diff) < ANGLE_TOLERANCE
            }),
            Visibility::ExcludeRanges(ranges) => !ranges.iter().any(|&(from, to)| {
                let (from, to) = (wrap_angle(from), wrap_angle(to));
                if from <= to {
                    (from..=to).contains(&angle)
                } else {
                    angle >= from || angle <= to
                }
            }),
        }
    }
}

/// Angles `0, step, 2 step, ...` below 360
pub fn pa_grid(step: f64) -> Result<Vec<f64>> {
    if !(step.is_finite() && step > 0.0) {
        return Err(ConfigurationError::Invalid(format!(
            "Position angle step {step} must be a positive number of degrees"
        ))
        .into());
    }
    Ok((0..)
        .map(|i| i as f64 * step)
        .take_while(|angle| *angle < 360.0)
        .collect())
}

/// Per-angle results of a sweep, ordered by angle
#[derive(Debug)]
pub struct SweepResult {
    results: Vec<AngleResult>,
    failures: Vec<OverlapError>,
    frame_shape: (usize, usize),
}

impl SweepResult {
    /// Successful angles in ascending order
    pub fn results(&self) -> &[AngleResult] {
        &self.results
    }

    pub fn angles(&self) -> Vec<f64> {
        self.results.iter().map(|r| r.angle).collect()
    }

    /// One [`OverlapError::TaskFailure`] per angle that failed
    pub fn failures(&self) -> &[OverlapError] {
        &self.failures
    }

    /// Frames stacked along the first axis in the order of [`Self::angles`]
    pub fn stacked_frames(&self) -> Array3<f64> {
        let (rows, cols) = self.frame_shape;
        let mut stacked = Array3::zeros((self.results.len(), rows, cols));
        for (mut slot, result) in stacked.outer_iter_mut().zip(&self.results) {
            slot.assign(&result.frame);
        }
        stacked
    }

    /// All per-angle tables concatenated in angle order
    pub fn stacked_table(&self) -> SourceTable {
        SourceTable::stack(self.results.iter().map(|r| r.table.clone()))
    }

    /// Angle versus dispersion-direction map: each frame summed over its rows,
    /// ignoring NaN pixels. Row `i` belongs to `angles()[i]`.
    pub fn contamination_map(&self) -> Array2<f64> {
        let (_, cols) = self.frame_shape;
        let mut map = Array2::zeros((self.results.len(), cols));
        for (mut row, result) in map.outer_iter_mut().zip(&self.results) {
            let summed = result
                .frame
                .fold_axis(Axis(0), 0.0, |acc, v| if v.is_nan() { *acc } else { acc + v });
            row.assign(&summed);
        }
        map
    }
}

fn check_frame(result: AngleResult, shape: (usize, usize)) -> Result<AngleResult> {
    if result.frame.dim() != shape {
        return Err(GeometryError::WrongShape {
            what: "sweep frame",
            expected: ImageSize::from_width_height(shape.1, shape.0),
            got: ImageSize::of(&result.frame.view()),
        }
        .into());
    }
    Ok(result)
}

/// Run `task` for every angle on a pool of `workers` threads.
///
/// Results come back sorted by angle; failures are wrapped with their angle.
pub(crate) fn sweep_angles<T, P>(
    angles: &[f64],
    workers: Option<usize>,
    frame_shape: (usize, usize),
    progress: P,
    task: T,
) -> Result<SweepResult>
where
    T: Fn(f64) -> Result<AngleResult> + Sync,
    P: Fn(f64) + Sync,
{
    let threads = workers.unwrap_or_else(num_cpus::get).max(1);
    let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;
    info!("Sweeping {} position angles on {} threads", angles.len(), threads);

    let outcomes: Vec<(f64, Result<AngleResult>)> = pool.install(|| {
        angles
            .par_iter()
            .map(|&angle| {
                let outcome = task(angle).and_then(|result| check_frame(result, frame_shape));
                progress(angle);
                (angle, outcome)
            })
            .collect()
    });

    let mut results = Vec::with_capacity(outcomes.len());
    let mut failures = Vec::new();
    for (angle, outcome) in outcomes {
        match outcome {
            Ok(result) => results.push(result),
            Err(error) => {
                warn!("PA {angle} failed: {error}");
                failures.push(OverlapError::at_angle(angle, error));
            }
        }
    }
    results.sort_by(|a, b| a.angle.total_cmp(&b.angle));
    info!(
        "Sweep finished: {} angles, {} failed",
        results.len(),
        failures.len()
    );
    Ok(SweepResult {
        results,
        failures,
        frame_shape,
    })
}

/// Run the pipeline at every visible angle in parallel.
///
/// `progress` is called once per dispatched angle when it finishes,
/// from whichever worker ran it.
pub fn sweep<P>(
    engine: &DispersionEngine,
    scene: &Scene,
    angles: &[f64],
    visibility: &Visibility,
    config: &PipelineConfig,
    progress: P,
) -> Result<SweepResult>
where
    P: Fn(f64) + Sync,
{
    let wrapped = angles
        .iter()
        .map(|&angle| checked_angle(angle))
        .collect::<Result<Vec<_>>>()?;
    let visible: Vec<f64> = wrapped
        .into_iter()
        .filter(|&angle| visibility.is_visible(angle))
        .collect();
    if visible.len() < angles.len() {
        debug!("Skipping {} hidden angles", angles.len() - visible.len());
    }

    let disperser = engine.prepare(config.mode, &config.options)?;
    sweep_angles(&visible, config.workers, config.frame_shape(), progress, |angle| {
        run_single_angle(scene, angle, config, &disperser)
    })
}

/// Target-only frame at PA 0 and a sweep of the field without the target
#[derive(Debug)]
pub struct ContaminationStudy {
    pub target: AngleResult,
    pub field: SweepResult,
}

/// SOSS contamination of a target by the rest of its field.
///
/// `compose` builds a scene with the given exclusion; it is called once
/// keeping only `target_rows` and once without them. `config.mode` must be
/// a SOSS mode.
pub fn soss_contamination<C, P>(
    engine: &DispersionEngine,
    compose: C,
    target_rows: &[usize],
    angles: &[f64],
    visibility: &Visibility,
    config: &PipelineConfig,
    progress: P,
) -> Result<ContaminationStudy>
where
    C: Fn(&Exclusion) -> Result<Scene>,
    P: Fn(f64) + Sync,
{
    if !matches!(config.mode, DispersionMode::Soss { .. }) {
        return Err(ConfigurationError::Invalid(format!(
            "Contamination study needs a SOSS mode, got {}",
            config.mode
        ))
        .into());
    }
    let target_scene = compose(&Exclusion::KeepOnly(target_rows.to_vec()))?;
    let field_scene = compose(&Exclusion::Remove(target_rows.to_vec()))?;
    info!(
        "Contamination study: {} target and {} field sources",
        target_scene.table.len(),
        field_scene.table.len()
    );

    let target = simulate_angle(engine, &target_scene, 0.0, config)?;
    let field = sweep(engine, &field_scene, angles, visibility, config, progress)?;
    Ok(ContaminationStudy { target, field })
}
