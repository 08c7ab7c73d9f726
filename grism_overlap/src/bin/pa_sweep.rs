//! Position angle sweep of a NIRISS field
//!
//! Composes the scene for a source catalog, disperses it at every position
//! angle of a grid and writes the angle versus dispersion-direction
//! contamination map.
//!
//! # Usage
//!
//! ```bash
//! # SOSS sweep every 10 degrees, SUBSTRIP256 read-out
//! cargo run --release --bin pa_sweep -- --catalog field.list \
//!     --kernel-dir kernels --subarray SUBSTRIP256
//!
//! # Contamination of catalog rows 0 and 1 by the rest of the field,
//! # skipping angles where the target cannot be observed
//! cargo run --release --bin pa_sweep -- --catalog field.list \
//!     --target 0 --target 1 --exclude-pa 170 --exclude-pa 190
//!
//! # WFSS with GR150C, settings from a file
//! cargo run --release --bin pa_sweep -- --config run.json --grism GR150C
//! ```
//!
//! # Outputs
//!
//! Written to `--output` (default `pa_sweep_output/`):
//! - `contamination_map.fits`: one row per swept angle, ascending
//! - `angles.json`: the angle of each map row
//! - `sources.json`: source positions in every frame, tagged by angle
//! - `target_frame.fits`: target-only frame at PA 0, with `--target`

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use grism_overlap::fits::write_image;
use grism_overlap::catalog::{parse_sky_position, Catalog, SkyPosition};
use grism_overlap::pipeline::{soss_contamination, sweep, Scene, SweepResult};
use grism_overlap::{
    DispersionEngine, DispersionMode, Filter, Grism, KernelLibrary, Region, SimulationConfig,
    Subarray,
};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};

/// Command line arguments for the position angle sweep
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Sweep a NIRISS field over position angle and map spectral contamination",
    long_about = None
)]
struct Args {
    #[arg(short, long, help = "JSON settings file; flags below override it")]
    config: Option<PathBuf>,

    #[arg(long, help = "Point source catalog (Mirage ascii)")]
    catalog: Option<PathBuf>,

    #[arg(long, help = "Extended source catalog (Mirage ascii)")]
    extended_catalog: Option<PathBuf>,

    #[arg(
        long,
        value_parser = parse_sky_position,
        help = "Field centre as \"ra, dec\" in degrees, catalog mean if omitted"
    )]
    pointing: Option<SkyPosition>,

    #[arg(long, help = "Directory with kernels and the spot mask")]
    kernel_dir: Option<PathBuf>,

    #[arg(short, long, help = "Filter the scene is composed in")]
    filter: Option<Filter>,

    #[arg(
        short,
        long,
        help = "Use WFSS with this GR150 grism instead of SOSS",
        long_help = "Disperse with the GR150R or GR150C grism behind --filter. \
            Without this flag the GR700XD (SOSS) kernel is used."
    )]
    grism: Option<Grism>,

    #[arg(long, help = "SOSS: keep the scene at the reference position")]
    no_acquisition_offset: bool,

    #[arg(long, value_enum, help = "Read-out region")]
    region: Option<Region>,

    #[arg(long, value_enum, help = "Detector sub-array")]
    subarray: Option<Subarray>,

    #[arg(long, help = "Background level added to the scene")]
    background: Option<f64>,

    #[arg(long, help = "Grism throughput")]
    throughput: Option<f64>,

    #[arg(long, help = "Position angle step in degrees")]
    pa_step: Option<f64>,

    #[arg(long = "exclude-pa", help = "Position angle to skip, repeatable")]
    exclude_pa: Vec<f64>,

    #[arg(
        long,
        help = "Catalog row of the target, repeatable",
        long_help = "Run a contamination study: the target rows are dispersed alone \
            at PA 0 and the sweep uses the field without them. Needs SOSS."
    )]
    target: Vec<usize>,

    #[arg(short, long, help = "Worker threads, all cores by default")]
    workers: Option<usize>,

    #[arg(short, long, default_value = "pa_sweep_output", help = "Output directory")]
    output: PathBuf,

    #[arg(long, help = "Write the effective settings to this JSON file")]
    save_config: Option<PathBuf>,
}

impl Args {
    fn apply(&self, config: &mut SimulationConfig) {
        if let Some(path) = &self.catalog {
            config.point_catalog = path.clone();
        }
        if let Some(path) = &self.extended_catalog {
            config.extended_catalog = Some(path.clone());
        }
        if self.pointing.is_some() {
            config.pointing = self.pointing;
        }
        if let Some(dir) = &self.kernel_dir {
            config.kernel_dir = dir.clone();
        }
        if let Some(filter) = self.filter {
            config.filter = filter;
            if let DispersionMode::Wfss { filter: mode_filter, .. } = &mut config.pipeline.mode {
                *mode_filter = filter;
            }
        }
        if let Some(grism) = self.grism {
            config.pipeline.mode = DispersionMode::Wfss {
                filter: config.filter,
                grism,
            };
        } else if self.no_acquisition_offset {
            config.pipeline.mode = DispersionMode::Soss {
                offset_to_acquisition: false,
            };
        }
        if let Some(region) = self.region {
            config.pipeline.region = region;
        }
        if let Some(subarray) = self.subarray {
            config.pipeline.subarray = subarray;
        }
        if let Some(background) = self.background {
            config.background = background;
        }
        if let Some(throughput) = self.throughput {
            config.pipeline.options.throughput = throughput;
        }
        if let Some(step) = self.pa_step {
            config.pa_step = step;
        }
        config.excluded_angles.extend(&self.exclude_pa);
        if self.workers.is_some() {
            config.pipeline.workers = self.workers;
        }
    }
}

fn progress_bar(len: usize) -> Result<ProgressBar, Box<dyn std::error::Error>> {
    let style = ProgressStyle::default_bar()
        .template("{msg}: [{wide_bar:.blue}] {pos:>3}/{len:3} angles ({elapsed_precise}<{eta_precise})")?
        .progress_chars("=> ");
    Ok(ProgressBar::new(len as u64)
        .with_style(style)
        .with_message("Sweeping"))
}

fn write_sweep(output: &std::path::Path, result: &SweepResult) -> Result<(), Box<dyn std::error::Error>> {
    let map = result.contamination_map();
    write_image(&output.join("contamination_map.fits"), &map.view())?;
    fs::write(
        output.join("angles.json"),
        serde_json::to_string_pretty(&result.angles())?,
    )?;
    fs::write(
        output.join("sources.json"),
        serde_json::to_string_pretty(&result.stacked_table())?,
    )?;
    info!(
        "Wrote {}x{} contamination map to {}",
        map.nrows(),
        map.ncols(),
        output.display()
    );
    for failure in result.failures() {
        warn!("{failure}");
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => SimulationConfig::load(path)?,
        None => SimulationConfig::default(),
    };
    args.apply(&mut config);
    config.validate()?;
    if let Some(path) = &args.save_config {
        config.save(path)?;
    }

    let points = Catalog::load(&config.point_catalog)?;
    let extended = config
        .extended_catalog
        .as_deref()
        .map(Catalog::load)
        .transpose()?;
    let projector = config.projector(&points)?;
    let centre = config.field_centre(&points)?;
    info!(
        "Field centre {centre}, {} point sources, mode {}",
        points.len(),
        config.pipeline.mode
    );

    let engine = DispersionEngine::new(Arc::new(KernelLibrary::new(&config.kernel_dir)));
    let angles = config.angles()?;
    let visibility = config.visibility();
    let visible = angles.iter().filter(|&&a| visibility.is_visible(a)).count();

    let compose = |exclusion: &grism_overlap::Exclusion| {
        Scene::compose(
            &points,
            extended.as_ref(),
            config.filter,
            config.background,
            exclusion,
            &projector,
        )
    };

    fs::create_dir_all(&args.output)?;
    let bar = progress_bar(visible)?;
    let on_angle = |_angle: f64| bar.inc(1);

    if args.target.is_empty() {
        let scene = compose(&config.exclusion)?;
        let result = sweep(&engine, &scene, &angles, &visibility, &config.pipeline, on_angle)?;
        bar.finish_with_message("Done");
        write_sweep(&args.output, &result)?;
    } else {
        let study = soss_contamination(
            &engine,
            compose,
            &args.target,
            &angles,
            &visibility,
            &config.pipeline,
            on_angle,
        )?;
        bar.finish_with_message("Done");
        write_image(&args.output.join("target_frame.fits"), &study.target.frame.view())?;
        write_sweep(&args.output, &study.field)?;
    }

    Ok(())
}
