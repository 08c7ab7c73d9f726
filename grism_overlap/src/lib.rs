//! NIRISS slitless spectroscopy overlap simulation
//!
//! This crate builds a fixed-size sky scene from point and extended source
//! catalogs, rotates it to a telescope position angle, disperses it with the
//! instrument trace kernels and trims the result to the detector read-out
//! regions. Sweeping the position angle produces the contamination-versus-angle
//! data used to pick a roll angle where spectra do not overlap.

pub mod astrometry;
pub mod canvas;
pub mod catalog;
pub mod config;
pub mod convolve;
pub mod disperse;
pub mod error;
pub mod extract;
pub mod fits;
pub mod image_size;
pub mod instrument;
pub mod kernel;
pub mod pipeline;
pub mod rotate;
pub mod scene;
pub mod table;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for easier access
pub use astrometry::{SkyProjector, TangentPlaneProjector};
pub use canvas::SceneCanvas;
pub use catalog::{parse_sky_position, Catalog, CatalogProvider, SkyPosition};
pub use config::SimulationConfig;
pub use convolve::{masked_convolve, ConvolutionMethod, FftConvolver};
pub use disperse::{
    embed_pom_frame, shift_to_acquisition, DispersionEngine, DispersionMode, DispersionOptions,
    PreparedDisperser,
};
pub use error::{ConfigurationError, GeometryError, OverlapError, Result};
pub use extract::{extract, Region, Subarray};
pub use image_size::ImageSize;
pub use instrument::{Filter, Grism};
pub use kernel::{Kernel, KernelLibrary};
pub use pipeline::{
    pa_grid, run_single_angle, simulate_angle, soss_contamination, sweep, AngleResult,
    ContaminationStudy, PipelineConfig, Scene, SweepResult, Visibility,
};
pub use rotate::{rotate, rotate_image};
pub use scene::{compose_scene, compose_scene_from_files, Exclusion};
pub use table::{SourceRecord, SourceTable};
