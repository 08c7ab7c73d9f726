//! Dispersion of rotated scenes into slitless spectroscopy frames.
//!
//! Both instrument modes read a 2322 pixel POM window out of the rotated
//! canvas, multiply the central 2048 pixels by the occulting spot mask,
//! convolve with the mode's trace kernel and scale by the grism throughput:
//!
//! - WFSS: GR150R/GR150C with one of six blocking filters, window at any
//!   lower-left corner that fits inside the canvas.
//! - SOSS: GR700XD, window at the POM offset, optionally after shifting the
//!   scene so the reference position lands on the target acquisition position.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info};
use ndarray::{s, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::canvas::check_canvas_shape;
use crate::convolve::{
    apply_spot_mask, check_throughput, direct_convolve_same, masked_convolve_with, uses_direct,
    ConvolutionMethod, FftConvolver,
};
use crate::error::{GeometryError, Result};
use crate::image_size::ImageSize;
use crate::instrument::{
    Filter, Grism, DEFAULT_THROUGHPUT, POM_OFFSET, POM_SIZE, SOSS_ACQUISITION_SHIFT,
};
use crate::kernel::{Kernel, KernelLibrary};

/// Instrument mode a scene is dispersed with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum DispersionMode {
    /// GR150 wide field slitless spectroscopy, read out at the POM window
    Wfss { filter: Filter, grism: Grism },
    /// GR700XD single object slitless spectroscopy
    Soss { offset_to_acquisition: bool },
}

impl DispersionMode {
    /// WFSS mode from user-supplied names
    pub fn wfss_by_name(filter: &str, grism: &str) -> Result<Self> {
        Ok(DispersionMode::Wfss {
            filter: filter.parse()?,
            grism: grism.parse()?,
        })
    }

    /// `(row, col)` of the rotated canvas that becomes the first pixel of the
    /// dispersed POM window.
    ///
    /// The acquisition shift moves content by `(174, 930)` before the POM
    /// crop, so reading the shifted window is the same as reading the
    /// unshifted canvas that much further up and to the left.
    pub fn window_origin(&self) -> (usize, usize) {
        match self {
            DispersionMode::Soss {
                offset_to_acquisition: true,
            } => (
                POM_OFFSET - SOSS_ACQUISITION_SHIFT.0,
                POM_OFFSET - SOSS_ACQUISITION_SHIFT.1,
            ),
            _ => (POM_OFFSET, POM_OFFSET),
        }
    }

    /// Pixel shift `(dx, dy)` that carries rotated canvas coordinates into
    /// the canvas frame the dispersed window is embedded in.
    pub fn table_shift(&self) -> (f64, f64) {
        match self {
            DispersionMode::Soss {
                offset_to_acquisition: true,
            } => (SOSS_ACQUISITION_SHIFT.1 as f64, SOSS_ACQUISITION_SHIFT.0 as f64),
            _ => (0.0, 0.0),
        }
    }
}

impl std::fmt::Display for DispersionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispersionMode::Wfss { filter, grism } => write!(f, "WFSS {filter}/{grism}"),
            DispersionMode::Soss {
                offset_to_acquisition,
            } => write!(f, "SOSS (acquisition offset: {offset_to_acquisition})"),
        }
    }
}

/// Settings shared by both dispersion modes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispersionOptions {
    /// Grism efficiency applied after convolution
    pub throughput: f64,
    /// Kernel file used instead of the library's default for the mode
    pub kernel_override: Option<PathBuf>,
    pub method: ConvolutionMethod,
}

impl Default for DispersionOptions {
    fn default() -> Self {
        Self {
            throughput: DEFAULT_THROUGHPUT,
            kernel_override: None,
            method: ConvolutionMethod::Auto,
        }
    }
}

/// Disperses rotated canvases with kernels from a shared library
#[derive(Debug, Clone)]
pub struct DispersionEngine {
    library: Arc<KernelLibrary>,
}

impl DispersionEngine {
    pub fn new(library: Arc<KernelLibrary>) -> Self {
        Self { library }
    }

    pub fn library(&self) -> &Arc<KernelLibrary> {
        &self.library
    }

    fn kernel_for(&self, mode: &DispersionMode, kernel_override: Option<&Path>) -> Result<Arc<Kernel>> {
        let kernel = match (mode, kernel_override) {
            (DispersionMode::Wfss { .. }, Some(path)) => Arc::new(Kernel::load(path)?),
            (DispersionMode::Wfss { filter, grism }, None) => {
                self.library.get_wfss_kernel(*filter, *grism)?
            }
            (DispersionMode::Soss { .. }, path) => self.library.get_gr700_kernel(path)?,
        };
        Ok(kernel)
    }

    /// Disperse the 2322 pixel window with lower-left corner `(x0, y0)` of a
    /// rotated canvas with a GR150 kernel.
    ///
    /// Names are checked first, then the canvas shape, then the window. A
    /// window that touches the canvas edge exactly is accepted.
    pub fn disperse_wfss(
        &self,
        canvas: &ArrayView2<f64>,
        filter: &str,
        grism: &str,
        corner: (i64, i64),
        options: &DispersionOptions,
    ) -> Result<Array2<f64>> {
        let mode = DispersionMode::wfss_by_name(filter, grism)?;
        check_canvas_shape(canvas)?;
        let (x0, y0) = corner;
        let (row, col) = checked_window(canvas, x0, y0)?;
        check_throughput(options.throughput)?;

        let kernel = self.kernel_for(&mode, options.kernel_override.as_deref())?;
        let mask = self.library.spot_mask()?;
        info!("Dispersing {mode} window at ({x0}, {y0})");
        masked_convolve_with(
            &canvas.slice(s![row..row + POM_SIZE, col..col + POM_SIZE]),
            &mask.view(),
            &kernel.view(),
            options.throughput,
            options.method,
        )
    }

    /// Disperse a rotated canvas with the GR700XD kernel.
    ///
    /// With `offset_to_acquisition` the scene is first moved 174 rows and
    /// 930 columns (`new[174.., 930..] = old[..4057, ..3301]`) so the
    /// reference position falls on the acquisition position.
    pub fn disperse_soss(
        &self,
        canvas: &ArrayView2<f64>,
        offset_to_acquisition: bool,
        options: &DispersionOptions,
    ) -> Result<Array2<f64>> {
        check_canvas_shape(canvas)?;
        let mode = DispersionMode::Soss {
            offset_to_acquisition,
        };
        self.prepare(mode, options)?.disperse(canvas)
    }

    /// Disperse with either mode, WFSS reading the POM window
    pub fn disperse(
        &self,
        canvas: &ArrayView2<f64>,
        mode: DispersionMode,
        options: &DispersionOptions,
    ) -> Result<Array2<f64>> {
        check_canvas_shape(canvas)?;
        self.prepare(mode, options)?.disperse(canvas)
    }

    /// Load the kernel and mask for `mode` and precompute what repeated
    /// dispersions of POM windows share.
    pub fn prepare(&self, mode: DispersionMode, options: &DispersionOptions) -> Result<PreparedDisperser> {
        check_throughput(options.throughput)?;
        let kernel = self.kernel_for(&mode, options.kernel_override.as_deref())?;
        let mask = self.library.spot_mask()?;
        let field = ImageSize::POM.shape();
        let convolver = if uses_direct(options.method, field, kernel.dim()) {
            debug!("Direct convolution for {mode} with kernel {:?}", kernel.dim());
            None
        } else {
            let convolver = FftConvolver::new(field, &kernel.view())?;
            debug!(
                "FFT convolution for {mode}, transform {:?}",
                convolver.transform_shape()
            );
            Some(convolver)
        };
        Ok(PreparedDisperser {
            mode,
            kernel,
            mask,
            convolver,
            throughput: options.throughput,
        })
    }
}

/// Row and column of a WFSS window, or the reason it does not fit
fn checked_window(canvas: &ArrayView2<f64>, x0: i64, y0: i64) -> Result<(usize, usize), GeometryError> {
    let canvas_size = ImageSize::of(canvas);
    let side = POM_SIZE as i64;
    let fits = x0 >= 0
        && y0 >= 0
        && x0 + side <= canvas_size.width as i64
        && y0 + side <= canvas_size.height as i64;
    if !fits {
        return Err(GeometryError::WindowOutOfBounds {
            x0,
            y0,
            size: ImageSize::POM,
            canvas: canvas_size,
        });
    }
    Ok((y0 as usize, x0 as usize))
}

/// Kernel, mask and kernel spectrum for one mode, ready to disperse any
/// number of windows. Shared read-only between sweep workers.
#[derive(Debug)]
pub struct PreparedDisperser {
    mode: DispersionMode,
    kernel: Arc<Kernel>,
    mask: Arc<Array2<f64>>,
    convolver: Option<FftConvolver>,
    throughput: f64,
}

impl PreparedDisperser {
    pub fn mode(&self) -> DispersionMode {
        self.mode
    }

    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    /// Disperse a full rotated canvas
    pub fn disperse(&self, canvas: &ArrayView2<f64>) -> Result<Array2<f64>> {
        check_canvas_shape(canvas)?;
        let (row, col) = self.mode.window_origin();
        info!("Dispersing {}", self.mode);
        self.disperse_window(&canvas.slice(s![row..row + POM_SIZE, col..col + POM_SIZE]))
    }

    /// Disperse a POM window already cut from the rotated canvas at
    /// [`DispersionMode::window_origin`].
    pub fn disperse_window(&self, window: &ArrayView2<f64>) -> Result<Array2<f64>> {
        let got = ImageSize::of(window);
        if got != ImageSize::POM {
            return Err(GeometryError::WrongShape {
                what: "POM window",
                expected: ImageSize::POM,
                got,
            }
            .into());
        }
        let mut masked = window.to_owned();
        apply_spot_mask(&mut masked, &self.mask.view())?;
        let mut out = match &self.convolver {
            Some(convolver) => convolver.convolve(&masked.view())?,
            None => direct_convolve_same(&masked.view(), &self.kernel.view()),
        };
        out *= self.throughput;
        Ok(out)
    }
}

/// Move canvas content to the SOSS acquisition position, filling the
/// uncovered rows and columns with zero.
pub fn shift_to_acquisition(canvas: &ArrayView2<f64>) -> Result<Array2<f64>, GeometryError> {
    check_canvas_shape(canvas)?;
    let (dr, dc) = SOSS_ACQUISITION_SHIFT;
    let (rows, cols) = canvas.dim();
    let mut shifted = Array2::zeros((rows, cols));
    shifted
        .slice_mut(s![dr.., dc..])
        .assign(&canvas.slice(s![..rows - dr, ..cols - dc]));
    Ok(shifted)
}

/// Place a dispersed POM window into an otherwise empty full-size canvas
pub fn embed_pom_frame(window: &ArrayView2<f64>) -> Result<Array2<f64>, GeometryError> {
    let got = ImageSize::of(window);
    if got != ImageSize::POM {
        return Err(GeometryError::WrongShape {
            what: "POM window",
            expected: ImageSize::POM,
            got,
        });
    }
    let mut frame = ImageSize::CANVAS.zeros();
    frame
        .slice_mut(s![POM_OFFSET..POM_OFFSET + POM_SIZE, POM_OFFSET..POM_OFFSET + POM_SIZE])
        .assign(window);
    Ok(frame)
}
