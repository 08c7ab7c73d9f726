//! Instrument kernels and the occulting spot mask.
//!
//! Kernel files live in one directory and are found by name:
//!
//! | content                       | file                               |
//! |-------------------------------|------------------------------------|
//! | GR150 trace, filter + grism   | `f200w_gr150r_psfimage.fits`       |
//! | GR700XD kernel, single file   | `gr700xd_psfimage.fits`            |
//! | GR700XD kernel, row bands     | `gr700xd_psfimage00.fits`, `01`... |
//! | occulting spot mask           | `occulting_spots_mask.fits`        |
//!
//! The GR700XD kernel is 8192 pixels square and is normally shipped as row
//! bands that are stacked back together in index order. Each kernel is read
//! at most once per library and then shared as an `Arc`; concurrent first
//! requests block on a single load instead of racing.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info};
use ndarray::{concatenate, s, Array2, ArrayView2, Axis};
use once_cell::sync::OnceCell;
use rayon::prelude::*;

use crate::fits::{read_image, write_image};
use crate::error::{GeometryError, KernelError, Result};
use crate::instrument::{Filter, Grism};

/// Stem shared by the GR700XD kernel files
pub const GR700XD_STEM: &str = "gr700xd_psfimage";

/// File name of the occulting spot mask
pub const SPOT_MASK_FILE: &str = "occulting_spots_mask.fits";

/// An immutable, non-negative response image
#[derive(Debug, Clone, PartialEq)]
pub struct Kernel {
    data: Array2<f64>,
    source: Option<PathBuf>,
}

impl Kernel {
    /// Wrap an in-memory array; values must be finite and non-negative
    pub fn new(data: Array2<f64>) -> Result<Self, KernelError> {
        Self::checked(data, None)
    }

    fn checked(data: Array2<f64>, source: Option<PathBuf>) -> Result<Self, KernelError> {
        if !data.par_iter().all(|v| v.is_finite() && *v >= 0.0) {
            return Err(KernelError::InvalidValues(
                source.unwrap_or_else(|| PathBuf::from("<memory>")),
            ));
        }
        Ok(Self { data, source })
    }

    /// Read a kernel file
    pub fn load(path: &Path) -> Result<Self, KernelError> {
        let data = read_image(path)?;
        let kernel = Self::checked(data, Some(path.to_path_buf()))?;
        info!("Loaded kernel {} ({:?})", path.display(), kernel.dim());
        Ok(kernel)
    }

    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    pub fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// File the kernel was read from, if any
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

/// Lazily loaded, cached kernels for every instrument mode
#[derive(Debug, Default)]
pub struct KernelLibrary {
    root: PathBuf,
    wfss: [[OnceCell<Arc<Kernel>>; 2]; 6],
    gr700xd: OnceCell<Arc<Kernel>>,
    spot_mask: OnceCell<Arc<Array2<f64>>>,
}

impl KernelLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the GR150 kernel for a filter and grism
    pub fn wfss_path(&self, filter: Filter, grism: Grism) -> PathBuf {
        self.root.join(format!(
            "{}_{}_psfimage.fits",
            filter.name().to_ascii_lowercase(),
            grism.name().to_ascii_lowercase()
        ))
    }

    /// Path of the single-file GR700XD kernel
    pub fn gr700xd_path(&self) -> PathBuf {
        self.root.join(format!("{GR700XD_STEM}.fits"))
    }

    /// Path of GR700XD row band `index`
    pub fn gr700xd_tile_path(&self, index: usize) -> PathBuf {
        tile_path(&self.root, index)
    }

    /// Write a GR150 kernel under its conventional name.
    ///
    /// Kernels already cached by this library are not replaced.
    pub fn save_wfss_kernel(&self, filter: Filter, grism: Grism, kernel: &ArrayView2<f64>) -> Result<PathBuf> {
        let path = self.wfss_path(filter, grism);
        write_image(&path, kernel)?;
        Ok(path)
    }

    /// Write the GR700XD kernel as `tiles` row bands
    pub fn save_gr700_tiles(&self, kernel: &ArrayView2<f64>, tiles: usize) -> Result<Vec<PathBuf>> {
        save_kernel_tiles(kernel, &self.root, tiles)
    }

    pub fn save_spot_mask(&self, mask: &ArrayView2<f64>) -> Result<PathBuf> {
        let path = self.root.join(SPOT_MASK_FILE);
        write_image(&path, mask)?;
        Ok(path)
    }

    /// GR150 kernel for a filter and grism, read on first use
    pub fn get_wfss_kernel(&self, filter: Filter, grism: Grism) -> Result<Arc<Kernel>, KernelError> {
        let cell = &self.wfss[filter.index()][grism.index()];
        if let Some(kernel) = cell.get() {
            debug!("Kernel cache hit for {filter} {grism}");
            return Ok(Arc::clone(kernel));
        }
        cell.get_or_try_init(|| Kernel::load(&self.wfss_path(filter, grism)).map(Arc::new))
            .cloned()
    }

    /// [`Self::get_wfss_kernel`] taking names, as entered by a user
    pub fn get_wfss_kernel_by_name(&self, filter: &str, grism: &str) -> Result<Arc<Kernel>> {
        let filter: Filter = filter.parse()?;
        let grism: Grism = grism.parse()?;
        Ok(self.get_wfss_kernel(filter, grism)?)
    }

    /// GR700XD kernel.
    ///
    /// An override path is read as a complete kernel and not cached. Otherwise
    /// the single-file copy is used if it exists, and failing that the kernel
    /// is stacked from its row bands.
    pub fn get_gr700_kernel(&self, override_path: Option<&Path>) -> Result<Arc<Kernel>, KernelError> {
        if let Some(path) = override_path {
            return Kernel::load(path).map(Arc::new);
        }
        self.gr700xd
            .get_or_try_init(|| {
                let full = self.gr700xd_path();
                if full.is_file() {
                    Kernel::load(&full)
                } else {
                    let data = load_tiles(&self.root)?;
                    let kernel = Kernel::checked(data, Some(full))?;
                    info!("Stacked GR700XD kernel {:?} from tiles", kernel.dim());
                    Ok(kernel)
                }
                .map(Arc::new)
            })
            .cloned()
    }

    /// Occulting spot mask, read on first use
    pub fn spot_mask(&self) -> Result<Arc<Array2<f64>>, KernelError> {
        self.spot_mask
            .get_or_try_init(|| {
                let path = self.root.join(SPOT_MASK_FILE);
                let mask = read_image(&path)?;
                if !mask.iter().all(|v| v.is_finite()) {
                    return Err(KernelError::InvalidValues(path));
                }
                info!("Loaded spot mask {:?}", mask.dim());
                Ok(Arc::new(mask))
            })
            .cloned()
    }
}

fn tile_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("{GR700XD_STEM}{index:02}.fits"))
}

/// Index of a GR700XD tile file name, `gr700xd_psfimage07` -> 7
fn tile_index(file_name: &str) -> Option<usize> {
    let digits = file_name
        .strip_prefix(GR700XD_STEM)?
        .strip_suffix(".fits")?;
    if digits.len() < 2 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Indices of the GR700XD tile files present in `dir`, ascending
fn tile_indices(dir: &Path) -> Result<Vec<usize>, KernelError> {
    let entries = fs::read_dir(dir).map_err(|source| KernelError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut indices: Vec<usize> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().to_str().and_then(tile_index))
        .collect();
    indices.sort_unstable();
    indices.dedup();
    Ok(indices)
}

/// Stack the GR700XD row bands in `dir` in index order.
///
/// Tiles must be numbered contiguously from 00 and all have the same width.
pub fn load_tiles(dir: &Path) -> Result<Array2<f64>, KernelError> {
    let indices = tile_indices(dir)?;

    if indices.is_empty() {
        return Err(KernelError::MissingTiles(dir.join(GR700XD_STEM)));
    }
    if let Some(missing) = indices.iter().enumerate().find(|(i, index)| i != *index).map(|(i, _)| i) {
        return Err(KernelError::TileGap {
            stem: GR700XD_STEM.to_string(),
            missing,
        });
    }

    let tiles = indices
        .iter()
        .map(|&index| read_image(&tile_path(dir, index)))
        .collect::<Result<Vec<_>, _>>()?;

    let width = tiles[0].ncols();
    if let Some((index, tile)) = tiles.iter().enumerate().find(|(_, t)| t.ncols() != width) {
        return Err(KernelError::TileWidthMismatch {
            index,
            expected: width,
            got: tile.ncols(),
        });
    }

    let views: Vec<ArrayView2<f64>> = tiles.iter().map(|t| t.view()).collect();
    debug!("Stacking {} kernel tiles of width {width}", views.len());
    concatenate(Axis(0), &views).map_err(|_| KernelError::TileWidthMismatch {
        index: 0,
        expected: width,
        got: width,
    })
}

/// Split `kernel` into `tiles` equal row bands and write them as GR700XD
/// tile files in `dir`, replacing any tiles already there. Returns the
/// written paths in index order.
pub fn save_kernel_tiles(kernel: &ArrayView2<f64>, dir: &Path, tiles: usize) -> Result<Vec<PathBuf>> {
    let rows = kernel.nrows();
    if tiles == 0 || rows % tiles != 0 {
        return Err(GeometryError::UnevenTiles { rows, tiles }.into());
    }
    let band = rows / tiles;

    // A previous split into more bands would otherwise leave its tail behind
    for index in tile_indices(dir)? {
        let path = tile_path(dir, index);
        fs::remove_file(&path).map_err(|source| KernelError::Io { path, source })?;
    }

    let mut paths = Vec::with_capacity(tiles);
    for index in 0..tiles {
        let path = tile_path(dir, index);
        write_image(&path, &kernel.slice(s![index * band..(index + 1) * band, ..]))?;
        paths.push(path);
    }
    info!("Wrote {} kernel tiles of {} rows to {}", tiles, band, dir.display());
    Ok(paths)
}
