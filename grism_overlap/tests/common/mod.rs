//! Fixtures shared by the integration tests

#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use grism_overlap::instrument::SPOT_MASK_SIZE;
use grism_overlap::{Catalog, DispersionEngine, Filter, Grism, KernelLibrary, SkyProjector};
use ndarray::Array2;
use tempfile::TempDir;
use test_helpers::{mirage_catalog_text, open_mask, trace_kernel, CatalogRow};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Kernel directory with every file the engine can ask for
pub struct KernelFixture {
    pub dir: TempDir,
    pub library: Arc<KernelLibrary>,
}

impl KernelFixture {
    /// Same kernel for every GR150 pair; GR700XD written as `tiles` bands
    pub fn new(wfss: &Array2<f64>, gr700: &Array2<f64>, tiles: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let library = KernelLibrary::new(dir.path());
        for filter in Filter::ALL {
            for grism in Grism::ALL {
                library.save_wfss_kernel(filter, grism, &wfss.view()).unwrap();
            }
        }
        library
            .save_spot_mask(&open_mask(SPOT_MASK_SIZE).view())
            .unwrap();
        library.save_gr700_tiles(&gr700.view(), tiles).unwrap();
        Self {
            library: Arc::new(library),
            dir,
        }
    }

    /// Short dispersed traces for both modes
    pub fn traces() -> Self {
        Self::new(&trace_kernel(5, 41), &trace_kernel(9, 61), 3)
    }

    pub fn engine(&self) -> DispersionEngine {
        DispersionEngine::new(Arc::clone(&self.library))
    }
}

/// Write a point-source catalog and return its path
pub fn write_catalog(dir: &TempDir, name: &str, rows: &[CatalogRow]) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, mirage_catalog_text(rows)).unwrap();
    path
}

/// Catalog row with an F200W magnitude only
pub fn f200w_row(index: i64, ra: f64, dec: f64, magnitude: f64) -> CatalogRow {
    CatalogRow {
        index,
        ra,
        dec,
        magnitudes: vec![("F200W", magnitude)],
    }
}

/// Projector treating (ra, dec) as offsets in pixels from `origin` (x, y)
pub fn pixel_projector(origin: (f64, f64)) -> impl SkyProjector {
    (
        move |ra: f64, dec: f64| Some((origin.0 + ra, origin.1 + dec)),
        (0.0, 0.0),
    )
}

pub fn load(path: &std::path::Path) -> Catalog {
    Catalog::load(path).unwrap()
}

/// Index of the largest value
pub fn peak(frame: &Array2<f64>) -> (usize, usize) {
    frame
        .indexed_iter()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(index, _)| index)
        .unwrap()
}
