//! Kernel library fixture shared by the unit tests.
//!
//! Every GR150 kernel is a 3x3 delta so a dispersed point stays a point, the
//! spot mask passes everything and the GR700XD kernel is a small trace split
//! into three row bands. The files are written once per test binary into a
//! temporary directory that lives as long as the process.

use std::sync::Arc;

use ndarray::{arr2, Array2};
use once_cell::sync::Lazy;
use tempfile::TempDir;

use crate::disperse::DispersionEngine;
use crate::instrument::{Filter, Grism, SPOT_MASK_SIZE};
use crate::kernel::KernelLibrary;

/// GR700XD fixture kernel; its maximum is at the centre sample `(2, 2)`
pub(crate) const FIXTURE_GR700_KERNEL: [[f64; 5]; 6] = [
    [0.0, 0.1, 0.2, 0.1, 0.0],
    [0.1, 0.2, 0.4, 0.2, 0.1],
    [0.2, 0.5, 1.0, 0.5, 0.2],
    [0.1, 0.2, 0.4, 0.2, 0.1],
    [0.0, 0.1, 0.2, 0.1, 0.0],
    [0.0, 0.0, 0.1, 0.0, 0.0],
];

struct Fixture {
    // Held so the directory outlives every test
    _dir: TempDir,
    library: Arc<KernelLibrary>,
}

static FIXTURE: Lazy<Fixture> = Lazy::new(|| {
    let dir = tempfile::tempdir().expect("fixture directory");
    let writer = KernelLibrary::new(dir.path());
    let delta = test_helpers::delta_kernel(3);
    for filter in Filter::ALL {
        for grism in Grism::ALL {
            writer
                .save_wfss_kernel(filter, grism, &delta.view())
                .expect("write WFSS fixture kernel");
        }
    }
    writer
        .save_spot_mask(&test_helpers::open_mask(SPOT_MASK_SIZE).view())
        .expect("write fixture mask");
    writer
        .save_gr700_tiles(&gr700_kernel().view(), 3)
        .expect("write GR700XD fixture tiles");
    Fixture {
        library: Arc::new(KernelLibrary::new(dir.path())),
        _dir: dir,
    }
});

pub(crate) fn gr700_kernel() -> Array2<f64> {
    arr2(&FIXTURE_GR700_KERNEL)
}

/// Engine over the shared fixture library
pub(crate) fn fixture_engine() -> DispersionEngine {
    DispersionEngine::new(Arc::clone(&FIXTURE.library))
}
