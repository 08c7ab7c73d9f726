//! Kernel reconstruction from row-band tiles

mod common;

use std::sync::Arc;

use grism_overlap::fits::{read_image, write_image};
use grism_overlap::error::KernelError;
use grism_overlap::{ConfigurationError, Filter, Grism, KernelLibrary, OverlapError};
use rstest::rstest;
use test_helpers::trace_kernel;

#[rstest]
#[case(1)]
#[case(2)]
#[case(4)]
#[case(8)]
#[case(16)]
fn tiles_match_single_file(#[case] tiles: usize) {
    common::init_logging();
    let kernel = trace_kernel(64, 48);

    let tiled_dir = tempfile::tempdir().unwrap();
    let tiled = KernelLibrary::new(tiled_dir.path());
    tiled.save_gr700_tiles(&kernel.view(), tiles).unwrap();

    let single_dir = tempfile::tempdir().unwrap();
    let single = KernelLibrary::new(single_dir.path());
    write_image(&single.gr700xd_path(), &kernel.view()).unwrap();

    let from_tiles = tiled.get_gr700_kernel(None).unwrap();
    let from_file = single.get_gr700_kernel(None).unwrap();
    // Bit-for-bit equality, not a tolerance
    assert_eq!(from_tiles.view(), from_file.view());
    assert_eq!(from_tiles.view(), kernel.view());
}

#[test]
fn tile_count_does_not_change_result() {
    let kernel = trace_kernel(48, 30);
    let loaded: Vec<_> = [1, 3, 6, 12, 48]
        .into_iter()
        .map(|tiles| {
            let dir = tempfile::tempdir().unwrap();
            let library = KernelLibrary::new(dir.path());
            library.save_gr700_tiles(&kernel.view(), tiles).unwrap();
            library.get_gr700_kernel(None).unwrap().view().to_owned()
        })
        .collect();
    assert!(loaded.windows(2).all(|pair| pair[0] == pair[1]));
}

#[test]
fn resplit_in_place_loads_latest_kernel() {
    let dir = tempfile::tempdir().unwrap();
    let original = trace_kernel(48, 30);
    KernelLibrary::new(dir.path())
        .save_gr700_tiles(&original.view(), 8)
        .unwrap();

    let replacement = original.mapv(|v| v * 3.0);
    let library = KernelLibrary::new(dir.path());
    let paths = library.save_gr700_tiles(&replacement.view(), 3).unwrap();
    assert_eq!(paths.len(), 3);

    let loaded = library.get_gr700_kernel(None).unwrap();
    assert_eq!(loaded.dim(), (48, 30));
    assert_eq!(loaded.view(), replacement.view());
}

#[test]
fn saved_files_are_fits_images() {
    let dir = tempfile::tempdir().unwrap();
    let library = KernelLibrary::new(dir.path());
    let kernel = trace_kernel(12, 20);

    let path = library
        .save_wfss_kernel(Filter::F200W, Grism::GR150R, &kernel.view())
        .unwrap();
    assert_eq!(path.extension().and_then(|e| e.to_str()), Some("fits"));
    let header = std::fs::read(&path).unwrap();
    assert!(header.starts_with(b"SIMPLE  ="));

    assert_eq!(read_image(&path).unwrap(), kernel);
    let loaded = library.get_wfss_kernel(Filter::F200W, Grism::GR150R).unwrap();
    assert_eq!(loaded.view(), kernel.view());
}

#[test]
fn concurrent_first_requests_share_one_kernel() {
    let fixture = common::KernelFixture::traces();
    let library = Arc::clone(&fixture.library);
    let kernels: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let library = Arc::clone(&library);
                scope.spawn(move || library.get_wfss_kernel(Filter::F140M, Grism::GR150C).unwrap())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert!(kernels.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
}

#[test]
fn every_listed_pair_has_a_kernel() {
    let fixture = common::KernelFixture::traces();
    for filter in Filter::ALL {
        for grism in Grism::ALL {
            let kernel = fixture
                .library
                .get_wfss_kernel_by_name(filter.name(), &grism.name().to_lowercase())
                .unwrap();
            assert_eq!(kernel.dim(), (5, 41));
        }
    }
    assert!(matches!(
        fixture.library.get_wfss_kernel_by_name("CLEAR", "GR150R"),
        Err(OverlapError::InvalidConfiguration(ConfigurationError::UnknownFilter(_)))
    ));
}

#[test]
fn missing_kernel_is_an_error_value() {
    let dir = tempfile::tempdir().unwrap();
    let library = KernelLibrary::new(dir.path());
    assert!(matches!(
        library.get_wfss_kernel(Filter::F090W, Grism::GR150R),
        Err(KernelError::Fits(_))
    ));
    assert!(matches!(library.get_gr700_kernel(None), Err(KernelError::MissingTiles(_))));
    assert!(library.spot_mask().is_err());
}
