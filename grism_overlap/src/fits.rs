//! FITS storage for kernel images, masks and output frames.
//!
//! Each file holds one double-precision image. Reading returns the first HDU
//! with a two-dimensional image, so files whose primary HDU is empty and whose
//! data sits in an extension load the same way as single-HDU files.
//!
//! Arrays are indexed `[row, column]` with row `i` being FITS line `i + 1`
//! (`NAXIS2` rows of `NAXIS1` columns). No vertical flip is applied, which
//! keeps kernel and mask coordinates identical to the numpy view of the same
//! files.

use std::path::{Path, PathBuf};

use fitsio::compat::fitsfile::FitsFile;
use fitsio::compat::hdu::FitsHdu;
use fitsio::compat::images::{ImageDescription, ImageType, ReadImage, WriteImage};
use log::debug;
use ndarray::{Array2, ArrayView2};
use thiserror::Error;

/// Extension name given to written images
pub const IMAGE_EXTNAME: &str = "SCI";

#[derive(Error, Debug)]
pub enum FitsError {
    #[error("FITS I/O error on {path}: {source}")]
    Fits {
        path: PathBuf,
        #[source]
        source: fitsio::compat::errors::Error,
    },
    #[error("{0} contains no two-dimensional image")]
    NoImage(PathBuf),
    #[error("{path} declares a {rows}x{cols} image but holds {got} samples")]
    SizeMismatch {
        path: PathBuf,
        rows: usize,
        cols: usize,
        got: usize,
    },
}

fn fits_error(path: &Path) -> impl FnOnce(fitsio::compat::errors::Error) -> FitsError + '_ {
    move |source| FitsError::Fits {
        path: path.to_path_buf(),
        source,
    }
}

fn axis_len(fptr: &FitsFile, hdu: &FitsHdu, key: &str, path: &Path) -> Result<usize, FitsError> {
    let len = hdu.read_key::<i64>(fptr, key).map_err(fits_error(path))?;
    usize::try_from(len).map_err(|_| FitsError::NoImage(path.to_path_buf()))
}

/// Read the first two-dimensional image in a FITS file as `f64`
pub fn read_image(path: &Path) -> Result<Array2<f64>, FitsError> {
    let fptr = FitsFile::open(path).map_err(fits_error(path))?;

    let mut hdu_idx = 0usize;
    while let Ok(hdu) = fptr.hdu(hdu_idx) {
        let naxis = hdu.read_key::<i64>(&fptr, "NAXIS").unwrap_or(0);
        if naxis == 2 {
            let cols = axis_len(&fptr, &hdu, "NAXIS1", path)?;
            let rows = axis_len(&fptr, &hdu, "NAXIS2", path)?;
            let data = f64::read_image(&fptr, &hdu).map_err(fits_error(path))?;
            let got = data.len();
            debug!("Read {rows}x{cols} image from HDU {hdu_idx} of {}", path.display());
            return Array2::from_shape_vec((rows, cols), data).map_err(|_| FitsError::SizeMismatch {
                path: path.to_path_buf(),
                rows,
                cols,
                got,
            });
        }
        hdu_idx += 1;
    }

    Err(FitsError::NoImage(path.to_path_buf()))
}

/// Write a 2D array as a double-precision image, replacing any existing file
pub fn write_image(path: &Path, array: &ArrayView2<f64>) -> Result<(), FitsError> {
    let (rows, cols) = array.dim();
    let mut fptr = FitsFile::create(path).overwrite().open().map_err(fits_error(path))?;

    let description = ImageDescription {
        data_type: ImageType::Double,
        dimensions: vec![cols, rows],
    };
    let hdu = fptr
        .create_image(IMAGE_EXTNAME, &description)
        .map_err(fits_error(path))?;

    // Logical iteration order keeps strided and transposed views row-major
    let flat: Vec<f64> = array.iter().copied().collect();
    f64::write_image(&mut fptr, &hdu, &flat).map_err(fits_error(path))?;
    hdu.write_key(&mut fptr, "EXTNAME", &IMAGE_EXTNAME.to_string())
        .map_err(fits_error(path))?;
    Ok(())
}
