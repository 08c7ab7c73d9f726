//! Masked "same"-size convolution of a field with an instrument kernel.
//!
//! Output index `i` of a same-size convolution is index `i + (K-1)/2` of the
//! full linear convolution, i.e.
//!
//! ```text
//! out[i] = sum_k field[i + (K-1)/2 - k] * kernel[k]
//! ```
//!
//! which matches `scipy.signal.fftconvolve(..., mode="same")` and puts the
//! kernel centre on the source for odd kernels.
//!
//! # FFT sizing
//!
//! Instrument kernels can be far larger than the field (the GR700XD kernel is
//! 8192 pixels on a side against a 2322 pixel window). Per axis only kernel
//! samples in `[c - (N-1), c + N)` can reach the output, so the kernel is
//! cropped to that band first. The circular transform only has to be long
//! enough that the part of the result that is kept does not alias, which is
//! shorter than the full linear length. The length is then rounded up to a
//! 7-smooth size that the FFT handles efficiently.

use std::sync::Arc;

use ndarray::{s, Array2, ArrayView2, Zip};
use num_complex::Complex64;
use rayon::prelude::*;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, GeometryError, Result};
use crate::image_size::ImageSize;

/// How a convolution is evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ConvolutionMethod {
    /// Pick whichever of the two is estimated to be cheaper
    #[default]
    Auto,
    Fft,
    Direct,
}

/// Per-axis layout of an FFT convolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AxisPlan {
    /// Field length
    n: usize,
    /// First kernel sample that can reach the output
    lo: usize,
    /// Number of kernel samples kept
    kept: usize,
    /// Kernel centre relative to `lo`
    centre: usize,
    /// Transform length
    len: usize,
}

impl AxisPlan {
    fn new(n: usize, k: usize) -> Self {
        let c = (k - 1) / 2;
        let lo = c.saturating_sub(n - 1);
        let hi = k.min(c + n);
        let kept = hi - lo;
        let centre = c - lo;
        let full = n + kept - 1;
        let minimal = (full - centre).max(centre + n);
        Self {
            n,
            lo,
            kept,
            centre,
            len: good_fft_size(minimal),
        }
    }
}

/// Smallest length `>= n` whose only prime factors are 2, 3, 5 and 7
pub fn good_fft_size(n: usize) -> usize {
    let mut candidate = n.max(1);
    loop {
        let mut rest = candidate;
        for p in [2, 3, 5, 7] {
            while rest % p == 0 {
                rest /= p;
            }
        }
        if rest == 1 {
            return candidate;
        }
        candidate += 1;
    }
}

/// Kernel spectrum prepared for a fixed field shape.
///
/// The transform of the kernel is computed once; each call to
/// [`FftConvolver::convolve`] then costs one forward and one inverse
/// transform of the field. The convolver is immutable and can be shared
/// between threads.
pub struct FftConvolver {
    rows: AxisPlan,
    cols: AxisPlan,
    /// Kernel spectrum in transposed layout (`cols.len` rows of `rows.len`)
    spectrum: Vec<Complex64>,
    row_forward: Arc<dyn Fft<f64>>,
    row_inverse: Arc<dyn Fft<f64>>,
    col_forward: Arc<dyn Fft<f64>>,
    col_inverse: Arc<dyn Fft<f64>>,
}

impl std::fmt::Debug for FftConvolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FftConvolver")
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .finish()
    }
}

impl FftConvolver {
    /// Prepare to convolve fields of `field_shape` (rows, cols) with `kernel`.
    ///
    /// Both the field and the kernel must be non-empty.
    pub fn new(field_shape: (usize, usize), kernel: &ArrayView2<f64>) -> Result<Self, GeometryError> {
        let (kr, kc) = kernel.dim();
        let (nr, nc) = field_shape;
        if nr == 0 || nc == 0 || kr == 0 || kc == 0 {
            return Err(GeometryError::WrongShape {
                what: "convolution input",
                expected: ImageSize::square(1),
                got: ImageSize::from_width_height(nc.min(kc), nr.min(kr)),
            });
        }

        let rows = AxisPlan::new(nr, kr);
        let cols = AxisPlan::new(nc, kc);

        let mut planner = FftPlanner::<f64>::new();
        let row_forward = planner.plan_fft_forward(cols.len);
        let row_inverse = planner.plan_fft_inverse(cols.len);
        let col_forward = planner.plan_fft_forward(rows.len);
        let col_inverse = planner.plan_fft_inverse(rows.len);

        let cropped = kernel.slice(s![
            rows.lo..rows.lo + rows.kept,
            cols.lo..cols.lo + cols.kept
        ]);

        let mut convolver = Self {
            rows,
            cols,
            spectrum: Vec::new(),
            row_forward,
            row_inverse,
            col_forward,
            col_inverse,
        };
        convolver.spectrum = convolver.forward(&cropped);
        Ok(convolver)
    }

    /// Field shape this convolver was prepared for
    pub fn field_shape(&self) -> (usize, usize) {
        (self.rows.n, self.cols.n)
    }

    /// Transform lengths `(rows, cols)`
    pub fn transform_shape(&self) -> (usize, usize) {
        (self.rows.len, self.cols.len)
    }

    /// Same-size convolution of `field` with the prepared kernel
    pub fn convolve(&self, field: &ArrayView2<f64>) -> Result<Array2<f64>, GeometryError> {
        if field.dim() != self.field_shape() {
            return Err(GeometryError::WrongShape {
                what: "convolution field",
                expected: ImageSize::from_width_height(self.cols.n, self.rows.n),
                got: ImageSize::of(field),
            });
        }

        let (mr, mc) = self.transform_shape();
        let mut transposed = self.forward(field);
        transposed
            .par_iter_mut()
            .zip(self.spectrum.par_iter())
            .for_each(|(value, kernel)| *value *= kernel);

        // Inverse along columns, which are the rows of the transposed layout
        fft_rows(&mut transposed, mr, mc, &self.col_inverse);

        // Back to row-major, but only the rows that are kept
        let first = self.rows.centre;
        let mut buffer = vec![Complex64::new(0.0, 0.0); self.rows.n * mc];
        buffer
            .par_chunks_mut(mc)
            .enumerate()
            .for_each(|(r, row)| {
                let source_row = first + r;
                for (c, value) in row.iter_mut().enumerate() {
                    *value = transposed[c * mr + source_row];
                }
            });
        drop(transposed);
        fft_rows(&mut buffer, mc, self.rows.n, &self.row_inverse);

        let norm = 1.0 / (mr * mc) as f64;
        let col0 = self.cols.centre;
        let mut out = Array2::<f64>::zeros(self.field_shape());
        Zip::indexed(&mut out).par_for_each(|(r, c), value| {
            *value = buffer[r * mc + col0 + c].re * norm;
        });
        Ok(out)
    }

    /// Zero-pad `data` into the transform grid and return its 2D spectrum in
    /// transposed layout.
    fn forward(&self, data: &ArrayView2<f64>) -> Vec<Complex64> {
        let (mr, mc) = self.transform_shape();
        let (dr, _) = data.dim();

        let mut grid = vec![Complex64::new(0.0, 0.0); dr * mc];
        grid.par_chunks_mut(mc)
            .zip(data.outer_iter().into_par_iter())
            .for_each(|(row, source)| {
                for (value, &x) in row.iter_mut().zip(source.iter()) {
                    *value = Complex64::new(x, 0.0);
                }
            });
        // Rows past the data are zero and stay zero under the row transform
        fft_rows(&mut grid, mc, dr, &self.row_forward);

        let mut transposed = vec![Complex64::new(0.0, 0.0); mc * mr];
        transposed
            .par_chunks_mut(mr)
            .enumerate()
            .for_each(|(c, column)| {
                for (r, value) in column.iter_mut().take(dr).enumerate() {
                    *value = grid[r * mc + c];
                }
            });
        drop(grid);
        fft_rows(&mut transposed, mr, mc, &self.col_forward);
        transposed
    }
}

/// In-place transform of the first `count` rows of length `len` in `buffer`
fn fft_rows(buffer: &mut [Complex64], len: usize, count: usize, fft: &Arc<dyn Fft<f64>>) {
    let scratch_len = fft.get_inplace_scratch_len();
    buffer[..len * count].par_chunks_mut(len).for_each_init(
        || vec![Complex64::new(0.0, 0.0); scratch_len],
        |scratch, row| fft.process_with_scratch(row, scratch),
    );
}

/// Same-size convolution evaluated directly in the spatial domain.
///
/// Slow for large kernels; it exists to check the FFT path and for kernels
/// of a few pixels where it is the faster option.
pub fn direct_convolve_same(field: &ArrayView2<f64>, kernel: &ArrayView2<f64>) -> Array2<f64> {
    let (nr, nc) = field.dim();
    let (kr, kc) = kernel.dim();
    let mut out = Array2::<f64>::zeros((nr, nc));
    if kr == 0 || kc == 0 {
        return out;
    }
    let cr = (kr - 1) / 2;
    let cc = (kc - 1) / 2;

    Zip::indexed(&mut out).par_for_each(|(i, j), value| {
        // Kernel rows a with 0 <= i + cr - a < nr
        let a_min = (i + cr + 1).saturating_sub(nr);
        let a_max = (i + cr).min(kr - 1);
        let b_min = (j + cc + 1).saturating_sub(nc);
        let b_max = (j + cc).min(kc - 1);
        let mut sum = 0.0;
        for a in a_min..=a_max {
            let fi = i + cr - a;
            for b in b_min..=b_max {
                sum += field[[fi, j + cc - b]] * kernel[[a, b]];
            }
        }
        *value = sum;
    });
    out
}

/// Estimated cost of the two methods, in multiply-adds
fn prefer_direct(field_shape: (usize, usize), kernel_shape: (usize, usize)) -> bool {
    let rows = AxisPlan::new(field_shape.0, kernel_shape.0);
    let cols = AxisPlan::new(field_shape.1, kernel_shape.1);
    let direct = (field_shape.0 * field_shape.1) as f64 * (rows.kept * cols.kept) as f64;
    let points = (rows.len * cols.len) as f64;
    let fft = 3.0 * 5.0 * points * points.log2();
    direct < fft
}

/// Whether `method` resolves to direct evaluation for these shapes
pub(crate) fn uses_direct(
    method: ConvolutionMethod,
    field_shape: (usize, usize),
    kernel_shape: (usize, usize),
) -> bool {
    match method {
        ConvolutionMethod::Direct => true,
        ConvolutionMethod::Fft => false,
        ConvolutionMethod::Auto => prefer_direct(field_shape, kernel_shape),
    }
}

/// Same-size convolution by the chosen method
pub fn convolve_same(
    field: &ArrayView2<f64>,
    kernel: &ArrayView2<f64>,
    method: ConvolutionMethod,
) -> Result<Array2<f64>, GeometryError> {
    let (nr, nc) = field.dim();
    let (kr, kc) = kernel.dim();
    if nr == 0 || nc == 0 || kr == 0 || kc == 0 {
        return Ok(Array2::zeros((nr, nc)));
    }
    if uses_direct(method, (nr, nc), (kr, kc)) {
        Ok(direct_convolve_same(field, kernel))
    } else {
        FftConvolver::new((nr, nc), kernel)?.convolve(field)
    }
}

/// Multiply the centred sub-region of `field` that has the mask's shape by
/// `mask`. The rest of the field is untouched.
pub fn apply_spot_mask(field: &mut Array2<f64>, mask: &ArrayView2<f64>) -> Result<(), GeometryError> {
    let (nr, nc) = field.dim();
    let (mr, mc) = mask.dim();
    if mr > nr || mc > nc {
        return Err(GeometryError::MaskTooLarge {
            mask: ImageSize::of(mask),
            field: ImageSize::from_width_height(nc, nr),
        });
    }
    let (r0, c0) = ((nr - mr) / 2, (nc - mc) / 2);
    let mut interior = field.slice_mut(s![r0..r0 + mr, c0..c0 + mc]);
    interior *= mask;
    Ok(())
}

pub(crate) fn check_throughput(throughput: f64) -> Result<(), ConfigurationError> {
    if throughput.is_finite() && throughput >= 0.0 {
        Ok(())
    } else {
        Err(ConfigurationError::InvalidThroughput(throughput))
    }
}

/// Mask the centre of `field`, convolve the whole field with `kernel` and
/// scale by `throughput`.
pub fn masked_convolve(
    field: &ArrayView2<f64>,
    mask: &ArrayView2<f64>,
    kernel: &ArrayView2<f64>,
    throughput: f64,
) -> Result<Array2<f64>> {
    masked_convolve_with(field, mask, kernel, throughput, ConvolutionMethod::Auto)
}

/// [`masked_convolve`] with an explicit evaluation method
pub fn masked_convolve_with(
    field: &ArrayView2<f64>,
    mask: &ArrayView2<f64>,
    kernel: &ArrayView2<f64>,
    throughput: f64,
    method: ConvolutionMethod,
) -> Result<Array2<f64>> {
    check_throughput(throughput)?;
    let mut masked = field.to_owned();
    apply_spot_mask(&mut masked, mask)?;
    let mut out = convolve_same(&masked.view(), kernel, method)?;
    out *= throughput;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OverlapError;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array2};
    use rstest::rstest;

    fn pseudo_random(shape: (usize, usize), seed: u64) -> Array2<f64> {
        let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        Array2::from_shape_fn(shape, |_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 11) as f64 / (1u64 << 53) as f64
        })
    }

    #[test]
    fn test_good_fft_size() {
        assert_eq!(good_fft_size(1), 1);
        assert_eq!(good_fft_size(11), 12);
        assert_eq!(good_fft_size(4643), 4704);
        assert_eq!(good_fft_size(1024), 1024);
        assert_eq!(good_fft_size(2323), 2352);
    }

    #[test]
    fn test_axis_plan_crops_large_kernel() {
        // GR700XD kernel against the POM window
        let plan = AxisPlan::new(2322, 8192);
        assert_eq!(plan.lo, 1774);
        assert_eq!(plan.kept, 4643);
        assert_eq!(plan.centre, 2321);
        assert_eq!(plan.len, 4704);

        let small = AxisPlan::new(100, 3);
        assert_eq!((small.lo, small.kept, small.centre), (0, 3, 1));
        assert!(small.len >= 101);
    }

    #[test]
    fn test_direct_matches_hand_computed() {
        let field = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]];
        let kernel = array![[0.0, 1.0], [2.0, 0.0]];
        // Even kernel: centre index 0, out[i,j] = f[i,j-1] + 2 f[i-1,j]
        let expected = array![[0.0, 1.0, 2.0], [2.0, 8.0, 11.0], [8.0, 17.0, 20.0]];
        assert_eq!(direct_convolve_same(&field.view(), &kernel.view()), expected);
    }

    #[test]
    fn test_delta_kernel_is_identity() {
        let field = pseudo_random((17, 23), 1);
        let mut kernel = Array2::<f64>::zeros((5, 5));
        kernel[[2, 2]] = 1.0;
        let out = convolve_same(&field.view(), &kernel.view(), ConvolutionMethod::Fft).unwrap();
        for (a, b) in out.iter().zip(field.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[rstest]
    #[case((20, 20), (5, 5))]
    #[case((31, 17), (4, 7))]
    #[case((16, 16), (45, 40))]
    #[case((12, 30), (1, 9))]
    #[case((9, 9), (9, 9))]
    fn test_fft_matches_direct(#[case] field_shape: (usize, usize), #[case] kernel_shape: (usize, usize)) {
        let field = pseudo_random(field_shape, 7);
        let kernel = pseudo_random(kernel_shape, 11);
        let direct = direct_convolve_same(&field.view(), &kernel.view());
        let fft = convolve_same(&field.view(), &kernel.view(), ConvolutionMethod::Fft).unwrap();
        assert_eq!(direct.dim(), field_shape);
        for (a, b) in direct.iter().zip(fft.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_convolver_is_reusable_and_checks_shape() {
        let kernel = pseudo_random((7, 3), 3);
        let convolver = FftConvolver::new((10, 12), &kernel.view()).unwrap();
        for seed in [1, 2] {
            let field = pseudo_random((10, 12), seed);
            let direct = direct_convolve_same(&field.view(), &kernel.view());
            let fft = convolver.convolve(&field.view()).unwrap();
            for (a, b) in direct.iter().zip(fft.iter()) {
                assert_abs_diff_eq!(a, b, epsilon = 1e-10);
            }
        }
        assert!(matches!(
            convolver.convolve(&Array2::zeros((12, 10)).view()),
            Err(GeometryError::WrongShape { .. })
        ));
    }

    #[test]
    fn test_mask_applied_to_centre_only() {
        let mut field = Array2::<f64>::ones((6, 8));
        let mask = array![[0.0, 0.5], [0.25, 0.0]];
        apply_spot_mask(&mut field, &mask.view()).unwrap();
        assert_eq!(field[[2, 3]], 0.0);
        assert_eq!(field[[2, 4]], 0.5);
        assert_eq!(field[[3, 3]], 0.25);
        assert_eq!(field[[3, 4]], 0.0);
        assert_eq!(field.sum(), 48.0 - 4.0 + 0.75);
    }

    #[test]
    fn test_masked_convolve_scales_by_throughput() {
        let field = pseudo_random((15, 15), 5);
        let mask = Array2::<f64>::ones((11, 11));
        let mut kernel = Array2::<f64>::zeros((3, 3));
        kernel[[1, 1]] = 1.0;
        let out = masked_convolve(&field.view(), &mask.view(), &kernel.view(), 0.8).unwrap();
        for (a, b) in out.iter().zip(field.iter()) {
            assert_abs_diff_eq!(*a, 0.8 * b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_masked_convolve_rejects_bad_inputs() {
        let field = Array2::<f64>::ones((4, 4));
        let kernel = Array2::<f64>::ones((1, 1));
        let err = masked_convolve(&field.view(), &Array2::ones((5, 4)).view(), &kernel.view(), 0.8)
            .unwrap_err();
        assert!(matches!(
            err,
            OverlapError::InvalidGeometry(GeometryError::MaskTooLarge { .. })
        ));

        for throughput in [-0.1, f64::NAN, f64::INFINITY] {
            let err =
                masked_convolve(&field.view(), &Array2::ones((2, 2)).view(), &kernel.view(), throughput)
                    .unwrap_err();
            assert!(matches!(err, OverlapError::InvalidConfiguration(_)));
        }
    }

    #[test]
    fn test_auto_prefers_direct_for_tiny_kernels() {
        assert!(prefer_direct((2322, 2322), (3, 3)));
        assert!(!prefer_direct((2322, 2322), (101, 101)));
    }
}
