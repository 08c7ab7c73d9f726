//! Sky-to-pixel mapping for scene composition.
//!
//! Scene composition never computes astrometry itself. It asks a
//! [`SkyProjector`] where each catalog position lands on the canvas, so a
//! caller can swap in a full instrument distortion model or, in tests, a
//! closure that places sources at chosen pixels.
//!
//! # Default projection
//!
//! [`TangentPlaneProjector`] is a gnomonic (TAN) projection about the field
//! centre, with the pointing at the canvas centre pixel and the NIRISS plate
//! scale of 0.0656 arcsec/pixel. At position angle zero north points along
//! increasing row index and east along decreasing column index, which is how
//! the sky looks when the frame is displayed with row 0 at the bottom.
//!
//! ```text
//! xi, eta   standard coordinates (radians) of the source about the pointing
//! x = x_ref - xi  / scale
//! y = y_ref + eta / scale
//! ```

use crate::image_size::ImageSize;
use crate::instrument::PIXEL_SCALE_ARCSEC;

const ARCSEC_PER_RADIAN: f64 = 206_264.806_247_096_36;

/// Maps a sky position in degrees to canvas pixel coordinates `(x, y)`.
///
/// `x` is the column and `y` the row, both 0-based. `None` means the position
/// cannot be projected at all (for example the far hemisphere of a gnomonic
/// projection); positions that project off the canvas are still returned and
/// the composer decides what to do with them.
pub trait SkyProjector: Send + Sync {
    fn project(&self, ra_deg: f64, dec_deg: f64) -> Option<(f64, f64)>;

    /// Sky position of the field centre, used for source distances
    fn reference(&self) -> (f64, f64);
}

impl<F> SkyProjector for (F, (f64, f64))
where
    F: Fn(f64, f64) -> Option<(f64, f64)> + Send + Sync,
{
    fn project(&self, ra_deg: f64, dec_deg: f64) -> Option<(f64, f64)> {
        (self.0)(ra_deg, dec_deg)
    }

    fn reference(&self) -> (f64, f64) {
        self.1
    }
}

/// Gnomonic projection about a pointing centre
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TangentPlaneProjector {
    ra0: f64,
    dec0: f64,
    scale_arcsec: f64,
    reference_pixel: (f64, f64),
}

impl TangentPlaneProjector {
    /// Projector centred on `(ra0, dec0)` at the canvas centre with the
    /// NIRISS plate scale
    pub fn new(ra0_deg: f64, dec0_deg: f64) -> Self {
        let centre = (ImageSize::CANVAS.width as f64 - 1.0) / 2.0;
        Self {
            ra0: ra0_deg,
            dec0: dec0_deg,
            scale_arcsec: PIXEL_SCALE_ARCSEC,
            reference_pixel: (centre, centre),
        }
    }

    pub fn with_scale(mut self, scale_arcsec: f64) -> Self {
        self.scale_arcsec = scale_arcsec;
        self
    }

    pub fn with_reference_pixel(mut self, x: f64, y: f64) -> Self {
        self.reference_pixel = (x, y);
        self
    }

    pub fn scale_arcsec(&self) -> f64 {
        self.scale_arcsec
    }
}

impl SkyProjector for TangentPlaneProjector {
    fn project(&self, ra_deg: f64, dec_deg: f64) -> Option<(f64, f64)> {
        let (ra, dec) = (ra_deg.to_radians(), dec_deg.to_radians());
        let (ra0, dec0) = (self.ra0.to_radians(), self.dec0.to_radians());
        let d_ra = ra - ra0;

        let cos_c = dec0.sin() * dec.sin() + dec0.cos() * dec.cos() * d_ra.cos();
        if cos_c <= 0.0 {
            return None;
        }
        let xi = dec.cos() * d_ra.sin() / cos_c;
        let eta = (dec0.cos() * dec.sin() - dec0.sin() * dec.cos() * d_ra.cos()) / cos_c;

        let scale = self.scale_arcsec / ARCSEC_PER_RADIAN;
        let (x_ref, y_ref) = self.reference_pixel;
        Some((x_ref - xi / scale, y_ref + eta / scale))
    }

    fn reference(&self) -> (f64, f64) {
        (self.ra0, self.dec0)
    }
}

/// Great-circle separation between two sky positions in arcseconds
pub fn angular_distance_arcsec(ra1: f64, dec1: f64, ra2: f64, dec2: f64) -> f64 {
    let (dec1, dec2) = (dec1.to_radians(), dec2.to_radians());
    let d_ra = (ra2 - ra1).to_radians();
    let d_dec = dec2 - dec1;
    // Haversine stays accurate at the sub-arcsecond separations of a field
    let a = (d_dec / 2.0).sin().powi(2) + dec1.cos() * dec2.cos() * (d_ra / 2.0).sin().powi(2);
    2.0 * a.sqrt().min(1.0).asin() * ARCSEC_PER_RADIAN
}
