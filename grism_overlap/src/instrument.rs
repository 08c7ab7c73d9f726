//! NIRISS optical elements and frame geometry.
//!
//! All pipeline stages work on pixel offsets that are fixed by the instrument
//! layout. The working canvas is oversized so that a rotated scene still covers
//! the POM (point of minimum) image area; the POM area in turn contains the detector.
//!
//! ```text
//! canvas   [0, 4231)            4231 x 4231
//! POM      [955, 3277)          2322 x 2322
//! detector [1092, 3140)         2048 x 2048
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigurationError;

/// Side length of the square working canvas in pixels
pub const CANVAS_SIZE: usize = 4231;

/// Side length of the POM read-out window in pixels
pub const POM_SIZE: usize = 2322;

/// Offset of the POM window from the canvas origin (rows and columns)
pub const POM_OFFSET: usize = 955;

/// Side length of the detector area in pixels
pub const DETECTOR_SIZE: usize = 2048;

/// Offset of the detector area from the canvas origin (rows and columns)
pub const DETECTOR_OFFSET: usize = 1092;

/// Side length of the occulting spot mask
pub const SPOT_MASK_SIZE: usize = 2048;

/// Content shift `(rows, cols)` that moves the reference position to the
/// SOSS target acquisition position.
pub const SOSS_ACQUISITION_SHIFT: (usize, usize) = (174, 930);

/// Default grism efficiency applied after convolution
pub const DEFAULT_THROUGHPUT: f64 = 0.8;

/// Side length of the stitched GR700XD point-spread kernel
pub const GR700XD_KERNEL_SIZE: usize = 8192;

/// NIRISS imaging plate scale in arcseconds per pixel
pub const PIXEL_SCALE_ARCSEC: f64 = 0.0656;

/// Blocking filters usable with the GR150 grisms.
///
/// Catalogs may carry magnitudes in other bands (the long-wavelength NIRISS
/// filters); those cannot be dispersed and are rejected when parsed as a
/// target filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Filter {
    F090W,
    F115W,
    F140M,
    F150W,
    F158M,
    F200W,
}

impl Filter {
    /// Every dispersable filter, in wavelength order
    pub const ALL: [Filter; 6] = [
        Filter::F090W,
        Filter::F115W,
        Filter::F140M,
        Filter::F150W,
        Filter::F158M,
        Filter::F200W,
    ];

    /// Canonical upper-case name
    pub fn name(&self) -> &'static str {
        match self {
            Filter::F090W => "F090W",
            Filter::F115W => "F115W",
            Filter::F140M => "F140M",
            Filter::F150W => "F150W",
            Filter::F158M => "F158M",
            Filter::F200W => "F200W",
        }
    }

    /// Position in [`Filter::ALL`], used to index per-filter caches
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Magnitude that yields a count rate of one per second.
    ///
    /// Approximate Vega zero points for the NIRISS imaging filters. Scene
    /// fluxes only need to be right relative to each other, so these are not
    /// meant for photometric calibration.
    pub fn zero_point(&self) -> f64 {
        match self {
            Filter::F090W => 25.93,
            Filter::F115W => 26.02,
            Filter::F140M => 24.92,
            Filter::F150W => 25.84,
            Filter::F158M => 25.03,
            Filter::F200W => 25.63,
        }
    }

    /// Convert a magnitude in this filter to a count rate
    pub fn magnitude_to_flux(&self, magnitude: f64) -> f64 {
        10f64.powf(-0.4 * (magnitude - self.zero_point()))
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Filter {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Filter::ALL
            .into_iter()
            .find(|filter| filter.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ConfigurationError::UnknownFilter(s.to_string()))
    }
}

/// GR150 grisms used for wide-field slitless spectroscopy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Grism {
    /// Disperses along detector rows
    GR150R,
    /// Disperses along detector columns
    GR150C,
}

impl Grism {
    pub const ALL: [Grism; 2] = [Grism::GR150R, Grism::GR150C];

    pub fn name(&self) -> &'static str {
        match self {
            Grism::GR150R => "GR150R",
            Grism::GR150C => "GR150C",
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Grism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Grism {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Grism::ALL
            .into_iter()
            .find(|grism| grism.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ConfigurationError::UnknownGrism(s.to_string()))
    }
}

/// Wrap a position angle into `[0, 360)` degrees
pub fn wrap_angle(degrees: f64) -> f64 {
    let wrapped = degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_frame_offsets_are_centred() {
        assert_eq!(POM_OFFSET + POM_SIZE, 3277);
        assert_eq!(DETECTOR_OFFSET + DETECTOR_SIZE, 3140);
        // The spot mask sits 137 pixels inside the POM window on each side
        assert_eq!((POM_SIZE - SPOT_MASK_SIZE) / 2, DETECTOR_OFFSET - POM_OFFSET);
    }

    #[test]
    fn test_filter_parsing() {
        assert_eq!("F200W".parse::<Filter>().unwrap(), Filter::F200W);
        assert_eq!(" f090w ".parse::<Filter>().unwrap(), Filter::F090W);
        for name in ["foobar", "F277W", "F444W", ""] {
            assert!(matches!(
                name.parse::<Filter>(),
                Err(ConfigurationError::UnknownFilter(_))
            ));
        }
    }

    #[test]
    fn test_grism_parsing() {
        assert_eq!("gr150c".parse::<Grism>().unwrap(), Grism::GR150C);
        assert!(matches!(
            "GR700XD".parse::<Grism>(),
            Err(ConfigurationError::UnknownGrism(_))
        ));
    }

    #[test]
    fn test_indices_match_all_order() {
        for (i, filter) in Filter::ALL.iter().enumerate() {
            assert_eq!(filter.index(), i);
        }
        for (i, grism) in Grism::ALL.iter().enumerate() {
            assert_eq!(grism.index(), i);
        }
    }

    #[test]
    fn test_zero_point_gives_unit_flux() {
        for filter in Filter::ALL {
            assert_relative_eq!(
                filter.magnitude_to_flux(filter.zero_point()),
                1.0,
                epsilon = 1e-12
            );
        }
        // Five magnitudes is a factor of 100
        let f = Filter::F150W;
        assert_relative_eq!(
            f.magnitude_to_flux(10.0) / f.magnitude_to_flux(15.0),
            100.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_wrap_angle() {
        assert_eq!(wrap_angle(0.0), 0.0);
        assert_eq!(wrap_angle(360.0), 0.0);
        assert_relative_eq!(wrap_angle(-10.0), 350.0);
        assert_relative_eq!(wrap_angle(725.5), 5.5);
        assert!(wrap_angle(-1e-18) < 360.0);
    }
}
