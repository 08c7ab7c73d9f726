//! Source catalogs in the Mirage ascii layout.
//!
//! A catalog is whitespace-delimited text. Lines starting with `#` are
//! comments. A line whose first token is `index` is the column header; the
//! first three columns are always the source index, right ascension and
//! declination in degrees. Other recognised columns are found by name:
//!
//! * `<instrument>_<filter>_magnitude`, e.g. `niriss_f200w_magnitude`
//! * `radius` (half-light radius, arcsec), `ellipticity` and `pos_angle`
//!   (degrees) for extended sources
//! * `name`
//!
//! ```text
//! # position_RA_Dec
//! index   x_or_RA      y_or_Dec     niriss_f200w_magnitude
//! 1       261.217814   60.430764    8.93
//! 2       261.221003   60.429117    15.20
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::debug;

use crate::error::CatalogError;

/// A right ascension / declination pair in degrees
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SkyPosition {
    pub ra: f64,
    pub dec: f64,
}

impl SkyPosition {
    pub fn new(ra: f64, dec: f64) -> Self {
        Self { ra, dec }
    }
}

impl fmt::Display for SkyPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.8}, {:.8}", self.ra, self.dec)
    }
}

impl FromStr for SkyPosition {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_sky_position(s)
    }
}

/// Parse a pointing given as `"ra, dec"` or `"ra dec"` in decimal degrees.
///
/// Exactly two finite numbers are accepted, with RA in `[0, 360]` and Dec in
/// `[-90, 90]`. Anything else is an error; nothing is silently dropped.
pub fn parse_sky_position(text: &str) -> Result<SkyPosition, CatalogError> {
    let invalid = || CatalogError::InvalidPosition(text.to_string());

    let parts: Vec<&str> = if text.contains(',') {
        text.split(',').map(str::trim).collect()
    } else {
        text.split_whitespace().collect()
    };
    if parts.len() != 2 {
        return Err(invalid());
    }

    let ra: f64 = parts[0].parse().map_err(|_| invalid())?;
    let dec: f64 = parts[1].parse().map_err(|_| invalid())?;
    if !ra.is_finite() || !dec.is_finite() {
        return Err(invalid());
    }
    if !(0.0..=360.0).contains(&ra) || !(-90.0..=90.0).contains(&dec) {
        return Err(invalid());
    }
    Ok(SkyPosition { ra, dec })
}

/// Shape of an extended source
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Morphology {
    /// Half-light radius in arcseconds
    pub radius_arcsec: f64,
    /// `1 - b/a`
    pub ellipticity: f64,
    /// Major axis angle in degrees, counter-clockwise from the +x axis
    pub position_angle: f64,
}

impl Morphology {
    /// Reject shapes that cannot be rendered: the radius must be finite and
    /// not negative, the ellipticity within `[0, 1]`, the angle finite.
    pub fn check(&self) -> Result<(), &'static str> {
        if !(self.radius_arcsec.is_finite() && self.radius_arcsec >= 0.0) {
            return Err("radius must be finite and not negative");
        }
        if !(0.0..=1.0).contains(&self.ellipticity) {
            return Err("ellipticity must lie between 0 and 1");
        }
        if !self.position_angle.is_finite() {
            return Err("position angle must be finite");
        }
        Ok(())
    }
}

/// One catalog row
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    /// Value of the catalog's own index column
    pub id: i64,
    pub name: Option<String>,
    pub position: SkyPosition,
    /// Magnitudes keyed by upper-case band name (`F200W`)
    pub magnitudes: BTreeMap<String, f64>,
    pub morphology: Option<Morphology>,
}

impl CatalogEntry {
    pub fn magnitude(&self, band: &str) -> Option<f64> {
        self.magnitudes.get(band).copied()
    }
}

/// Ordered list of catalog rows.
///
/// Rows keep file order; the 0-based position of a row is the source index
/// used for exclusions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    source: Option<PathBuf>,
    entries: Vec<CatalogEntry>,
}

#[derive(Debug, Default)]
struct Columns {
    magnitudes: Vec<(usize, String)>,
    radius: Option<usize>,
    ellipticity: Option<usize>,
    pos_angle: Option<usize>,
    name: Option<usize>,
    count: usize,
}

impl Columns {
    fn from_header(tokens: &[&str]) -> Self {
        let mut columns = Columns {
            count: tokens.len(),
            ..Default::default()
        };
        for (i, token) in tokens.iter().enumerate().skip(3) {
            let lower = token.to_ascii_lowercase();
            match lower.as_str() {
                "radius" => columns.radius = Some(i),
                "ellipticity" => columns.ellipticity = Some(i),
                "pos_angle" => columns.pos_angle = Some(i),
                "name" => columns.name = Some(i),
                _ => {
                    if let Some(band) = magnitude_band(&lower) {
                        columns.magnitudes.push((i, band));
                    }
                }
            }
        }
        columns
    }
}

/// `niriss_f200w_magnitude` -> `F200W`
fn magnitude_band(column: &str) -> Option<String> {
    let stem = column.strip_suffix("_magnitude")?;
    let band = stem.rsplit('_').next()?;
    if band.is_empty() {
        return None;
    }
    Some(band.to_ascii_uppercase())
}

impl Catalog {
    pub fn from_entries(entries: Vec<CatalogEntry>) -> Self {
        Self {
            source: None,
            entries,
        }
    }

    /// Read and parse a catalog file
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let text = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = Self::parse(&text, path)?;
        debug!("Read {} sources from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    /// Parse catalog text; `origin` is only used in error messages
    pub fn parse(text: &str, origin: &Path) -> Result<Self, CatalogError> {
        let parse_error = |line: usize, message: String| CatalogError::Parse {
            path: origin.to_path_buf(),
            line,
            message,
        };

        let mut columns: Option<Columns> = None;
        let mut entries = Vec::new();

        for (line_index, line) in text.lines().enumerate() {
            let line_no = line_index + 1;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let tokens: Vec<&str> = trimmed.split_whitespace().collect();
            if tokens[0].eq_ignore_ascii_case("index") {
                columns = Some(Columns::from_header(&tokens));
                continue;
            }

            if tokens.len() < 3 {
                return Err(parse_error(
                    line_no,
                    format!("expected at least 3 columns, found {}", tokens.len()),
                ));
            }
            if let Some(cols) = &columns {
                if tokens.len() < cols.count {
                    return Err(parse_error(
                        line_no,
                        format!("expected {} columns, found {}", cols.count, tokens.len()),
                    ));
                }
            }

            let id: i64 = tokens[0]
                .parse()
                .map_err(|_| parse_error(line_no, format!("bad index '{}'", tokens[0])))?;
            let ra: f64 = tokens[1]
                .parse()
                .map_err(|_| parse_error(line_no, format!("bad right ascension '{}'", tokens[1])))?;
            let dec: f64 = tokens[2]
                .parse()
                .map_err(|_| parse_error(line_no, format!("bad declination '{}'", tokens[2])))?;

            let mut entry = CatalogEntry {
                id,
                name: None,
                position: SkyPosition { ra, dec },
                magnitudes: BTreeMap::new(),
                morphology: None,
            };

            if let Some(cols) = &columns {
                // A magnitude that is not a number marks the source as unusable
                // in that band rather than failing the whole catalog
                for (i, band) in &cols.magnitudes {
                    let value = tokens[*i].parse::<f64>().unwrap_or(f64::NAN);
                    entry.magnitudes.insert(band.clone(), value);
                }
                entry.name = cols.name.map(|i| tokens[i].to_string());

                if let Some(r) = cols.radius {
                    let field = |index: Option<usize>, default: f64| -> Result<f64, CatalogError> {
                        match index {
                            Some(i) => tokens[i].parse().map_err(|_| {
                                parse_error(line_no, format!("bad shape value '{}'", tokens[i]))
                            }),
                            None => Ok(default),
                        }
                    };
                    let morphology = Morphology {
                        radius_arcsec: field(Some(r), 0.0)?,
                        ellipticity: field(cols.ellipticity, 0.0)?,
                        position_angle: field(cols.pos_angle, 0.0)?,
                    };
                    morphology
                        .check()
                        .map_err(|reason| parse_error(line_no, reason.to_string()))?;
                    entry.morphology = Some(morphology);
                }
            }
            entries.push(entry);
        }

        if entries.is_empty() {
            return Err(CatalogError::Empty(origin.to_path_buf()));
        }

        Ok(Self {
            source: Some(origin.to_path_buf()),
            entries,
        })
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bands that have a magnitude column
    pub fn bands(&self) -> Vec<String> {
        let mut bands: Vec<String> = self
            .entries
            .iter()
            .flat_map(|e| e.magnitudes.keys().cloned())
            .collect();
        bands.sort();
        bands.dedup();
        bands
    }

    /// Mean sky position of all rows, used when no pointing is given
    pub fn mean_position(&self) -> Option<SkyPosition> {
        if self.entries.is_empty() {
            return None;
        }
        let n = self.entries.len() as f64;
        let ra = self.entries.iter().map(|e| e.position.ra).sum::<f64>() / n;
        let dec = self.entries.iter().map(|e| e.position.dec).sum::<f64>() / n;
        Some(SkyPosition { ra, dec })
    }
}

/// Mean sky position of the catalog file at `path`
pub fn mean_position(path: &Path) -> Result<SkyPosition, CatalogError> {
    let catalog = Catalog::load(path)?;
    catalog
        .mean_position()
        .ok_or_else(|| CatalogError::Empty(path.to_path_buf()))
}

/// Generates a catalog around a pointing, for example by querying a survey.
///
/// The pipeline only ever sees the resulting [`Catalog`]; implementations
/// live with the caller.
pub trait CatalogProvider: Send + Sync {
    fn fetch(&self, centre: SkyPosition, radius_arcsec: f64) -> Result<Catalog, CatalogError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;
    use tempfile::tempdir;

    const STARS: &str = "\
# position_RA_Dec
# abmag
index   x_or_RA      y_or_Dec     niriss_f090w_magnitude  niriss_f200w_magnitude  niriss_f444w_magnitude
1       261.217814   60.430764    9.50                    8.93                    8.70
2       261.221003   60.429117    16.1                    15.20                   14.9

7       261.210000   60.440000    99.0                    nan                     13.0
";

    const GALAXIES: &str = "\
index x_or_RA y_or_Dec radius ellipticity pos_angle sersic_index niriss_f150w_magnitude
1 10.0 -5.0 0.5 0.3 45.0 1.0 18.0
2 10.01 -5.01 1.2 0.0 0.0 4.0 19.5
";

    #[test]
    fn test_parse_mirage_point_catalog() {
        let catalog = Catalog::parse(STARS, Path::new("stars.txt")).unwrap();
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.bands(), vec!["F090W", "F200W", "F444W"]);

        let first = &catalog.entries()[0];
        assert_eq!(first.id, 1);
        assert_relative_eq!(first.position.ra, 261.217814);
        assert_eq!(first.magnitude("F200W"), Some(8.93));
        assert!(first.morphology.is_none());

        let last = &catalog.entries()[2];
        assert_eq!(last.id, 7);
        assert!(last.magnitude("F200W").unwrap().is_nan());
        assert_eq!(last.magnitude("F090W"), Some(99.0));
    }

    #[test]
    fn test_parse_extended_catalog() {
        let catalog = Catalog::parse(GALAXIES, Path::new("gal.txt")).unwrap();
        let morph = catalog.entries()[0].morphology.unwrap();
        assert_eq!(morph.radius_arcsec, 0.5);
        assert_eq!(morph.ellipticity, 0.3);
        assert_eq!(morph.position_angle, 45.0);
        assert_eq!(catalog.entries()[1].magnitude("F150W"), Some(19.5));
    }

    #[test]
    fn test_headerless_catalog_has_positions_only() {
        let catalog = Catalog::parse("1 10.0 20.0\n2 11.0 22.0\n", Path::new("x")).unwrap();
        assert_eq!(catalog.len(), 2);
        assert!(catalog.bands().is_empty());
        let mean = catalog.mean_position().unwrap();
        assert_relative_eq!(mean.ra, 10.5);
        assert_relative_eq!(mean.dec, 21.0);
    }

    #[rstest]
    #[case("index ra dec\n1 abc 20.0\n")]
    #[case("1 10.0\n")]
    #[case("index ra dec niriss_f200w_magnitude\n1 10.0 20.0\n")]
    #[case("one 10.0 20.0\n")]
    #[case("index ra dec radius ellipticity\n1 10.0 20.0 nan 0.2\n")]
    #[case("index ra dec radius ellipticity\n1 10.0 20.0 inf 0.2\n")]
    #[case("index ra dec radius ellipticity\n1 10.0 20.0 -0.5 0.2\n")]
    #[case("index ra dec radius ellipticity\n1 10.0 20.0 0.5 1.5\n")]
    fn test_malformed_rows_rejected(#[case] text: &str) {
        assert!(matches!(
            Catalog::parse(text, Path::new("bad.txt")),
            Err(CatalogError::Parse { .. })
        ));
    }

    #[test]
    fn test_comment_only_catalog_is_empty_error() {
        assert!(matches!(
            Catalog::parse("# nothing here\n\n", Path::new("empty.txt")),
            Err(CatalogError::Empty(_))
        ));
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = tempdir().unwrap();
        let err = Catalog::load(&dir.path().join("foo/bar.txt")).unwrap_err();
        assert!(matches!(err, CatalogError::Io { .. }));
    }

    #[test]
    fn test_mean_position_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stars.txt");
        std::fs::write(&path, STARS).unwrap();
        let mean = mean_position(&path).unwrap();
        assert_relative_eq!(mean.ra, (261.217814 + 261.221003 + 261.21) / 3.0, epsilon = 1e-9);
    }

    #[rstest]
    #[case("261.21781401047, 60.43076384536", 261.21781401047, 60.43076384536)]
    #[case("  10.5   -20.25 ", 10.5, -20.25)]
    #[case("0,90", 0.0, 90.0)]
    fn test_parse_valid_positions(#[case] text: &str, #[case] ra: f64, #[case] dec: f64) {
        let pos = parse_sky_position(text).unwrap();
        assert_eq!(pos, SkyPosition::new(ra, dec));
    }

    #[rstest]
    #[case("")]
    #[case("10.0")]
    #[case("10.0, 20.0, 30.0")]
    #[case("ten, twenty")]
    #[case("10.0,")]
    #[case("400.0, 0.0")]
    #[case("10.0, -95.0")]
    #[case("NaN 1.0")]
    fn test_parse_invalid_positions(#[case] text: &str) {
        assert!(matches!(
            text.parse::<SkyPosition>(),
            Err(CatalogError::InvalidPosition(_))
        ));
    }
}
