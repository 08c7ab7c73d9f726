//! Simulation settings stored as JSON.
//!
//! A [`SimulationConfig`] carries every choice a run depends on, so nothing
//! about the current filter, mode or angle lives in global state. Missing
//! fields take their defaults, which makes a minimal file such as
//!
//! ```json
//! { "point_catalog": "field.list", "pointing": { "ra": 261.2, "dec": 60.4 } }
//! ```
//!
//! a complete SOSS sweep description.

use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};

use crate::astrometry::TangentPlaneProjector;
use crate::catalog::{Catalog, SkyPosition};
use crate::error::{CatalogError, ConfigurationError, Result};
use crate::instrument::Filter;
use crate::pipeline::{pa_grid, PipelineConfig, Visibility};
use crate::scene::Exclusion;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Directory holding kernels and the spot mask
    pub kernel_dir: PathBuf,
    pub point_catalog: PathBuf,
    pub extended_catalog: Option<PathBuf>,
    /// Field centre; the mean catalog position when unset
    pub pointing: Option<SkyPosition>,
    /// Band the scene is composed in
    pub filter: Filter,
    /// Flat background added to every scene pixel
    pub background: f64,
    pub exclusion: Exclusion,
    /// Spacing of the position angle grid in degrees
    pub pa_step: f64,
    pub excluded_angles: Vec<f64>,
    pub excluded_ranges: Vec<(f64, f64)>,
    pub pipeline: PipelineConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            kernel_dir: PathBuf::from("kernels"),
            point_catalog: PathBuf::from("sources.list"),
            extended_catalog: None,
            pointing: None,
            filter: Filter::F200W,
            background: 0.1,
            exclusion: Exclusion::None,
            pa_step: 10.0,
            excluded_angles: Vec::new(),
            excluded_ranges: Vec::new(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl SimulationConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        let json = fs::read_to_string(path).map_err(|source| ConfigurationError::File {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&json).map_err(|source| ConfigurationError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigurationError> {
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigurationError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(|source| ConfigurationError::File {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let throughput = self.pipeline.options.throughput;
        if !(throughput.is_finite() && throughput >= 0.0) {
            return Err(ConfigurationError::InvalidThroughput(throughput));
        }
        if !self.background.is_finite() {
            return Err(ConfigurationError::Invalid(format!(
                "Background {} is not finite",
                self.background
            )));
        }
        if !(self.pa_step.is_finite() && self.pa_step > 0.0) {
            return Err(ConfigurationError::Invalid(format!(
                "PA step {} must be positive",
                self.pa_step
            )));
        }
        if self.pipeline.workers == Some(0) {
            return Err(ConfigurationError::Invalid(
                "At least one worker is needed".to_string(),
            ));
        }
        Ok(())
    }

    /// Position angle grid from `pa_step`
    pub fn angles(&self) -> Result<Vec<f64>> {
        pa_grid(self.pa_step)
    }

    pub fn visibility(&self) -> Visibility {
        match (self.excluded_angles.is_empty(), self.excluded_ranges.is_empty()) {
            (true, true) => Visibility::All,
            (false, true) => Visibility::ExcludeAngles(self.excluded_angles.clone()),
            (true, false) => Visibility::ExcludeRanges(self.excluded_ranges.clone()),
            // Single angles become zero-width ranges
            (false, false) => Visibility::ExcludeRanges(
                self.excluded_ranges
                    .iter()
                    .copied()
                    .chain(self.excluded_angles.iter().map(|&a| (a, a)))
                    .collect(),
            ),
        }
    }

    /// Field centre, falling back to the mean position of `catalog`
    pub fn field_centre(&self, catalog: &Catalog) -> Result<SkyPosition, CatalogError> {
        match self.pointing {
            Some(position) => Ok(position),
            None => catalog
                .mean_position()
                .ok_or_else(|| CatalogError::Empty(self.point_catalog.clone())),
        }
    }

    /// Default projector about the field centre
    pub fn projector(&self, catalog: &Catalog) -> Result<TangentPlaneProjector, CatalogError> {
        let centre = self.field_centre(catalog)?;
        Ok(TangentPlaneProjector::new(centre.ra, centre.dec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogEntry;
    use crate::disperse::DispersionMode;
    use crate::error::OverlapError;
    use crate::extract::Subarray;
    use crate::instrument::Grism;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.json");
        let mut config = SimulationConfig {
            pointing: Some(SkyPosition::new(261.2, 60.4)),
            excluded_angles: vec![170.0, 190.0],
            exclusion: Exclusion::Remove(vec![0, 1]),
            ..Default::default()
        };
        config.pipeline.mode = DispersionMode::Wfss {
            filter: Filter::F115W,
            grism: Grism::GR150C,
        };
        config.pipeline.subarray = Subarray::Substrip96;

        config.save(&path).unwrap();
        assert_eq!(SimulationConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_minimal_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("min.json");
        fs::write(&path, r#"{ "point_catalog": "field.list", "pa_step": 45 }"#).unwrap();
        let config = SimulationConfig::load(&path).unwrap();
        assert_eq!(config.point_catalog, PathBuf::from("field.list"));
        assert_eq!(config.filter, Filter::F200W);
        assert_eq!(config.angles().unwrap().len(), 8);
        assert_eq!(config.visibility(), Visibility::All);
    }

    #[test]
    fn test_load_errors_are_values() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            SimulationConfig::load(&dir.path().join("absent.json")),
            Err(ConfigurationError::File { .. })
        ));

        let path = dir.path().join("bad.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            SimulationConfig::load(&path),
            Err(ConfigurationError::Parse { .. })
        ));

        fs::write(&path, r#"{ "filter": "F444W" }"#).unwrap();
        assert!(matches!(
            SimulationConfig::load(&path),
            Err(ConfigurationError::Parse { .. })
        ));

        fs::write(&path, r#"{ "pa_step": 0 }"#).unwrap();
        assert!(matches!(
            SimulationConfig::load(&path),
            Err(ConfigurationError::Invalid(_))
        ));
    }

    #[test]
    fn test_visibility_combines_angles_and_ranges() {
        let config = SimulationConfig {
            excluded_angles: vec![45.0],
            excluded_ranges: vec![(100.0, 120.0)],
            ..Default::default()
        };
        let visibility = config.visibility();
        assert!(!visibility.is_visible(45.0));
        assert!(!visibility.is_visible(110.0));
        assert!(visibility.is_visible(50.0));
    }

    #[test]
    fn test_field_centre_falls_back_to_catalog_mean() {
        let entry = |ra: f64, dec: f64| CatalogEntry {
            id: 1,
            name: None,
            position: SkyPosition::new(ra, dec),
            magnitudes: BTreeMap::new(),
            morphology: None,
        };
        let catalog = Catalog::from_entries(vec![entry(10.0, 20.0), entry(12.0, 22.0)]);
        let config = SimulationConfig::default();
        assert_eq!(config.field_centre(&catalog).unwrap(), SkyPosition::new(11.0, 21.0));

        let pinned = SimulationConfig {
            pointing: Some(SkyPosition::new(1.0, 2.0)),
            ..Default::default()
        };
        assert_eq!(pinned.field_centre(&catalog).unwrap(), SkyPosition::new(1.0, 2.0));

        let empty = Catalog::from_entries(Vec::new());
        let err: OverlapError = config.field_centre(&empty).unwrap_err().into();
        assert!(matches!(err, OverlapError::SourceData(CatalogError::Empty(_))));
    }
}
