//! Pipeline configuration, loaded from JSON.
//!
//! ```json
//! {
//!   "area_of_interest": "area_of_interest/area.shp",
//!   "output_dir": "output_shapefile",
//!   "threshold": 0.1,
//!   "image_dir": "IMAGES",
//!   "years": [2023, 2022, 2021],
//!   "band_overrides": { "1999": { "green": "B2", "nir": "B4", "red": "B3" } }
//! }
//! ```

use super::catalog::BandCatalog;
use super::vector::VectorFormat;
use crate::types::{Connectivity, Threshold, WaterError, WaterResult, Year};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

fn default_bit_depth_max() -> f64 {
    255.0
}

/// Which band code plays which spectral role for a sensor
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BandRoles {
    pub green: String,
    pub nir: String,
    #[serde(default)]
    pub red: Option<String>,
}

impl Default for BandRoles {
    fn default() -> Self {
        Self {
            green: "B3".to_string(),
            nir: "B6".to_string(),
            red: Some("B4".to_string()),
        }
    }
}

/// Band roles per year over a shared default
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BandRoleTable {
    pub default: BandRoles,
    pub overrides: BTreeMap<Year, BandRoles>,
}

impl BandRoleTable {
    /// Roles of a year, falling back to the default
    pub fn roles(&self, year: Year) -> &BandRoles {
        self.overrides.get(&year).unwrap_or(&self.default)
    }
}

/// Attribute values that override what the band file names say
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SceneOverride {
    #[serde(default)]
    pub satellite: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Vector dataset holding the area of interest polygons
    pub area_of_interest: PathBuf,
    /// Root of the per-year output directories
    pub output_dir: PathBuf,
    /// Index threshold; required, there is no sensible default
    pub threshold: Threshold,
    #[serde(default)]
    pub format: VectorFormat,
    #[serde(default)]
    pub connectivity: Connectivity,
    /// Sensor bit-depth maximum used to normalize samples
    #[serde(default = "default_bit_depth_max")]
    pub bit_depth_max: f64,
    #[serde(default)]
    pub default_bands: BandRoles,
    #[serde(default)]
    pub band_overrides: BTreeMap<Year, BandRoles>,
    /// Years to process; empty means every year of the catalog
    #[serde(default)]
    pub years: Vec<Year>,
    /// Explicit `{year -> {band -> path}}` table
    #[serde(default)]
    pub bands: BTreeMap<Year, BTreeMap<String, PathBuf>>,
    /// Directory to scan when no explicit table is given
    #[serde(default)]
    pub image_dir: Option<PathBuf>,
    #[serde(default)]
    pub scenes: BTreeMap<Year, SceneOverride>,
}

impl PipelineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> WaterResult<Self> {
        let path = path.as_ref();
        log::info!("Loading configuration from: {}", path.display());
        let text = fs::read_to_string(path).map_err(|e| {
            WaterError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> WaterResult<Self> {
        let config: PipelineConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> WaterResult<()> {
        if !(self.bit_depth_max.is_finite() && self.bit_depth_max > 0.0) {
            return Err(WaterError::Config(format!(
                "bit_depth_max must be positive, got {}",
                self.bit_depth_max
            )));
        }
        if self.bands.is_empty() && self.image_dir.is_none() {
            return Err(WaterError::Config(
                "Either an explicit `bands` table or an `image_dir` is required".to_string(),
            ));
        }
        if self.bands.is_empty() && self.years.is_empty() {
            return Err(WaterError::Config(
                "`years` must be listed when scanning an image directory".to_string(),
            ));
        }
        Ok(())
    }

    /// Default roles and per-year overrides as one lookup table
    pub fn band_roles(&self) -> BandRoleTable {
        BandRoleTable {
            default: self.default_bands.clone(),
            overrides: self.band_overrides.clone(),
        }
    }

    /// Build the immutable band table, scanning `image_dir` if needed
    pub fn build_catalog(&self) -> WaterResult<BandCatalog> {
        if !self.bands.is_empty() {
            return Ok(BandCatalog::new(self.bands.clone()));
        }

        let image_dir = self.image_dir.as_ref().ok_or_else(|| {
            WaterError::Config("No image directory configured".to_string())
        })?;

        let table = self.band_roles();
        let mut codes = BTreeSet::new();
        for &year in &self.years {
            let roles = table.roles(year);
            codes.insert(roles.green.as_str());
            codes.insert(roles.nir.as_str());
            if let Some(red) = roles.red.as_deref() {
                codes.insert(red);
            }
        }
        let codes: Vec<&str> = codes.into_iter().collect();
        BandCatalog::scan_directory(image_dir, &self.years, &codes)
    }

    /// Years to run: the configured list, or every catalog year
    pub fn years_to_process(&self, catalog: &BandCatalog) -> Vec<Year> {
        if self.years.is_empty() {
            catalog.years()
        } else {
            self.years.clone()
        }
    }
}
