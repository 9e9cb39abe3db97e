//! Band catalog: resolves (year, band code) pairs to raster files.
//!
//! The catalog is an immutable `{year -> {band -> path}}` table. It is either
//! supplied explicitly through configuration or built once by scanning an
//! image directory laid out as `<year>-<anything>/<...><band>.TIF`.

use crate::types::{WaterError, WaterResult, Year};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Extension of band files produced by the Landsat archive
pub const BAND_FILE_EXTENSION: &str = ".TIF";

/// Separator between the year and the rest of a scene directory name
pub const YEAR_SEPARATOR: char = '-';

/// Immutable lookup table of band sources per year
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BandCatalog {
    entries: BTreeMap<Year, BTreeMap<String, PathBuf>>,
}

impl BandCatalog {
    pub fn new(entries: BTreeMap<Year, BTreeMap<String, PathBuf>>) -> Self {
        Self { entries }
    }

    /// Resolve a band of a year to its raster path
    pub fn locate(&self, year: Year, band: &str) -> WaterResult<&Path> {
        self.entries
            .get(&year)
            .and_then(|bands| bands.get(band))
            .map(PathBuf::as_path)
            .ok_or_else(|| WaterError::BandNotFound {
                year,
                band: band.to_string(),
            })
    }

    /// Years present in the catalog, ascending
    pub fn years(&self) -> Vec<Year> {
        self.entries.keys().copied().collect()
    }

    /// Build a catalog by scanning `base_dir` for the requested years and bands.
    ///
    /// Bands that cannot be found are simply absent from the table; the
    /// pipeline reports them when the year is processed.
    pub fn scan_directory<P: AsRef<Path>>(
        base_dir: P,
        years: &[Year],
        bands: &[&str],
    ) -> WaterResult<Self> {
        let base_dir = base_dir.as_ref();
        log::info!("Scanning {} for band files", base_dir.display());

        if !base_dir.is_dir() {
            return Err(WaterError::Config(format!(
                "Image directory does not exist: {}",
                base_dir.display()
            )));
        }

        let mut entries = BTreeMap::new();
        for &year in years {
            let mut found = BTreeMap::new();
            for &band in bands {
                match locate_in_directory(base_dir, year, band)? {
                    Some(path) => {
                        log::debug!("{} {} -> {}", year, band, path.display());
                        found.insert(band.to_string(), path);
                    }
                    None => log::warn!("Band {} not found for year {}", band, year),
                }
            }
            if !found.is_empty() {
                entries.insert(year, found);
            }
        }

        log::info!("Catalog holds {} year(s)", entries.len());
        Ok(Self { entries })
    }
}

/// Find the file for `band` of `year` directly under `base_dir`.
///
/// A subdirectory matches when the token before the first `-` equals the
/// year. Matching subdirectories are searched in listing order and the first
/// file ending in `<band>.TIF` is returned. A missing band is `Ok(None)`.
pub fn locate_in_directory(base_dir: &Path, year: Year, band: &str) -> WaterResult<Option<PathBuf>> {
    let year_token = year.to_string();
    let suffix = format!("{}{}", band, BAND_FILE_EXTENSION);

    for entry in fs::read_dir(base_dir)? {
        let entry = entry?;
        let subdir = entry.path();
        if !subdir.is_dir() {
            continue;
        }

        let name = entry.file_name();
        let name = name.to_string_lossy();
        let leading = name.split(YEAR_SEPARATOR).next().unwrap_or_default();
        if leading != year_token {
            continue;
        }

        for file in fs::read_dir(&subdir)? {
            let file = file?;
            if file.file_name().to_string_lossy().ends_with(&suffix) {
                return Ok(Some(file.path()));
            }
        }
    }

    Ok(None)
}
