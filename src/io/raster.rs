use crate::types::{Crs, GeoTransform, Grid, PixelWindow, RasterBand, Sample, WaterError, WaterResult};
use gdal::Dataset;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Georeferencing and size of a raster, without its samples
#[derive(Debug, Clone)]
pub struct RasterInfo {
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    pub crs: Crs,
    pub nodata: Option<Sample>,
}

/// Read access to single-band rasters
pub trait RasterSource: Send + Sync {
    /// Size, transform, CRS and nodata of the raster at `path`
    fn describe(&self, path: &Path) -> WaterResult<RasterInfo>;

    /// Samples inside `window`, shaped (window.height, window.width)
    fn read_window(&self, path: &Path, window: &PixelWindow) -> WaterResult<Grid>;
}

fn load_error(path: &Path, reason: impl ToString) -> WaterError {
    WaterError::RasterLoad {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// GDAL-backed raster reader (band 1 of any GDAL-readable file)
#[derive(Debug, Clone, Copy, Default)]
pub struct GdalRasterSource;

impl GdalRasterSource {
    pub fn new() -> Self {
        Self
    }

    fn open(path: &Path) -> WaterResult<Dataset> {
        Dataset::open(path).map_err(|e| load_error(path, e))
    }
}

impl RasterSource for GdalRasterSource {
    fn describe(&self, path: &Path) -> WaterResult<RasterInfo> {
        log::debug!("Opening raster: {}", path.display());
        let dataset = Self::open(path)?;

        let geo_transform = dataset.geo_transform().map_err(|e| load_error(path, e))?;
        let (width, height) = dataset.raster_size();
        let rasterband = dataset.rasterband(1).map_err(|e| load_error(path, e))?;

        let info = RasterInfo {
            width,
            height,
            transform: GeoTransform::from_gdal(geo_transform),
            crs: Crs::new(dataset.projection()),
            nodata: rasterband.no_data_value(),
        };
        log::debug!("Raster size: {}x{}, geotransform: {:?}", width, height, geo_transform);
        Ok(info)
    }

    fn read_window(&self, path: &Path, window: &PixelWindow) -> WaterResult<Grid> {
        let dataset = Self::open(path)?;
        let rasterband = dataset.rasterband(1).map_err(|e| load_error(path, e))?;

        rasterband
            .read_as_array::<f64>(
                (window.col_off as isize, window.row_off as isize),
                (window.width, window.height),
                (window.width, window.height),
                None,
            )
            .map_err(|e| load_error(path, e))
    }
}

/// In-memory rasters keyed by path
#[derive(Debug, Clone, Default)]
pub struct MemoryRasterSource {
    bands: HashMap<PathBuf, RasterBand>,
}

impl MemoryRasterSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<P: Into<PathBuf>>(&mut self, path: P, band: RasterBand) {
        self.bands.insert(path.into(), band);
    }

    pub fn with_band<P: Into<PathBuf>>(mut self, path: P, band: RasterBand) -> Self {
        self.insert(path, band);
        self
    }

    fn get(&self, path: &Path) -> WaterResult<&RasterBand> {
        self.bands
            .get(path)
            .ok_or_else(|| load_error(path, "no such raster in memory source"))
    }
}

impl RasterSource for MemoryRasterSource {
    fn describe(&self, path: &Path) -> WaterResult<RasterInfo> {
        let band = self.get(path)?;
        let (height, width) = band.shape();
        Ok(RasterInfo {
            width,
            height,
            transform: band.transform,
            crs: band.crs.clone(),
            nodata: band.nodata,
        })
    }

    fn read_window(&self, path: &Path, window: &PixelWindow) -> WaterResult<Grid> {
        let band = self.get(path)?;
        let (height, width) = band.shape();
        if window.col_off + window.width > width || window.row_off + window.height > height {
            return Err(load_error(
                path,
                format!("window {:?} exceeds raster size {}x{}", window, width, height),
            ));
        }

        let view = band.data.slice(ndarray::s![
            window.row_off..window.row_off + window.height,
            window.col_off..window.col_off + window.width
        ]);
        Ok(view.to_owned())
    }
}
