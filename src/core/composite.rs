//! False-color composites (NIR, RED, GREEN) for visual inspection of water bodies

use crate::types::{Crs, GeoTransform, Grid, RasterBand, WaterError, WaterResult};
use gdal::raster::Buffer;
use gdal::spatial_ref::SpatialRef;
use gdal::DriverManager;
use ndarray::{Array2, Array3, Axis};
use std::fs;
use std::path::{Path, PathBuf};

/// Contrast gain applied after the percentile stretch
pub const DEFAULT_GAIN: f64 = 1.5;

/// Lower / upper percentiles of the stretch
pub const STRETCH_PERCENTILES: (f64, f64) = (1.0, 99.0);

/// Percentile of sorted values with linear interpolation between ranks
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    let rank = (pct / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

/// Stretch the `[low_pct, high_pct]` percentile range of `band` onto [0, 255],
/// then multiply by `gain` and clip again.
///
/// Nodata cells come out as 0. A band with no spread maps to 0 everywhere.
pub fn percentile_stretch(band: &RasterBand, low_pct: f64, high_pct: f64, gain: f64) -> Grid {
    let mut valid: Vec<f64> = band.data.iter().copied().filter(|v| !band.is_nodata(*v)).collect();
    if valid.is_empty() {
        return Array2::zeros(band.shape());
    }
    valid.sort_by(|a, b| a.total_cmp(b));

    let low = percentile(&valid, low_pct);
    let high = percentile(&valid, high_pct);
    let span = high - low;
    if span <= 0.0 {
        log::debug!("Band has no spread between p{} and p{}", low_pct, high_pct);
        return Array2::zeros(band.shape());
    }

    band.data.mapv(|v| {
        if band.is_nodata(v) {
            return 0.0;
        }
        let stretched = ((v - low) / span * 255.0).clamp(0.0, 255.0);
        (stretched * gain).clamp(0.0, 255.0)
    })
}

/// Stack stretched NIR, RED and GREEN as an RGB image (band-major) rescaled
/// to `u8` with one global min/max
pub fn false_color(nir: &RasterBand, red: &RasterBand, green: &RasterBand, gain: f64) -> WaterResult<Array3<u8>> {
    for (name, band) in [("red", red), ("green", green)] {
        if band.shape() != nir.shape() {
            return Err(WaterError::Alignment(format!(
                "Composite band {} has shape {:?}, nir has {:?}",
                name,
                band.shape(),
                nir.shape()
            )));
        }
    }

    let (low, high) = STRETCH_PERCENTILES;
    let layers = [
        percentile_stretch(nir, low, high, gain),
        percentile_stretch(red, low, high, gain),
        percentile_stretch(green, low, high, gain),
    ];
    let views: Vec<_> = layers.iter().map(|l| l.view()).collect();
    let stacked = ndarray::stack(Axis(0), &views)
        .map_err(|e| WaterError::Alignment(format!("Cannot stack composite bands: {}", e)))?;

    let min = stacked.iter().copied().fold(f64::INFINITY, f64::min);
    let max = stacked.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = max - min;
    if !(span > 0.0) {
        return Ok(Array3::zeros(stacked.dim()));
    }

    Ok(stacked.mapv(|v| ((v - min) / span * 255.0) as u8))
}

/// Write a band-major `u8` image as a multi-band GeoTIFF
pub fn write_composite(path: &Path, image: &Array3<u8>, transform: &GeoTransform, crs: &Crs) -> WaterResult<()> {
    log::info!("Saving composite as GeoTIFF: {}", path.display());

    let (bands, height, width) = image.dim();
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let mut dataset = driver.create_with_band_type::<u8, _>(path, width as isize, height as isize, bands as isize)?;

    dataset.set_geo_transform(&transform.to_gdal())?;
    if !crs.is_empty() {
        dataset.set_spatial_ref(&SpatialRef::from_definition(crs.as_str())?)?;
    }

    for (i, layer) in image.axis_iter(Axis(0)).enumerate() {
        let mut rasterband = dataset.rasterband(i as isize + 1)?;
        let buffer = Buffer::new((width, height), layer.iter().copied().collect());
        rasterband.write((0, 0), (width, height), &buffer)?;
    }
    Ok(())
}

/// Write `Band {i}: {file}` for every stacked band, 1-based
pub fn write_band_mapping(path: &Path, files: &[PathBuf]) -> WaterResult<()> {
    let text: String = files
        .iter()
        .enumerate()
        .map(|(i, file)| {
            let name = file.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
            format!("Band {}: {}\n", i + 1, name)
        })
        .collect();
    fs::write(path, text)?;
    log::info!("Band mapping saved at {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn band(data: Grid) -> RasterBand {
        RasterBand::new(data, GeoTransform::north_up(0.0, 0.0, 30.0, -30.0), Crs::from_epsg(32722), None)
    }

    #[test]
    fn test_percentile_interpolates() {
        let sorted = [0.0, 10.0, 20.0, 30.0, 40.0];
        assert_relative_eq!(percentile(&sorted, 0.0), 0.0);
        assert_relative_eq!(percentile(&sorted, 50.0), 20.0);
        assert_relative_eq!(percentile(&sorted, 10.0), 4.0);
        assert_relative_eq!(percentile(&sorted, 100.0), 40.0);
    }

    #[test]
    fn test_stretch_full_range() {
        let data = Array2::from_shape_fn((1, 101), |(_, c)| c as f64);
        let stretched = percentile_stretch(&band(data), 0.0, 100.0, 1.0);
        assert_relative_eq!(stretched[[0, 0]], 0.0);
        assert_relative_eq!(stretched[[0, 100]], 255.0);
        assert_relative_eq!(stretched[[0, 50]], 127.5);
    }

    #[test]
    fn test_stretch_gain_saturates() {
        let data = Array2::from_shape_fn((1, 101), |(_, c)| c as f64);
        let stretched = percentile_stretch(&band(data), 0.0, 100.0, DEFAULT_GAIN);
        assert_relative_eq!(stretched[[0, 50]], 191.25);
        assert_relative_eq!(stretched[[0, 80]], 255.0);
    }

    #[test]
    fn test_constant_band_maps_to_zero() {
        let stretched = percentile_stretch(&band(Array2::from_elem((3, 3), 42.0)), 1.0, 99.0, 1.5);
        assert!(stretched.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_nodata_ignored_by_stretch() {
        let mut b = band(array![[0.0, 10.0, 20.0]]);
        b.nodata = Some(0.0);
        let stretched = percentile_stretch(&b, 0.0, 100.0, 1.0);
        assert_eq!(stretched[[0, 0]], 0.0);
        assert_relative_eq!(stretched[[0, 1]], 0.0);
        assert_relative_eq!(stretched[[0, 2]], 255.0);
    }

    #[test]
    fn test_false_color_band_order() {
        let rising = band(array![[0.0, 1.0], [2.0, 3.0]]);
        let falling = band(array![[3.0, 2.0], [1.0, 0.0]]);
        let flat = band(Array2::from_elem((2, 2), 5.0));

        let image = false_color(&rising, &falling, &flat, 1.0).unwrap();
        assert_eq!(image.dim(), (3, 2, 2));
        assert_eq!(image[[0, 0, 0]], 0);
        assert_eq!(image[[0, 1, 1]], 255);
        assert_eq!(image[[1, 0, 0]], 255);
        assert!(image.index_axis(Axis(0), 2).iter().all(|&v| v == 0));
    }

    #[test]
    fn test_false_color_requires_alignment() {
        let a = band(Array2::zeros((2, 2)));
        let b = band(Array2::zeros((3, 2)));
        assert!(matches!(false_color(&a, &b, &a, 1.0), Err(WaterError::Alignment(_))));
    }

    #[test]
    fn test_band_mapping_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("band_mapping_2013.txt");
        let files = vec![
            PathBuf::from("2013-a/LC08_B5.TIF"),
            PathBuf::from("2013-a/LC08_B4.TIF"),
            PathBuf::from("2013-a/LC08_B3.TIF"),
        ];

        write_band_mapping(&path, &files).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "Band 1: LC08_B5.TIF\nBand 2: LC08_B4.TIF\nBand 3: LC08_B3.TIF\n");
    }
}
