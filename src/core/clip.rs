use crate::io::{RasterInfo, RasterSource, Reprojector};
use crate::types::{AreaOfInterest, GeoTransform, Grid, PixelWindow, RasterBand, WaterError, WaterResult};
use geo::{Contains, Point, Polygon};
use std::borrow::Cow;
use std::path::Path;

/// Sub-pixel rounding applied before snapping a window outward
const WINDOW_PRECISION: f64 = 1e6;

/// Value of cells outside the area of interest
const OUTSIDE_FILL: f64 = f64::NAN;

/// Loads raster bands cropped and masked to an area of interest.
///
/// The raster is always the reference frame: when CRSs differ the area of
/// interest is reprojected, never the raster.
pub struct RasterClipper<'a> {
    source: &'a dyn RasterSource,
    reprojector: &'a dyn Reprojector,
}

impl<'a> RasterClipper<'a> {
    pub fn new(source: &'a dyn RasterSource, reprojector: &'a dyn Reprojector) -> Self {
        Self { source, reprojector }
    }

    /// Load `path` cropped to the minimal window covering `aoi`.
    ///
    /// Cells whose centers fall outside every polygon are set to NaN; the
    /// band keeps the nodata value its source declares.
    pub fn clip(&self, path: &Path, aoi: &AreaOfInterest) -> WaterResult<RasterBand> {
        log::debug!("Clipping {} to area of interest", path.display());
        let info = self.source.describe(path)?;

        let polygons: Cow<'_, [Polygon<f64>]> = if self.reprojector.same_crs(&info.crs, &aoi.crs) {
            Cow::Borrowed(&aoi.polygons)
        } else {
            log::info!("Reprojecting area of interest from {} to {}", aoi.crs, info.crs);
            Cow::Owned(self.reprojector.reproject(&aoi.polygons, &aoi.crs, &info.crs)?)
        };

        let window = crop_window(&info, &polygons)?.ok_or_else(|| WaterError::DisjointGeometry {
            path: path.to_path_buf(),
        })?;
        log::debug!("Crop window: {:?}", window);

        let data = self.source.read_window(path, &window)?;
        if data.dim() != (window.height, window.width) {
            return Err(WaterError::RasterLoad {
                path: path.to_path_buf(),
                reason: format!(
                    "read {:?} samples for a {}x{} window",
                    data.dim(),
                    window.width,
                    window.height
                ),
            });
        }

        let transform = info.transform.shifted(window.col_off, window.row_off);
        let data = mask_outside(data, &transform, &polygons, OUTSIDE_FILL);

        Ok(RasterBand::new(data, transform, info.crs, info.nodata))
    }
}

/// Pixel window of the raster covering every vertex of `polygons`,
/// or `None` when they do not overlap the raster at all
pub fn crop_window(info: &RasterInfo, polygons: &[Polygon<f64>]) -> WaterResult<Option<PixelWindow>> {
    let mut min_col = f64::INFINITY;
    let mut max_col = f64::NEG_INFINITY;
    let mut min_row = f64::INFINITY;
    let mut max_row = f64::NEG_INFINITY;

    for polygon in polygons {
        for c in polygon.exterior().coords() {
            let (col, row) = info.transform.invert(c.x, c.y)?;
            let col = (col * WINDOW_PRECISION).round() / WINDOW_PRECISION;
            let row = (row * WINDOW_PRECISION).round() / WINDOW_PRECISION;
            min_col = min_col.min(col);
            max_col = max_col.max(col);
            min_row = min_row.min(row);
            max_row = max_row.max(row);
        }
    }

    if !min_col.is_finite() || !min_row.is_finite() {
        return Ok(None);
    }

    let col_start = min_col.floor().max(0.0);
    let col_end = max_col.ceil().min(info.width as f64);
    let row_start = min_row.floor().max(0.0);
    let row_end = max_row.ceil().min(info.height as f64);

    if col_start >= col_end || row_start >= row_end {
        return Ok(None);
    }

    Ok(Some(PixelWindow {
        col_off: col_start as usize,
        row_off: row_start as usize,
        width: (col_end - col_start) as usize,
        height: (row_end - row_start) as usize,
    }))
}

fn inside_any(polygons: &[Polygon<f64>], transform: &GeoTransform, row: usize, col: usize) -> bool {
    let (x, y) = transform.apply(col as f64 + 0.5, row as f64 + 0.5);
    let center = Point::new(x, y);
    polygons.iter().any(|p| p.contains(&center))
}

/// Replace samples whose cell centers are outside every polygon with `fill`
pub fn mask_outside(mut data: Grid, transform: &GeoTransform, polygons: &[Polygon<f64>], fill: f64) -> Grid {
    #[cfg(feature = "parallel")]
    {
        ndarray::Zip::indexed(&mut data).par_for_each(|(row, col), value| {
            if !inside_any(polygons, transform, row, col) {
                *value = fill;
            }
        });
    }

    #[cfg(not(feature = "parallel"))]
    {
        for ((row, col), value) in data.indexed_iter_mut() {
            if !inside_any(polygons, transform, row, col) {
                *value = fill;
            }
        }
    }

    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{IdentityReprojector, MemoryRasterSource};
    use crate::types::Crs;
    use approx::assert_relative_eq;
    use geo::{polygon, MapCoords};
    use ndarray::Array2;

    const RASTER: &str = "scene_B3.TIF";

    fn source() -> MemoryRasterSource {
        // 10x10 raster, 10 m pixels, top-left at (0, 100)
        let data = Array2::from_shape_fn((10, 10), |(r, c)| (r * 10 + c + 1) as f64);
        MemoryRasterSource::new().with_band(
            RASTER,
            RasterBand::new(
                data,
                GeoTransform::north_up(0.0, 100.0, 10.0, -10.0),
                Crs::from_epsg(32722),
                None,
            ),
        )
    }

    fn aoi(polygon: Polygon<f64>, crs: Crs) -> AreaOfInterest {
        AreaOfInterest::new(vec![polygon], crs).unwrap()
    }

    #[test]
    fn test_clip_rectangle() {
        let source = source();
        let clipper = RasterClipper::new(&source, &IdentityReprojector);
        let square = polygon![(x: 20.0, y: 30.0), (x: 50.0, y: 30.0), (x: 50.0, y: 70.0), (x: 20.0, y: 70.0)];

        let band = clipper.clip(Path::new(RASTER), &aoi(square, Crs::from_epsg(32722))).unwrap();

        assert_eq!(band.shape(), (4, 3));
        assert_relative_eq!(band.transform.top_left_x, 20.0);
        assert_relative_eq!(band.transform.top_left_y, 70.0);
        // row 3, col 2 of the source
        assert_eq!(band.data[[0, 0]], 33.0);
        assert!(band.data.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_clip_masks_cells_outside_polygon() {
        let source = source();
        let clipper = RasterClipper::new(&source, &IdentityReprojector);
        let triangle = polygon![(x: 0.0, y: 100.0), (x: 40.0, y: 100.0), (x: 0.0, y: 60.0)];

        let band = clipper.clip(Path::new(RASTER), &aoi(triangle, Crs::from_epsg(32722))).unwrap();

        assert_eq!(band.shape(), (4, 4));
        assert_eq!(band.nodata, None);
        assert!(band.data[[0, 0]].is_finite());
        assert!(band.data[[3, 3]].is_nan());
        assert!(band.data[[1, 3]].is_nan());
        assert!(band.is_nodata(band.data[[1, 3]]));
    }

    #[test]
    fn test_clip_partial_overlap_is_clamped() {
        let source = source();
        let clipper = RasterClipper::new(&source, &IdentityReprojector);
        let square = polygon![(x: 80.0, y: -50.0), (x: 150.0, y: -50.0), (x: 150.0, y: 20.0), (x: 80.0, y: 20.0)];

        let band = clipper.clip(Path::new(RASTER), &aoi(square, Crs::from_epsg(32722))).unwrap();
        assert_eq!(band.shape(), (2, 2));
        assert_relative_eq!(band.transform.top_left_x, 80.0);
        assert_relative_eq!(band.transform.top_left_y, 20.0);
    }

    #[test]
    fn test_clip_disjoint_geometry() {
        let source = source();
        let clipper = RasterClipper::new(&source, &IdentityReprojector);
        let far = polygon![(x: 500.0, y: 500.0), (x: 600.0, y: 500.0), (x: 600.0, y: 600.0)];

        let result = clipper.clip(Path::new(RASTER), &aoi(far, Crs::from_epsg(32722)));
        assert!(matches!(result, Err(WaterError::DisjointGeometry { .. })));
    }

    #[test]
    fn test_clip_missing_raster() {
        let source = source();
        let clipper = RasterClipper::new(&source, &IdentityReprojector);
        let square = polygon![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 10.0)];

        let result = clipper.clip(Path::new("missing_B3.TIF"), &aoi(square, Crs::from_epsg(32722)));
        assert!(matches!(result, Err(WaterError::RasterLoad { .. })));
    }

    #[test]
    fn test_zero_sample_inside_area_is_kept() {
        use crate::core::IndexCalculator;

        let transform = GeoTransform::north_up(0.0, 20.0, 10.0, -10.0);
        let crs = Crs::from_epsg(32722);
        let source = MemoryRasterSource::new()
            .with_band("g_B3.TIF", RasterBand::new(Array2::from_elem((2, 2), 120.0), transform, crs.clone(), None))
            .with_band("n_B6.TIF", RasterBand::new(Array2::zeros((2, 2)), transform, crs.clone(), None));
        let clipper = RasterClipper::new(&source, &IdentityReprojector);
        let square = polygon![(x: 0.0, y: 0.0), (x: 20.0, y: 0.0), (x: 20.0, y: 20.0), (x: 0.0, y: 20.0)];
        let area = aoi(square, crs);

        let green = clipper.clip(Path::new("g_B3.TIF"), &area).unwrap();
        let nir = clipper.clip(Path::new("n_B6.TIF"), &area).unwrap();
        assert!(nir.data.iter().all(|&v| v == 0.0));

        let index = IndexCalculator::default().compute(green, nir).unwrap();
        assert!(index.values.iter().all(|&v| v == 1.0));
    }

    /// Moves geometries 1000 m east when going from "local" to the raster CRS
    struct ShiftReprojector;

    impl Reprojector for ShiftReprojector {
        fn same_crs(&self, a: &Crs, b: &Crs) -> bool {
            a == b
        }

        fn reproject(&self, polygons: &[Polygon<f64>], from: &Crs, to: &Crs) -> WaterResult<Vec<Polygon<f64>>> {
            assert_eq!(from.as_str(), "local");
            assert_eq!(to, &Crs::from_epsg(32722));
            Ok(polygons
                .iter()
                .map(|p| p.map_coords(|c| geo::coord! { x: c.x + 1000.0, y: c.y }))
                .collect())
        }
    }

    #[test]
    fn test_area_of_interest_is_reprojected_to_raster_crs() {
        let source = source();
        let clipper = RasterClipper::new(&source, &ShiftReprojector);
        let square = polygon![(x: -1000.0, y: 80.0), (x: -980.0, y: 80.0), (x: -980.0, y: 100.0), (x: -1000.0, y: 100.0)];

        let band = clipper.clip(Path::new(RASTER), &aoi(square, Crs::new("local"))).unwrap();
        assert_eq!(band.shape(), (2, 2));
        assert_eq!(band.crs, Crs::from_epsg(32722));
        assert_eq!(band.data[[0, 0]], 1.0);
    }
}
