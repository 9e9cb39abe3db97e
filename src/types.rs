use geo::{BoundingRect, Polygon, Rect};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Raster sample type used throughout the pipeline
pub type Sample = f64;

/// 2D raster grid (rows x cols)
pub type Grid = Array2<Sample>;

/// Acquisition year
pub type Year = i32;

/// Attribute map attached to every feature of a batch
pub type Attributes = BTreeMap<String, AttributeValue>;

/// Coordinate reference system, stored as WKT or an authority string ("EPSG:32722")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Crs(String);

impl Crs {
    pub fn new(definition: impl Into<String>) -> Self {
        Self(definition.into())
    }

    pub fn from_epsg(code: u32) -> Self {
        Self(format!("EPSG:{}", code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // WKT strings are long, the first line is enough for logs
        match self.0.find(',') {
            Some(pos) if self.0.len() > 64 => write!(f, "{}...", &self.0[..pos]),
            _ => write!(f, "{}", self.0),
        }
    }
}

/// Geospatial transformation parameters (GDAL ordering)
///
/// ```text
/// x = top_left_x + col * pixel_width + row * rotation_x
/// y = top_left_y + col * rotation_y  + row * pixel_height
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform without rotation
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height,
        }
    }

    pub fn from_gdal(coeffs: [f64; 6]) -> Self {
        Self {
            top_left_x: coeffs[0],
            pixel_width: coeffs[1],
            rotation_x: coeffs[2],
            top_left_y: coeffs[3],
            rotation_y: coeffs[4],
            pixel_height: coeffs[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Map a (fractional) pixel position to world coordinates
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.top_left_x + col * self.pixel_width + row * self.rotation_x,
            self.top_left_y + col * self.rotation_y + row * self.pixel_height,
        )
    }

    /// Map world coordinates back to a fractional (col, row) position
    pub fn invert(&self, x: f64, y: f64) -> WaterResult<(f64, f64)> {
        let det = self.pixel_width * self.pixel_height - self.rotation_x * self.rotation_y;
        if det.abs() < f64::EPSILON {
            return Err(WaterError::Alignment(format!(
                "Geotransform is not invertible: {:?}",
                self
            )));
        }
        let dx = x - self.top_left_x;
        let dy = y - self.top_left_y;
        let col = (self.pixel_height * dx - self.rotation_x * dy) / det;
        let row = (self.pixel_width * dy - self.rotation_y * dx) / det;
        Ok((col, row))
    }

    /// Transform whose origin sits at pixel (col_off, row_off) of this one
    pub fn shifted(&self, col_off: usize, row_off: usize) -> Self {
        let (x, y) = self.apply(col_off as f64, row_off as f64);
        Self {
            top_left_x: x,
            top_left_y: y,
            ..*self
        }
    }

    /// Ground area covered by one pixel
    pub fn pixel_area(&self) -> f64 {
        (self.pixel_width * self.pixel_height - self.rotation_x * self.rotation_y).abs()
    }

    /// Whether two transforms describe the same grid within `tolerance` of a pixel
    pub fn aligned_with(&self, other: &GeoTransform, tolerance: f64) -> bool {
        let scale = self.pixel_width.abs().max(self.pixel_height.abs()).max(f64::EPSILON);
        self.to_gdal()
            .iter()
            .zip(other.to_gdal().iter())
            .all(|(a, b)| (a - b).abs() <= tolerance * scale)
    }
}

/// Pixel window inside a raster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelWindow {
    pub col_off: usize,
    pub row_off: usize,
    pub width: usize,
    pub height: usize,
}

impl PixelWindow {
    pub fn full(width: usize, height: usize) -> Self {
        Self {
            col_off: 0,
            row_off: 0,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// One spectral band with its georeferencing
#[derive(Debug, Clone)]
pub struct RasterBand {
    pub data: Grid,
    pub transform: GeoTransform,
    pub crs: Crs,
    pub nodata: Option<Sample>,
}

impl RasterBand {
    pub fn new(data: Grid, transform: GeoTransform, crs: Crs, nodata: Option<Sample>) -> Self {
        Self {
            data,
            transform,
            crs,
            nodata,
        }
    }

    /// (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// True when `value` is this band's nodata marker or not a finite number
    pub fn is_nodata(&self, value: Sample) -> bool {
        if !value.is_finite() {
            return true;
        }
        match self.nodata {
            Some(nd) if nd.is_nan() => false,
            Some(nd) => value == nd,
            None => false,
        }
    }
}

/// Normalized difference index values, same grid as the source bands.
/// NaN marks undefined cells.
#[derive(Debug, Clone)]
pub struct IndexRaster {
    pub values: Grid,
    pub transform: GeoTransform,
    pub crs: Crs,
}

impl IndexRaster {
    pub fn shape(&self) -> (usize, usize) {
        self.values.dim()
    }

    /// Number of cells holding a defined (finite) value
    pub fn defined_cells(&self) -> usize {
        self.values.iter().filter(|v| v.is_finite()).count()
    }
}

/// {0, 1} grid derived from an index raster
#[derive(Debug, Clone)]
pub struct BinaryMask {
    pub cells: Array2<u8>,
    pub transform: GeoTransform,
}

impl BinaryMask {
    pub fn shape(&self) -> (usize, usize) {
        self.cells.dim()
    }

    pub fn count_ones(&self) -> usize {
        self.cells.iter().filter(|&&c| c == 1).count()
    }
}

/// Polygons restricting processing, shared read-only across years
#[derive(Debug, Clone)]
pub struct AreaOfInterest {
    pub polygons: Vec<Polygon<f64>>,
    pub crs: Crs,
}

impl AreaOfInterest {
    pub fn new(polygons: Vec<Polygon<f64>>, crs: Crs) -> WaterResult<Self> {
        if polygons.is_empty() {
            return Err(WaterError::Config(
                "Area of interest contains no polygons".to_string(),
            ));
        }
        Ok(Self { polygons, crs })
    }

    /// Bounding rectangle of every polygon, in the AOI's own CRS
    pub fn bounding_rect(&self) -> Option<Rect<f64>> {
        self.polygons
            .iter()
            .filter_map(|p| p.bounding_rect())
            .reduce(|a, b| {
                Rect::new(
                    geo::coord! { x: a.min().x.min(b.min().x), y: a.min().y.min(b.min().y) },
                    geo::coord! { x: a.max().x.max(b.max().x), y: a.max().y.max(b.max().y) },
                )
            })
    }
}

/// Validated water index threshold, domain [-1, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Threshold(f64);

impl Threshold {
    pub fn new(value: f64) -> WaterResult<Self> {
        if !value.is_finite() || !(-1.0..=1.0).contains(&value) {
            return Err(WaterError::InvalidThreshold(value));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl<'de> Deserialize<'de> for Threshold {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let value = f64::deserialize(d)?;
        Threshold::new(value).map_err(serde::de::Error::custom)
    }
}

/// Cell adjacency used when grouping mask cells into regions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    /// Edge neighbours only
    #[default]
    Four,
    /// Edge and corner neighbours
    Eight,
}

/// Attribute value written alongside a polygon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Integer(i64),
    Real(f64),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::String(s) => write!(f, "{}", s),
            AttributeValue::Integer(i) => write!(f, "{}", i),
            AttributeValue::Real(r) => write!(f, "{}", r),
        }
    }
}

/// Declared type of an attribute field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Real,
}

impl FieldType {
    pub fn accepts(&self, value: &AttributeValue) -> bool {
        matches!(
            (self, value),
            (FieldType::String, AttributeValue::String(_))
                | (FieldType::Integer, AttributeValue::Integer(_))
                | (FieldType::Real, AttributeValue::Real(_))
        )
    }
}

/// One named, typed attribute field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
}

/// Ordered attribute fields shared by every feature of a batch
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeSchema {
    fields: Vec<FieldDef>,
}

impl AttributeSchema {
    pub fn new(fields: Vec<FieldDef>) -> WaterResult<Self> {
        for (i, field) in fields.iter().enumerate() {
            if field.name.is_empty() {
                return Err(WaterError::Write("Attribute field with empty name".to_string()));
            }
            if fields[..i].iter().any(|f| f.name == field.name) {
                return Err(WaterError::Write(format!(
                    "Duplicate attribute field: {}",
                    field.name
                )));
            }
        }
        Ok(Self { fields })
    }

    /// `{date: string, satellite: string}`
    pub fn water_default() -> Self {
        Self {
            fields: vec![
                FieldDef {
                    name: "date".to_string(),
                    field_type: FieldType::String,
                },
                FieldDef {
                    name: "satellite".to_string(),
                    field_type: FieldType::String,
                },
            ],
        }
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Check that `attributes` holds exactly the schema's fields with matching types
    pub fn validate(&self, attributes: &Attributes) -> WaterResult<()> {
        for field in &self.fields {
            match attributes.get(&field.name) {
                None => {
                    return Err(WaterError::Write(format!(
                        "Missing attribute field: {}",
                        field.name
                    )))
                }
                Some(value) if !field.field_type.accepts(value) => {
                    return Err(WaterError::Write(format!(
                        "Attribute {} = {:?} does not match field type {:?}",
                        field.name, value, field.field_type
                    )))
                }
                Some(_) => {}
            }
        }
        if let Some(extra) = attributes
            .keys()
            .find(|k| !self.fields.iter().any(|f| &f.name == *k))
        {
            return Err(WaterError::Write(format!(
                "Attribute {} is not part of the schema",
                extra
            )));
        }
        Ok(())
    }
}

/// Georeferenced polygon plus its attributes
#[derive(Debug, Clone)]
pub struct FeatureRecord {
    pub geometry: Polygon<f64>,
    pub attributes: Attributes,
}

/// State of one year under processing. Discarded once written.
#[derive(Debug, Clone)]
pub struct YearBatch {
    pub year: Year,
    pub green_path: PathBuf,
    pub nir_path: PathBuf,
    pub features: Vec<FeatureRecord>,
}

/// Error types for water extraction
#[derive(Debug, thiserror::Error)]
pub enum WaterError {
    #[error("No band {band} found for year {year}")]
    BandNotFound { year: Year, band: String },

    #[error("Failed to load raster {path}: {reason}")]
    RasterLoad { path: PathBuf, reason: String },

    #[error("Area of interest does not overlap raster {path}")]
    DisjointGeometry { path: PathBuf },

    #[error("Band alignment error: {0}")]
    Alignment(String),

    #[error("Write error: {0}")]
    Write(String),

    #[error("Threshold {0} outside the valid index domain [-1, 1]")]
    InvalidThreshold(f64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Polygon tracing exceeded its deadline")]
    DeadlineExceeded,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WaterError {
    /// Stable short name used in run reports
    pub fn kind(&self) -> &'static str {
        match self {
            WaterError::BandNotFound { .. } => "band_not_found",
            WaterError::RasterLoad { .. } => "raster_load",
            WaterError::DisjointGeometry { .. } => "disjoint_geometry",
            WaterError::Alignment(_) => "alignment",
            WaterError::Write(_) => "write",
            WaterError::InvalidThreshold(_) => "invalid_threshold",
            WaterError::Config(_) => "config",
            WaterError::DeadlineExceeded => "deadline_exceeded",
            WaterError::Io(_) => "io",
            WaterError::Gdal(_) => "gdal",
            WaterError::Json(_) => "json",
        }
    }
}

/// Result type for water extraction operations
pub type WaterResult<T> = Result<T, WaterError>;
