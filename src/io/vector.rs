//! Vector I/O: area-of-interest loading, polygon reprojection and feature sinks.

use crate::types::{
    AreaOfInterest, AttributeSchema, AttributeValue, Crs, FeatureRecord, FieldType, WaterError,
    WaterResult,
};
use gdal::spatial_ref::{CoordTransform, SpatialRef};
use gdal::vector::{FieldValue, Geometry, LayerAccess, ToGdal};
use gdal::{Dataset, DriverManager, LayerOptions};
use gdal_sys::{OGRFieldType, OGRwkbGeometryType};
use geo::{Coord, LineString, Polygon};
use geojson::{Feature, FeatureCollection, GeoJson, JsonObject};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Load every polygon of the first layer of a vector dataset
pub fn read_area_of_interest<P: AsRef<Path>>(path: P) -> WaterResult<AreaOfInterest> {
    let path = path.as_ref();
    log::info!("Reading area of interest from: {}", path.display());

    let dataset = Dataset::open(path)?;
    let mut layer = dataset.layer(0)?;
    let crs = match layer.spatial_ref() {
        Some(srs) => Crs::new(srs.to_wkt()?),
        None => {
            return Err(WaterError::Config(format!(
                "Area of interest {} has no spatial reference",
                path.display()
            )))
        }
    };

    let mut polygons = Vec::new();
    for feature in layer.features() {
        let geometry = match feature.geometry_by_index(0) {
            Ok(geometry) => geometry,
            Err(_) => {
                log::warn!("Skipping feature without geometry");
                continue;
            }
        };
        collect_polygons(geometry, &mut polygons);
    }

    log::debug!("Area of interest: {} polygon(s), CRS {}", polygons.len(), crs);
    AreaOfInterest::new(polygons, crs)
}

fn collect_polygons(geometry: &Geometry, out: &mut Vec<Polygon<f64>>) {
    match geometry.to_geo() {
        Ok(geo::Geometry::Polygon(polygon)) => out.push(polygon),
        Ok(geo::Geometry::MultiPolygon(parts)) => out.extend(parts.0),
        Ok(_) => log::warn!("Ignoring non-polygon geometry ({})", geometry.geometry_name()),
        Err(e) => log::warn!("Skipping unreadable geometry: {}", e),
    }
}

/// Geometry reprojection between coordinate reference systems
pub trait Reprojector: Send + Sync {
    fn same_crs(&self, a: &Crs, b: &Crs) -> bool;

    fn reproject(&self, polygons: &[Polygon<f64>], from: &Crs, to: &Crs) -> WaterResult<Vec<Polygon<f64>>>;
}

/// Reprojection through OSR coordinate transformations
#[derive(Debug, Clone, Copy, Default)]
pub struct GdalReprojector;

impl GdalReprojector {
    fn spatial_ref(crs: &Crs) -> WaterResult<SpatialRef> {
        let mut srs = SpatialRef::from_definition(crs.as_str())?;
        // x = easting/longitude regardless of the authority's axis order
        srs.set_axis_mapping_strategy(
            gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER,
        );
        Ok(srs)
    }

    fn transform_ring(transform: &CoordTransform, ring: &LineString<f64>) -> WaterResult<LineString<f64>> {
        let mut xs: Vec<f64> = ring.coords().map(|c| c.x).collect();
        let mut ys: Vec<f64> = ring.coords().map(|c| c.y).collect();
        let mut zs = vec![0.0; xs.len()];
        transform.transform_coords(&mut xs, &mut ys, &mut zs)?;
        Ok(xs.into_iter().zip(ys).map(|(x, y)| Coord { x, y }).collect())
    }
}

impl Reprojector for GdalReprojector {
    fn same_crs(&self, a: &Crs, b: &Crs) -> bool {
        if a == b {
            return true;
        }
        match (Self::spatial_ref(a), Self::spatial_ref(b)) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }

    fn reproject(&self, polygons: &[Polygon<f64>], from: &Crs, to: &Crs) -> WaterResult<Vec<Polygon<f64>>> {
        log::debug!("Reprojecting {} polygon(s) from {} to {}", polygons.len(), from, to);
        let source = Self::spatial_ref(from)?;
        let target = Self::spatial_ref(to)?;
        let transform = CoordTransform::new(&source, &target)?;

        polygons
            .iter()
            .map(|polygon| {
                let exterior = Self::transform_ring(&transform, polygon.exterior())?;
                let interiors = polygon
                    .interiors()
                    .iter()
                    .map(|ring| Self::transform_ring(&transform, ring))
                    .collect::<WaterResult<Vec<_>>>()?;
                Ok(Polygon::new(exterior, interiors))
            })
            .collect()
    }
}

/// Reprojector that only accepts identical CRS definitions
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityReprojector;

impl Reprojector for IdentityReprojector {
    fn same_crs(&self, a: &Crs, b: &Crs) -> bool {
        a == b
    }

    fn reproject(&self, polygons: &[Polygon<f64>], from: &Crs, to: &Crs) -> WaterResult<Vec<Polygon<f64>>> {
        if from == to {
            return Ok(polygons.to_vec());
        }
        Err(WaterError::Config(format!(
            "Cannot reproject from {} to {} without a projection engine",
            from, to
        )))
    }
}

/// Output vector format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorFormat {
    #[default]
    Shapefile,
    GeoPackage,
    GeoJson,
}

impl VectorFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            VectorFormat::Shapefile => "shp",
            VectorFormat::GeoPackage => "gpkg",
            VectorFormat::GeoJson => "geojson",
        }
    }

    /// Sink able to write this format
    pub fn sink(&self) -> Box<dyn VectorSink> {
        match self {
            VectorFormat::Shapefile => Box::new(GdalVectorSink::new("ESRI Shapefile")),
            VectorFormat::GeoPackage => Box::new(GdalVectorSink::new("GPKG")),
            VectorFormat::GeoJson => Box::new(GeoJsonSink),
        }
    }
}

/// Destination of one batch of polygon features
pub trait VectorSink: Send + Sync {
    /// Write `features` as a single polygon layer, replacing any dataset at `path`
    fn write_layer(
        &self,
        path: &Path,
        crs: &Crs,
        schema: &AttributeSchema,
        features: &[FeatureRecord],
    ) -> WaterResult<()>;
}

fn remove_if_exists(path: &Path) -> WaterResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(WaterError::Write(format!(
            "Cannot replace {}: {}",
            path.display(),
            e
        ))),
    }
}

/// OGR driver backed sink (Shapefile, GeoPackage, ...)
#[derive(Debug, Clone)]
pub struct GdalVectorSink {
    driver_name: String,
}

impl GdalVectorSink {
    pub fn new(driver_name: impl Into<String>) -> Self {
        Self {
            driver_name: driver_name.into(),
        }
    }

    fn remove_existing(&self, path: &Path) -> WaterResult<()> {
        if self.driver_name == "ESRI Shapefile" {
            for ext in ["shp", "shx", "dbf", "prj", "cpg", "qix"] {
                remove_if_exists(&path.with_extension(ext))?;
            }
            Ok(())
        } else {
            remove_if_exists(path)
        }
    }

    fn ogr_field_type(field_type: FieldType) -> OGRFieldType::Type {
        match field_type {
            FieldType::String => OGRFieldType::OFTString,
            FieldType::Integer => OGRFieldType::OFTInteger64,
            FieldType::Real => OGRFieldType::OFTReal,
        }
    }

    fn field_value(value: &AttributeValue) -> FieldValue {
        match value {
            AttributeValue::String(s) => FieldValue::StringValue(s.clone()),
            AttributeValue::Integer(i) => FieldValue::Integer64Value(*i),
            AttributeValue::Real(r) => FieldValue::RealValue(*r),
        }
    }

    fn write(&self, path: &Path, crs: &Crs, schema: &AttributeSchema, features: &[FeatureRecord]) -> gdal::errors::Result<()> {
        let driver = DriverManager::get_driver_by_name(&self.driver_name)?;
        let mut dataset = driver.create_vector_only(path)?;
        let srs = SpatialRef::from_definition(crs.as_str())?;
        let layer_name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "water".to_string());

        let mut layer = dataset.create_layer(LayerOptions {
            name: &layer_name,
            srs: Some(&srs),
            ty: OGRwkbGeometryType::wkbPolygon,
            ..Default::default()
        })?;

        let definitions: Vec<(&str, OGRFieldType::Type)> = schema
            .fields()
            .iter()
            .map(|f| (f.name.as_str(), Self::ogr_field_type(f.field_type)))
            .collect();
        layer.create_defn_fields(&definitions)?;

        let names = schema.field_names();
        for feature in features {
            let geometry = feature.geometry.to_gdal()?;
            let values: Vec<FieldValue> = schema
                .fields()
                .iter()
                .filter_map(|f| feature.attributes.get(&f.name))
                .map(Self::field_value)
                .collect();
            layer.create_feature_fields(geometry, &names, &values)?;
        }
        Ok(())
    }
}

impl VectorSink for GdalVectorSink {
    fn write_layer(
        &self,
        path: &Path,
        crs: &Crs,
        schema: &AttributeSchema,
        features: &[FeatureRecord],
    ) -> WaterResult<()> {
        self.remove_existing(path)?;
        self.write(path, crs, schema, features).map_err(|e| {
            WaterError::Write(format!("{} ({}): {}", path.display(), self.driver_name, e))
        })?;
        log::debug!("Wrote {} feature(s) with {}", features.len(), self.driver_name);
        Ok(())
    }
}

/// GeoJSON FeatureCollection writer
#[derive(Debug, Clone, Copy, Default)]
pub struct GeoJsonSink;

impl GeoJsonSink {
    fn feature(schema: &AttributeSchema, feature: &FeatureRecord) -> WaterResult<Feature> {
        let mut properties = JsonObject::new();
        for field in schema.fields() {
            if let Some(value) = feature.attributes.get(&field.name) {
                properties.insert(field.name.clone(), serde_json::to_value(value)?);
            }
        }

        Ok(Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(geojson::Value::from(&feature.geometry))),
            id: None,
            properties: Some(properties),
            foreign_members: None,
        })
    }

    /// Named CRS member, as read by OGR's GeoJSON driver
    fn crs_member(crs: &Crs) -> JsonObject {
        let mut members = JsonObject::new();
        members.insert(
            "crs".to_string(),
            serde_json::json!({ "type": "name", "properties": { "name": crs.as_str() } }),
        );
        members
    }
}

impl VectorSink for GeoJsonSink {
    fn write_layer(
        &self,
        path: &Path,
        crs: &Crs,
        schema: &AttributeSchema,
        features: &[FeatureRecord],
    ) -> WaterResult<()> {
        let collection = FeatureCollection {
            bbox: None,
            features: features
                .iter()
                .map(|f| Self::feature(schema, f))
                .collect::<WaterResult<Vec<_>>>()?,
            foreign_members: Some(Self::crs_member(crs)),
        };

        let body = GeoJson::FeatureCollection(collection).to_string();
        fs::write(path, body)
            .map_err(|e| WaterError::Write(format!("{}: {}", path.display(), e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    #[test]
    fn test_geojson_sink_keeps_holes_and_crs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("water.geojson");
        let outer = LineString::from(vec![(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0), (0.0, 0.0)]);
        let hole = LineString::from(vec![(1.0, 1.0), (1.0, 2.0), (2.0, 2.0), (2.0, 1.0), (1.0, 1.0)]);
        let feature = FeatureRecord {
            geometry: Polygon::new(outer, vec![hole]),
            attributes: crate::core::batch_attributes("2021-06-10", "LC08"),
        };

        GeoJsonSink
            .write_layer(&path, &Crs::from_epsg(32722), &AttributeSchema::water_default(), &[feature])
            .unwrap();

        let parsed: GeoJson = fs::read_to_string(&path).unwrap().parse().unwrap();
        let collection = FeatureCollection::try_from(parsed).unwrap();
        assert_eq!(collection.features.len(), 1);
        let crs = &collection.foreign_members.as_ref().unwrap()["crs"];
        assert_eq!(crs["properties"]["name"], "EPSG:32722");

        let feature = &collection.features[0];
        assert_eq!(feature.property("date").and_then(|v| v.as_str()), Some("2021-06-10"));
        match &feature.geometry.as_ref().unwrap().value {
            geojson::Value::Polygon(rings) => {
                assert_eq!(rings.len(), 2);
                assert_eq!(rings[1][1], vec![1.0, 2.0]);
            }
            other => panic!("unexpected geometry {:?}", other),
        }
    }

    #[test]
    fn test_identity_reprojector() {
        let square = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0)];
        let utm = Crs::from_epsg(32722);
        let wgs84 = Crs::from_epsg(4326);

        let same = IdentityReprojector.reproject(&[square.clone()], &utm, &utm).unwrap();
        assert_eq!(same, vec![square.clone()]);
        assert!(IdentityReprojector.reproject(&[square], &utm, &wgs84).is_err());
    }

    #[test]
    fn test_vector_format_extensions() {
        assert_eq!(VectorFormat::default(), VectorFormat::Shapefile);
        assert_eq!(VectorFormat::GeoJson.extension(), "geojson");
        let parsed: VectorFormat = serde_json::from_str("\"geopackage\"").unwrap();
        assert_eq!(parsed, VectorFormat::GeoPackage);
    }
}
