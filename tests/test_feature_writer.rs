use gdal::vector::LayerAccess;
use gdal::Dataset;
use geo::{polygon, Area};
use waterline::core::{batch_attributes, year_output_path, FeatureWriter};
use waterline::io::{read_area_of_interest, GdalVectorSink, VectorFormat};
use waterline::{AttributeSchema, Crs};

fn lakes() -> Vec<geo::Polygon<f64>> {
    vec![
        polygon![(x: 0.0, y: 0.0), (x: 30.0, y: 0.0), (x: 30.0, y: 30.0), (x: 0.0, y: 30.0)],
        polygon![(x: 90.0, y: 90.0), (x: 150.0, y: 90.0), (x: 150.0, y: 120.0), (x: 90.0, y: 120.0)],
    ]
}

#[test]
fn test_shapefile_roundtrip() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let path = year_output_path(dir.path(), 2013, "water", VectorFormat::Shapefile.extension());

    let sink = GdalVectorSink::new("ESRI Shapefile");
    let writer = FeatureWriter::new(&sink, AttributeSchema::water_default());
    let count = writer
        .write(&path, lakes(), &Crs::from_epsg(32722), &batch_attributes("2013-07-02", "LC08"))
        .unwrap();
    assert_eq!(count, 2);

    let dataset = Dataset::open(&path).unwrap();
    let mut layer = dataset.layer(0).unwrap();
    assert_eq!(layer.feature_count(), 2);
    for feature in layer.features() {
        assert_eq!(feature.field_as_string_by_name("date").unwrap().as_deref(), Some("2013-07-02"));
        assert_eq!(feature.field_as_string_by_name("satellite").unwrap().as_deref(), Some("LC08"));
    }
}

#[test]
fn test_rewrite_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("2007").join("water_2007.shp");
    let sink = GdalVectorSink::new("ESRI Shapefile");
    let writer = FeatureWriter::new(&sink, AttributeSchema::water_default());
    let attributes = batch_attributes("2007-05-14", "LT05");

    writer.write(&path, lakes(), &Crs::from_epsg(32722), &attributes).unwrap();
    writer.write(&path, lakes(), &Crs::from_epsg(32722), &attributes).unwrap();

    let dataset = Dataset::open(&path).unwrap();
    let layer = dataset.layer(0).unwrap();
    assert_eq!(layer.feature_count(), 2);
}

#[test]
fn test_written_polygons_read_back_as_area_of_interest() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("area.shp");
    let sink = GdalVectorSink::new("ESRI Shapefile");
    let writer = FeatureWriter::new(&sink, AttributeSchema::water_default());
    writer
        .write(&path, lakes(), &Crs::from_epsg(32722), &batch_attributes("", ""))
        .unwrap();

    let aoi = read_area_of_interest(&path).unwrap();
    assert_eq!(aoi.polygons.len(), 2);
    let area: f64 = aoi.polygons.iter().map(|p| p.unsigned_area()).sum();
    assert!((area - (900.0 + 1800.0)).abs() < 1e-6);
    assert!(!aoi.crs.is_empty());
}
