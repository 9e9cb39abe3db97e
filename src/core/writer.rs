use crate::io::VectorSink;
use crate::types::{AttributeSchema, AttributeValue, Attributes, Crs, FeatureRecord, WaterError, WaterResult, Year};
use geo::Polygon;
use std::fs;
use std::path::{Path, PathBuf};

/// Attribute map for the default `{date, satellite}` schema
pub fn batch_attributes(date: &str, satellite: &str) -> Attributes {
    let mut attributes = Attributes::new();
    attributes.insert("date".to_string(), AttributeValue::String(date.to_string()));
    attributes.insert("satellite".to_string(), AttributeValue::String(satellite.to_string()));
    attributes
}

/// `<output_dir>/<year>/<stem>_<year>.<extension>`
pub fn year_output_path(output_dir: &Path, year: Year, stem: &str, extension: &str) -> PathBuf {
    output_dir
        .join(year.to_string())
        .join(format!("{}_{}.{}", stem, year, extension))
}

/// Create `dir` and its parents; an existing directory is not an error
pub fn ensure_directory(dir: &Path) -> WaterResult<()> {
    fs::create_dir_all(dir).map_err(|e| {
        WaterError::Write(format!("Cannot create directory {}: {}", dir.display(), e))
    })
}

/// Serializes polygons with a shared attribute map into one vector dataset
pub struct FeatureWriter<'a> {
    sink: &'a dyn VectorSink,
    schema: AttributeSchema,
}

impl<'a> FeatureWriter<'a> {
    pub fn new(sink: &'a dyn VectorSink, schema: AttributeSchema) -> Self {
        Self { sink, schema }
    }

    /// Write one feature per polygon to `path`, replacing any previous output.
    ///
    /// Returns the number of features written.
    pub fn write(
        &self,
        path: &Path,
        polygons: Vec<Polygon<f64>>,
        crs: &Crs,
        attributes: &Attributes,
    ) -> WaterResult<usize> {
        self.schema.validate(attributes)?;

        let features: Vec<FeatureRecord> = polygons
            .into_iter()
            .map(|geometry| FeatureRecord {
                geometry,
                attributes: attributes.clone(),
            })
            .collect();

        self.write_records(path, crs, &features)
    }

    /// Write prepared feature records; every record must match the schema
    pub fn write_records(&self, path: &Path, crs: &Crs, features: &[FeatureRecord]) -> WaterResult<usize> {
        for feature in features {
            self.schema.validate(&feature.attributes)?;
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_directory(parent)?;
        }

        self.sink.write_layer(path, crs, &self.schema, features)?;
        log::info!("Saved {} polygon(s) to {}", features.len(), path.display());
        Ok(features.len())
    }
}
