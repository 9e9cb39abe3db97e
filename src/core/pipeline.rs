//! Per-year orchestration: locate, clip, index, extract, write.
//!
//! Each year runs as an isolated unit. Failures are captured in that year's
//! report and never abort the other years.

use super::clip::RasterClipper;
use super::composite::{self, false_color};
use super::index::IndexCalculator;
use super::polygonize::{total_area, PolygonExtractor, TraceOptions};
use super::writer::{ensure_directory, year_output_path, batch_attributes, FeatureWriter};
use crate::io::{
    read_area_of_interest, BandCatalog, BandRoleTable, GdalRasterSource, GdalReprojector, PipelineConfig,
    RasterSource, Reprojector, SceneId, SceneOverride, VectorFormat, VectorSink,
};
use crate::types::{
    AreaOfInterest, AttributeSchema, Attributes, FeatureRecord, Threshold, WaterError, WaterResult,
    Year, YearBatch,
};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Stages of one year's run, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    LocateBands,
    ClipBands,
    ComputeIndex,
    ExtractPolygons,
    WriteFeatures,
    Done,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::LocateBands => "locate_bands",
            PipelineStage::ClipBands => "clip_bands",
            PipelineStage::ComputeIndex => "compute_index",
            PipelineStage::ExtractPolygons => "extract_polygons",
            PipelineStage::WriteFeatures => "write_features",
            PipelineStage::Done => "done",
        };
        write!(f, "{}", name)
    }
}

/// Outcome of one year
#[derive(Debug, Clone, PartialEq)]
pub enum YearStatus {
    Succeeded {
        feature_count: usize,
        water_area: f64,
        output: PathBuf,
    },
    Skipped {
        stage: PipelineStage,
        kind: &'static str,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct YearReport {
    pub year: Year,
    pub status: YearStatus,
}

impl YearReport {
    fn skipped(year: Year, stage: PipelineStage, error: &WaterError) -> Self {
        Self {
            year,
            status: YearStatus::Skipped {
                stage,
                kind: error.kind(),
                reason: error.to_string(),
            },
        }
    }

    pub fn success(&self) -> bool {
        matches!(self.status, YearStatus::Succeeded { .. })
    }

    /// Polygons written; 0 for skipped years
    pub fn feature_count(&self) -> usize {
        match self.status {
            YearStatus::Succeeded { feature_count, .. } => feature_count,
            YearStatus::Skipped { .. } => 0,
        }
    }
}

/// Reports of a multi-year run, sorted by year
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub reports: Vec<YearReport>,
}

impl RunSummary {
    pub fn succeeded(&self) -> impl Iterator<Item = &YearReport> {
        self.reports.iter().filter(|r| r.success())
    }

    pub fn skipped(&self) -> impl Iterator<Item = &YearReport> {
        self.reports.iter().filter(|r| !r.success())
    }

    pub fn report(&self, year: Year) -> Option<&YearReport> {
        self.reports.iter().find(|r| r.year == year)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Run summary: {} succeeded, {} skipped",
            self.succeeded().count(),
            self.skipped().count()
        )?;
        for report in &self.reports {
            match &report.status {
                YearStatus::Succeeded {
                    feature_count,
                    water_area,
                    output,
                } => writeln!(
                    f,
                    "  {}  ok       {} polygon(s), water area {:.1} -> {}",
                    report.year,
                    feature_count,
                    water_area,
                    output.display()
                )?,
                YearStatus::Skipped { stage, reason, .. } => {
                    writeln!(f, "  {}  skipped  at {}: {}", report.year, stage, reason)?
                }
            }
        }
        Ok(())
    }
}

/// Settings shared by every year of a run
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub output_dir: PathBuf,
    pub format: VectorFormat,
    pub calculator: IndexCalculator,
    pub trace: TraceOptions,
    pub schema: AttributeSchema,
    pub bands: BandRoleTable,
    pub scenes: BTreeMap<Year, SceneOverride>,
}

impl PipelineSettings {
    pub fn new<P: Into<PathBuf>>(output_dir: P) -> Self {
        Self {
            output_dir: output_dir.into(),
            format: VectorFormat::default(),
            calculator: IndexCalculator::default(),
            trace: TraceOptions::default(),
            schema: AttributeSchema::water_default(),
            bands: BandRoleTable::default(),
            scenes: BTreeMap::new(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> WaterResult<Self> {
        Ok(Self {
            output_dir: config.output_dir.clone(),
            format: config.format,
            calculator: IndexCalculator::new(config.bit_depth_max)?,
            trace: TraceOptions {
                connectivity: config.connectivity,
                ..Default::default()
            },
            schema: AttributeSchema::water_default(),
            bands: config.band_roles(),
            scenes: config.scenes.clone(),
        })
    }
}

/// Water extraction pipeline over a fixed catalog and area of interest
pub struct YearPipeline {
    catalog: BandCatalog,
    aoi: AreaOfInterest,
    settings: PipelineSettings,
    source: Box<dyn RasterSource>,
    reprojector: Box<dyn Reprojector>,
    sink: Box<dyn VectorSink>,
}

impl YearPipeline {
    /// Pipeline reading through GDAL and writing `settings.format`
    pub fn new(catalog: BandCatalog, aoi: AreaOfInterest, settings: PipelineSettings) -> Self {
        let sink = settings.format.sink();
        Self {
            catalog,
            aoi,
            settings,
            source: Box::new(GdalRasterSource::new()),
            reprojector: Box::new(GdalReprojector),
            sink,
        }
    }

    /// Load the area of interest and band catalog described by `config`
    pub fn from_config(config: &PipelineConfig) -> WaterResult<Self> {
        let aoi = read_area_of_interest(&config.area_of_interest)?;
        let catalog = config.build_catalog()?;
        let settings = PipelineSettings::from_config(config)?;
        Ok(Self::new(catalog, aoi, settings))
    }

    pub fn with_raster_source(mut self, source: Box<dyn RasterSource>) -> Self {
        self.source = source;
        self
    }

    pub fn with_reprojector(mut self, reprojector: Box<dyn Reprojector>) -> Self {
        self.reprojector = reprojector;
        self
    }

    pub fn with_sink(mut self, sink: Box<dyn VectorSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn catalog(&self) -> &BandCatalog {
        &self.catalog
    }

    /// Output dataset path of a year
    pub fn output_path(&self, year: Year) -> PathBuf {
        year_output_path(&self.settings.output_dir, year, "water", self.settings.format.extension())
    }

    /// Run every year, concurrently when the `parallel` feature is on
    pub fn run(&self, years: &[Year], threshold: Threshold) -> RunSummary {
        log::info!("Processing {} year(s) at threshold {}", years.len(), threshold.value());

        #[cfg(feature = "parallel")]
        let mut reports: Vec<YearReport> = {
            use rayon::prelude::*;
            years.par_iter().map(|&year| self.process(year, threshold)).collect()
        };

        #[cfg(not(feature = "parallel"))]
        let mut reports: Vec<YearReport> = years.iter().map(|&year| self.process(year, threshold)).collect();

        reports.sort_by_key(|r| r.year);
        let summary = RunSummary { reports };
        log::info!("{}", summary);
        summary
    }

    /// Process one year; failures are reported, never propagated
    pub fn process(&self, year: Year, threshold: Threshold) -> YearReport {
        log::info!("🌊 Processing year {}", year);
        let mut stage = PipelineStage::LocateBands;

        match self.run_year(year, threshold, &mut stage) {
            Ok((feature_count, water_area, output)) => {
                log::info!("✅ Year {} done: {} polygon(s)", year, feature_count);
                YearReport {
                    year,
                    status: YearStatus::Succeeded {
                        feature_count,
                        water_area,
                        output,
                    },
                }
            }
            Err(e) => {
                log::warn!("⚠️  Year {} skipped at {}: {}", year, stage, e);
                YearReport::skipped(year, stage, &e)
            }
        }
    }

    fn locate(&self, year: Year) -> WaterResult<YearBatch> {
        let roles = self.settings.bands.roles(year);
        Ok(YearBatch {
            year,
            green_path: self.catalog.locate(year, &roles.green)?.to_path_buf(),
            nir_path: self.catalog.locate(year, &roles.nir)?.to_path_buf(),
            features: Vec::new(),
        })
    }

    fn run_year(
        &self,
        year: Year,
        threshold: Threshold,
        stage: &mut PipelineStage,
    ) -> WaterResult<(usize, f64, PathBuf)> {
        *stage = PipelineStage::LocateBands;
        log::info!("📊 Step 1: Locating bands");
        let mut batch = self.locate(year)?;

        *stage = PipelineStage::ClipBands;
        log::info!("✂️  Step 2: Clipping bands to area of interest");
        let clipper = RasterClipper::new(self.source.as_ref(), self.reprojector.as_ref());
        let green = clipper.clip(&batch.green_path, &self.aoi)?;
        let nir = clipper.clip(&batch.nir_path, &self.aoi)?;
        let crs = green.crs.clone();

        *stage = PipelineStage::ComputeIndex;
        log::info!("💧 Step 3: Computing water index");
        let index = self.settings.calculator.compute(green, nir)?;

        *stage = PipelineStage::ExtractPolygons;
        log::info!("🔺 Step 4: Extracting water polygons");
        let polygons = PolygonExtractor::new(self.settings.trace).extract(&index, threshold)?;
        drop(index);
        let water_area = total_area(&polygons);
        log::info!("Total water polygons extracted: {}", polygons.len());

        *stage = PipelineStage::WriteFeatures;
        log::info!("💾 Step 5: Saving water polygons");
        let attributes = self.batch_attributes(year, &batch.green_path);
        batch.features = polygons
            .into_iter()
            .map(|geometry| FeatureRecord {
                geometry,
                attributes: attributes.clone(),
            })
            .collect();

        let output = self.output_path(year);
        let writer = FeatureWriter::new(self.sink.as_ref(), self.settings.schema.clone());
        let count = writer.write_records(&output, &crs, &batch.features)?;

        *stage = PipelineStage::Done;
        Ok((count, water_area, output))
    }

    /// Date and satellite of a year: configured values first, then the band file name
    fn batch_attributes(&self, year: Year, green_path: &Path) -> Attributes {
        let scene = SceneId::from_path(green_path);
        let overrides = self.settings.scenes.get(&year);

        let satellite = overrides
            .and_then(|o| o.satellite.clone())
            .or_else(|| scene.as_ref().map(|s| s.satellite.clone()));
        let date = overrides
            .and_then(|o| o.date.clone())
            .or_else(|| scene.as_ref().map(|s| s.date_string()));

        if satellite.is_none() || date.is_none() {
            log::warn!(
                "Cannot derive scene metadata for {} from {}",
                year,
                green_path.display()
            );
        }
        batch_attributes(
            date.as_deref().unwrap_or_default(),
            satellite.as_deref().unwrap_or_default(),
        )
    }

    /// Write a stretched NIR/RED/GREEN false-color composite of one year
    /// plus its band mapping file. Returns the composite path.
    pub fn compose(&self, year: Year) -> WaterResult<PathBuf> {
        log::info!("🎨 Composing false-color image for {}", year);
        let roles = self.settings.bands.roles(year);
        let red_code = roles.red.as_deref().ok_or_else(|| {
            WaterError::Config(format!("No red band configured for year {}", year))
        })?;

        let codes = [roles.nir.as_str(), red_code, roles.green.as_str()];
        let paths = codes
            .iter()
            .map(|code| self.catalog.locate(year, code).map(Path::to_path_buf))
            .collect::<WaterResult<Vec<_>>>()?;

        let clipper = RasterClipper::new(self.source.as_ref(), self.reprojector.as_ref());
        let nir = clipper.clip(&paths[0], &self.aoi)?;
        let red = clipper.clip(&paths[1], &self.aoi)?;
        let green = clipper.clip(&paths[2], &self.aoi)?;

        let image = false_color(&nir, &red, &green, composite::DEFAULT_GAIN)?;

        let output = year_output_path(&self.settings.output_dir, year, "composite", "tif");
        if let Some(parent) = output.parent() {
            ensure_directory(parent)?;
        }
        composite::write_composite(&output, &image, &nir.transform, &nir.crs)?;

        let mapping = year_output_path(&self.settings.output_dir, year, "band_mapping", "txt");
        composite::write_band_mapping(&mapping, &paths)?;
        Ok(output)
    }

    /// Compose several years; each result is independent
    pub fn compose_all(&self, years: &[Year]) -> Vec<(Year, WaterResult<PathBuf>)> {
        #[cfg(feature = "parallel")]
        let results = {
            use rayon::prelude::*;
            years.par_iter().map(|&year| (year, self.compose(year))).collect()
        };

        #[cfg(not(feature = "parallel"))]
        let results = years.iter().map(|&year| (year, self.compose(year))).collect();

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{GeoJsonSink, IdentityReprojector, MemoryRasterSource};
    use crate::types::{Crs, GeoTransform, RasterBand};
    use geo::polygon;
    use ndarray::Array2;

    fn pipeline(dir: &Path) -> YearPipeline {
        let transform = GeoTransform::north_up(0.0, 40.0, 10.0, -10.0);
        let crs = Crs::from_epsg(32722);
        let green = Array2::from_shape_fn((4, 4), |(r, _)| if r < 2 { 200.0 } else { 40.0 });
        let nir = Array2::from_elem((4, 4), 60.0);

        let source = MemoryRasterSource::new()
            .with_band("LC08_L1TP_220077_20230115_20230131_02_T1_B3.TIF", RasterBand::new(green, transform, crs.clone(), None))
            .with_band("LC08_L1TP_220077_20230115_20230131_02_T1_B6.TIF", RasterBand::new(nir, transform, crs.clone(), None));

        let mut bands = BTreeMap::new();
        bands.insert(
            2023,
            BTreeMap::from([
                ("B3".to_string(), PathBuf::from("LC08_L1TP_220077_20230115_20230131_02_T1_B3.TIF")),
                ("B6".to_string(), PathBuf::from("LC08_L1TP_220077_20230115_20230131_02_T1_B6.TIF")),
            ]),
        );

        let aoi = AreaOfInterest::new(
            vec![polygon![(x: 0.0, y: 0.0), (x: 40.0, y: 0.0), (x: 40.0, y: 40.0), (x: 0.0, y: 40.0)]],
            crs,
        )
        .unwrap();

        let mut settings = PipelineSettings::new(dir);
        settings.format = VectorFormat::GeoJson;
        YearPipeline::new(BandCatalog::new(bands), aoi, settings)
            .with_raster_source(Box::new(source))
            .with_reprojector(Box::new(IdentityReprojector))
            .with_sink(Box::new(GeoJsonSink))
    }

    #[test]
    fn test_process_year() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());

        let report = pipeline.process(2023, Threshold::new(0.1).unwrap());
        assert!(report.success(), "{:?}", report);
        assert_eq!(report.feature_count(), 1);
        match &report.status {
            YearStatus::Succeeded { water_area, output, .. } => {
                assert!((water_area - 800.0).abs() < 1e-9);
                assert!(output.ends_with("2023/water_2023.geojson"));
            }
            other => panic!("unexpected status {:?}", other),
        }

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(pipeline.output_path(2023)).unwrap()).unwrap();
        assert_eq!(json["features"][0]["properties"]["date"], "2023-01-15");
        assert_eq!(json["features"][0]["properties"]["satellite"], "LC08");
    }

    #[test]
    fn test_missing_year_is_skipped_at_locate() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());

        let report = pipeline.process(2019, Threshold::new(0.1).unwrap());
        assert!(!report.success());
        assert_eq!(report.feature_count(), 0);
        match report.status {
            YearStatus::Skipped { stage, kind, .. } => {
                assert_eq!(stage, PipelineStage::LocateBands);
                assert_eq!(kind, "band_not_found");
            }
            other => panic!("unexpected status {:?}", other),
        }
        assert!(!pipeline.output_path(2019).exists());
    }

    #[test]
    fn test_scene_overrides_win() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = pipeline(dir.path());
        pipeline.settings.scenes.insert(
            2023,
            SceneOverride {
                satellite: Some("LANDSAT_8".to_string()),
                date: None,
            },
        );

        let attributes = pipeline.batch_attributes(2023, Path::new("LC08_L1TP_220077_20230115_20230131_02_T1_B3.TIF"));
        assert_eq!(attributes["satellite"].to_string(), "LANDSAT_8");
        assert_eq!(attributes["date"].to_string(), "2023-01-15");
    }

    #[test]
    fn test_summary_display() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let summary = pipeline.run(&[2019, 2023], Threshold::new(0.1).unwrap());

        assert_eq!(summary.reports.iter().map(|r| r.year).collect::<Vec<_>>(), vec![2019, 2023]);
        let text = summary.to_string();
        assert!(text.contains("1 succeeded, 1 skipped"));
        assert!(text.contains("2019  skipped  at locate_bands"));
    }
}
