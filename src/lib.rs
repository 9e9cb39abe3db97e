//! Waterline: surface-water extraction from multi-spectral satellite imagery
//!
//! For every year of a Landsat band catalog the pipeline clips the GREEN and
//! NIR bands to an area of interest, computes the normalized difference water
//! index, thresholds it and traces the water regions into polygons that are
//! written as one vector dataset per year.

pub mod types;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    AreaOfInterest, AttributeSchema, AttributeValue, Connectivity, Crs, FeatureRecord, GeoTransform,
    IndexRaster, RasterBand, Threshold, WaterError, WaterResult, Year,
};

pub use io::{BandCatalog, PipelineConfig, VectorFormat};
pub use crate::core::{IndexCalculator, PolygonExtractor, RasterClipper, FeatureWriter, YearPipeline};
