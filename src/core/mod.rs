//! Core water extraction modules

pub mod clip;
pub mod composite;
pub mod index;
pub mod pipeline;
pub mod polygonize;
pub mod writer;

// Re-export main types
pub use clip::{crop_window, mask_outside, RasterClipper};
pub use composite::{false_color, percentile_stretch, write_band_mapping, write_composite};
pub use index::{normalized_difference, IndexCalculator};
pub use pipeline::{PipelineSettings, PipelineStage, RunSummary, YearPipeline, YearReport, YearStatus};
pub use polygonize::{build_mask, total_area, PolygonExtractor, TraceOptions};
pub use writer::{batch_attributes, year_output_path, FeatureWriter};
