//! I/O modules for band discovery, rasters, vectors and configuration

pub mod catalog;
pub mod config;
pub mod raster;
pub mod scene;
pub mod vector;

pub use catalog::{locate_in_directory, BandCatalog};
pub use config::{BandRoleTable, BandRoles, PipelineConfig, SceneOverride};
pub use raster::{GdalRasterSource, MemoryRasterSource, RasterInfo, RasterSource};
pub use scene::SceneId;
pub use vector::{
    read_area_of_interest, GdalReprojector, GdalVectorSink, GeoJsonSink, IdentityReprojector,
    Reprojector, VectorFormat, VectorSink,
};
