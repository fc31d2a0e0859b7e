// Core modules
pub mod config;
pub mod db;
pub mod download;
pub mod geometry;
pub mod slide;
pub mod sampling;

// Dataset preparation
pub mod dataset;
pub mod generator;
pub mod export;
pub mod api;

// Re-export key types and functions
pub use config::{DatasetManifest, SamplerConfig, load_manifest_or_default};
pub use db::{DatabaseConfig, QueryBuilder, create_connection, ensure_schema};
pub use download::{DownloadReport, Downloader};
pub use geometry::BoundingBox;
pub use slide::{
    FormatOpener, ImagePyramid, LabelledBoxes, PyramidOpener, SlideContainer, SlideError,
    SlideFormat, SlideOpener, SlideSource,
};
pub use sampling::{MixedSampler, PatchSampler, RandomOffsetSampler};
pub use dataset::{LoadOptions, SlideDataset, Split, load_slides};
pub use generator::{PatchGenerator, PatchSample};
pub use export::{ExportOptions, ExportSummary, export_patches};

use anyhow::Result;

/// Convenience function to open the annotation database and build the slide
/// dataset in one go. Whole-slide files are read through openslide when the
/// `openslide` feature is enabled, rasters through the image pyramid.
pub async fn open_dataset(db_config: DatabaseConfig, options: &LoadOptions) -> Result<SlideDataset> {
    let db = create_connection(db_config).await?;
    ensure_schema(&db).await?;

    let dataset = load_slides(&db, &FormatOpener::default(), options).await?;
    db.close().await;

    Ok(dataset)
}
