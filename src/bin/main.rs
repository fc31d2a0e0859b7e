use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;
use wsi_sampler::api::{DatasetState, create_router};
use wsi_sampler::{
    DatabaseConfig, Downloader, ExportOptions, LoadOptions, PatchGenerator, SamplerConfig,
    Split, export_patches, load_manifest_or_default, open_dataset,
};

#[derive(Parser)]
#[command(name = "wsi-sampler")]
#[command(about = "Whole-slide image download and patch sampling for object detection")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command that builds the slide dataset.
#[derive(Args, Debug)]
struct DatasetArgs {
    /// SlideRunner annotation database, e.g. sqlite://MITOS_WSI_CCMCT_ODAEL.sqlite
    #[arg(long, env = "WSI_DATABASE_URL")]
    db_url: String,
    /// Directory holding the slide files named in the database
    #[arg(long, default_value = "WSI")]
    base_path: PathBuf,
    /// Comma-separated slide uids that form the test set
    #[arg(long, value_delimiter = ',')]
    test_ids: Vec<i64>,
    /// Patch edge length in pixels
    #[arg(long)]
    size: Option<u32>,
    /// Pyramid level patches are read from
    #[arg(long, default_value_t = 0)]
    level: usize,
    #[arg(long)]
    positive_class: Option<i64>,
    #[arg(long)]
    negative_class: Option<i64>,
    /// Share of patches centred on an annotated box
    #[arg(long, default_value_t = 0.0)]
    positive_fraction: f64,
    /// Skip slides whose file cannot be opened
    #[arg(long, default_value_t = false)]
    skip_missing: bool,
}

impl DatasetArgs {
    fn sampler_config(&self, seed: Option<u64>) -> Result<SamplerConfig> {
        let defaults = SamplerConfig::default();
        let config = SamplerConfig {
            size: self.size.unwrap_or(defaults.size),
            level: self.level,
            positive_class: self.positive_class.unwrap_or(defaults.positive_class),
            negative_class: self.negative_class.unwrap_or(defaults.negative_class),
            positive_fraction: self.positive_fraction,
            seed,
            ..defaults
        };
        config.validate()?;
        Ok(config)
    }

    async fn load(&self, seed: Option<u64>) -> Result<wsi_sampler::SlideDataset> {
        let config = self.sampler_config(seed)?;
        let test_ids: HashSet<i64> = self.test_ids.iter().copied().collect();

        let mut options = LoadOptions::from_config(&config, &self.base_path, test_ids);
        options.skip_missing = self.skip_missing;

        info!("Using annotation database {}", self.db_url);
        open_dataset(DatabaseConfig::with_url(&self.db_url), &options).await
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Download the slides listed in a manifest (default: the public figshare set)
    Download {
        /// Manifest JSON; falls back to WSI_MANIFEST, then the built-in list
        #[arg(long)]
        manifest: Option<PathBuf>,
        /// Directory the manifest paths are resolved against
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
        #[arg(long, default_value_t = 2)]
        concurrency: usize,
        /// Write the download report as JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Create an empty SlideRunner-compatible annotation database
    Init {
        #[arg(long, env = "WSI_DATABASE_URL")]
        db_url: String,
    },
    /// Load the dataset and print the training/test partition
    Summary {
        #[command(flatten)]
        dataset: DatasetArgs,
    },
    /// Sample patches from one split and write them with a detection manifest
    Export {
        #[command(flatten)]
        dataset: DatasetArgs,
        #[arg(long, default_value = "training")]
        split: Split,
        #[arg(long, default_value_t = 100)]
        count: usize,
        #[arg(long, default_value = "patches")]
        out_dir: PathBuf,
        /// Prefix for source-ref entries, e.g. s3://bucket/patches/training/
        #[arg(long)]
        source_prefix: Option<String>,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Serve slides, patches and samples over HTTP
    Serve {
        #[command(flatten)]
        dataset: DatasetArgs,
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: String,
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("wsi_sampler=info".parse()?)
                .add_directive("sqlx=warn".parse()?),
        )
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Download {
            manifest,
            out_dir,
            concurrency,
            report,
        } => {
            let manifest = load_manifest_or_default(manifest.as_deref())?;
            let downloader = Downloader::new(&out_dir, concurrency);
            let result = downloader.download_all(&manifest).await?;

            if let Some(path) = report {
                std::fs::write(&path, serde_json::to_string_pretty(&result)?)?;
                info!("Report written to {}", path.display());
            }

            println!(
                "Downloaded {}, skipped {}, failed {}",
                result.downloaded.len(),
                result.skipped.len(),
                result.failed.len()
            );
            for failed in &result.failed {
                println!("  FAILED {} ({}): {}", failed.path.display(), failed.url, failed.error);
            }
        }
        Commands::Init { db_url } => {
            info!("Initializing annotation database at {}", db_url);
            let db = wsi_sampler::create_connection(DatabaseConfig::with_url(db_url)).await?;
            wsi_sampler::ensure_schema(&db).await?;
            db.close().await;
            info!("Database initialized successfully");
        }
        Commands::Summary { dataset } => {
            let dataset = dataset.load(None).await?;
            let summary = dataset.summary();

            println!(
                "{} slides: {} training, {} test, {} boxes",
                dataset.len(),
                summary.training_slides,
                summary.test_slides,
                summary.boxes
            );
            println!(
                "{:<6} {:<8} {:<10} {:<8} {}",
                "INDEX", "SLIDE", "SPLIT", "BOXES", "FILE"
            );
            println!("{}", "-".repeat(72));
            for slide in &summary.slides {
                println!(
                    "{:<6} {:<8} {:<10} {:<8} {}",
                    slide.index, slide.slide_id, slide.split, slide.boxes, slide.file
                );
            }
        }
        Commands::Export {
            dataset,
            split,
            count,
            out_dir,
            source_prefix,
            seed,
        } => {
            let slides = dataset.load(seed).await?;

            let mut options = ExportOptions::new(count, split);
            options.source_prefix = source_prefix;

            let generator = PatchGenerator::new(&slides, split, seed);
            let summary = export_patches(generator, &out_dir, &options)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Serve {
            dataset,
            bind,
            seed,
        } => {
            let slides = dataset.load(seed).await?;
            let state = Arc::new(Mutex::new(DatasetState::new(slides, seed)));
            let app = create_router(state);

            let listener = tokio::net::TcpListener::bind(&bind).await?;
            info!("Patch server listening on http://{}", bind);
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}
