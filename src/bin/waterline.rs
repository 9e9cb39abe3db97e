//! Command-line entry point: per-year water polygon extraction and
//! false-color composites driven by a JSON configuration file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use waterline::{PipelineConfig, Threshold, Year, YearPipeline};

#[derive(Parser, Debug)]
#[command(name = "waterline", about = "Extract surface-water polygons from Landsat band catalogs")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Threshold the water index and write one polygon dataset per year
    Extract {
        /// Pipeline configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Override the configured index threshold
        #[arg(short, long, allow_hyphen_values = true)]
        threshold: Option<f64>,

        /// Comma-separated years (default: configured years or the whole catalog)
        #[arg(short, long, value_delimiter = ',')]
        years: Vec<Year>,
    },
    /// Write stretched NIR/RED/GREEN composites for visual checks
    Compose {
        #[arg(short, long)]
        config: PathBuf,

        #[arg(short, long, value_delimiter = ',')]
        years: Vec<Year>,
    },
}

fn load(config_path: &Path, years: Vec<Year>) -> Result<(PipelineConfig, YearPipeline, Vec<Year>)> {
    let mut config = PipelineConfig::from_file(config_path)
        .with_context(|| format!("Failed to load configuration {}", config_path.display()))?;
    if !years.is_empty() {
        config.years = years;
    }

    let pipeline = YearPipeline::from_config(&config).context("Failed to set up pipeline")?;
    let years = config.years_to_process(pipeline.catalog());
    if years.is_empty() {
        log::warn!("No years to process");
    }
    Ok((config, pipeline, years))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match args.command {
        Command::Extract {
            config,
            threshold,
            years,
        } => {
            let (config, pipeline, years) = load(&config, years)?;
            let threshold = match threshold {
                Some(value) => Threshold::new(value).context("Invalid --threshold")?,
                None => config.threshold,
            };

            let summary = pipeline.run(&years, threshold);
            println!("{}", summary);
        }
        Command::Compose { config, years } => {
            let (_, pipeline, years) = load(&config, years)?;
            for (year, result) in pipeline.compose_all(&years) {
                match result {
                    Ok(path) => println!("  {}  ok       {}", year, path.display()),
                    Err(e) => println!("  {}  skipped  {}", year, e),
                }
            }
        }
    }

    Ok(())
}
