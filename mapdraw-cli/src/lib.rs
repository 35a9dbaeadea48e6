//! # Mapdraw CLI
//!
//! Headless host for the mapdraw core. It stands in for the map application:
//! it feeds recorded input to the measurement tool and reconciles layer lists
//! against a resource catalog.
//!
//! ## Usage
//!
//! ```bash
//! mapdraw measure --script sketch.json --data-dir ./sketches
//! mapdraw layers --layers layers.json --catalog resources.json
//! ```
//!
//! ## Architecture
//!
//! - `CliArgs` - Command-line arguments parsed with clap
//! - `load_config` / `MeasureArgs::apply` - JSON config file overlaid by flags
//! - `replay` - Drives a `MeasurementTool` through an input script
//! - `layers` - Runs the layer reconciler until every source settled

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]

pub mod layers;
pub mod replay;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use mapdraw_core::{
    DocumentStorage, FileDocumentStorage, GeoJsonSerializer, LayerDescriptor, MapContext, MeasurementConfig,
    MemoryDocumentStorage, ResourceCatalog,
};

pub use layers::{build_catalog, reconcile_layers, CatalogEntry, LayersReport};
pub use replay::{replay, ReplaySummary, Script, ScriptStep};

/// Command-line arguments for mapdraw.
#[derive(Debug, Clone, Parser)]
#[command(name = "mapdraw")]
#[command(about = "Headless host for the mapdraw measurement tool and layer reconciler")]
#[command(version)]
pub struct CliArgs {
    /// JSON file with measurement settings
    #[arg(long, global = true, env = "MAPDRAW_CONFIG")]
    pub config: Option<PathBuf>,

    /// What to run
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Replay an input script through the measurement tool
    Measure(MeasureArgs),
    /// Reconcile a layer list against a resource catalog
    Layers(LayersArgs),
}

/// Arguments of `mapdraw measure`.
#[derive(Debug, Clone, Args)]
pub struct MeasureArgs {
    /// Recorded input script (JSON)
    #[arg(long)]
    pub script: PathBuf,

    /// Directory sketches are stored in. Without it nothing is written to disk.
    #[arg(long, env = "MAPDRAW_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Quiet period before edits are saved, in milliseconds
    #[arg(long, env = "MAPDRAW_SAVE_DELAY_MS")]
    pub save_delay_ms: Option<u64>,

    /// Save every edit immediately
    #[arg(long, env = "MAPDRAW_EMBEDDED")]
    pub embedded: bool,

    /// Id of a stored sketch to continue editing
    #[arg(long)]
    pub restore: Option<String>,
}

impl MeasureArgs {
    /// Overlay these flags on a loaded config.
    #[must_use]
    pub fn apply(&self, mut config: MeasurementConfig) -> MeasurementConfig {
        if let Some(delay) = self.save_delay_ms {
            config.save_delay_ms = delay;
        }
        if self.embedded {
            config.embedded = true;
        }
        if let Some(file_id) = &self.restore {
            config.restore_file_id = Some(file_id.clone());
        }
        config
    }
}

/// Arguments of `mapdraw layers`.
#[derive(Debug, Clone, Args)]
pub struct LayersArgs {
    /// Logical layer list (JSON array of layer descriptors)
    #[arg(long)]
    pub layers: PathBuf,

    /// Resource catalog (JSON array of catalog entries)
    #[arg(long)]
    pub catalog: PathBuf,
}

/// Load the measurement config, or the defaults when no file is given.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub async fn load_config(path: Option<&Path>) -> anyhow::Result<MeasurementConfig> {
    let Some(path) = path else {
        return Ok(MeasurementConfig::default());
    };
    let json = read_file(path).await?;
    MeasurementConfig::from_json(&json).with_context(|| format!("invalid config {}", path.display()))
}

/// Storage for sketches: files under `data_dir`, or memory when absent.
///
/// # Errors
///
/// Returns an error if the data directory cannot be created.
pub fn open_storage(data_dir: Option<&Path>) -> anyhow::Result<Arc<dyn DocumentStorage>> {
    let storage: Arc<dyn DocumentStorage> = match data_dir {
        Some(dir) => Arc::new(
            FileDocumentStorage::with_data_dir(dir)
                .with_context(|| format!("cannot use data dir {}", dir.display()))?,
        ),
        None => {
            tracing::warn!("No data dir configured, sketches are kept in memory only");
            Arc::new(MemoryDocumentStorage::new())
        }
    };
    Ok(storage)
}

/// Run a parsed command, writing JSON lines to `out`.
///
/// # Errors
///
/// Returns an error if an input file is unreadable or the tool fails to start.
pub async fn run(args: CliArgs, out: &mut impl Write) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref()).await?;

    match args.command {
        Command::Measure(measure) => {
            let config = measure.apply(config);
            let script = Script::from_json(&read_file(&measure.script).await?)
                .with_context(|| format!("invalid script {}", measure.script.display()))?;
            let ctx = MapContext::new(
                Arc::new(ResourceCatalog::new()),
                open_storage(measure.data_dir.as_deref())?,
                Arc::new(GeoJsonSerializer),
                config,
            );
            replay(&ctx, &script, out).await?;
        }
        Command::Layers(layers) => {
            let descriptors: Vec<LayerDescriptor> = serde_json::from_str(&read_file(&layers.layers).await?)
                .with_context(|| format!("invalid layer list {}", layers.layers.display()))?;
            let entries: Vec<CatalogEntry> = serde_json::from_str(&read_file(&layers.catalog).await?)
                .with_context(|| format!("invalid catalog {}", layers.catalog.display()))?;
            let ctx = MapContext::new(
                Arc::new(build_catalog(entries)),
                Arc::new(MemoryDocumentStorage::new()),
                Arc::new(GeoJsonSerializer),
                config,
            );
            reconcile_layers(&ctx, descriptors, out).await?;
        }
    }
    Ok(())
}

async fn read_file(path: &Path) -> anyhow::Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("cannot read {}", path.display()))
}
