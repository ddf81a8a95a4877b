//! rusts2ag - Semantic Scholar harvesting and enrichment pipeline
//!
//! ## Usage
//!
//! ```bash
//! rusts2ag harvest --config config_broad.json --config config_precise.json
//! rusts2ag enrich --params params.json
//! rusts2ag download --workers 8
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rusts2ag::config::{DirOverrides, EnrichParams, OutputLayout};
use rusts2ag::download::{self, DEFAULT_WORKERS};
use rusts2ag::harvest::{self, Harvester};
use rusts2ag::provenance::DecisionLog;
use rusts2ag::retry::TokioSleeper;
use rusts2ag::transport::ReqwestTransport;
use rusts2ag::{enrich, export, logging, table};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Timeout for bulk search requests
const HARVEST_TIMEOUT: Duration = Duration::from_secs(60);

// ============================================================================
// CLI Definition
// ============================================================================

/// Semantic Scholar Academic Graph harvesting and enrichment pipeline
#[derive(Parser)]
#[command(name = "rusts2ag")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Show every log level on the console
    #[arg(short, long, global = true)]
    debug: bool,

    /// Base directory for all outputs
    #[arg(long, global = true, default_value = ".")]
    base_dir: PathBuf,

    /// Raw page directory (default: <base>/raw)
    #[arg(long, global = true)]
    raw_dir: Option<PathBuf>,

    /// Merged raw JSON directory (default: <base>/intermediate)
    #[arg(long, global = true)]
    intermediate_dir: Option<PathBuf>,

    /// CSV/XLSX directory (default: <base>/CSVs)
    #[arg(long, global = true)]
    csv_dir: Option<PathBuf>,

    /// Ledger and log directory (default: <base>/logs)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Harvest every configured mode from the bulk search endpoint
    Harvest {
        /// Mode config files, harvested in order
        #[arg(long = "config", default_values = ["config_broad.json", "config_precise.json"])]
        configs: Vec<PathBuf>,
    },

    /// Enrich the harvested CSVs and export the extracted dataset
    Enrich {
        /// CSV file or directory with broad.csv/precise.csv (default: CSV directory)
        #[arg(long)]
        input: Option<PathBuf>,

        /// Enrichment params (default: ./params.json)
        #[arg(long)]
        params: Option<PathBuf>,
    },

    /// Download open-access PDFs listed in a CSV
    Download {
        /// CSV with paperId and url/open_access_pdf_url columns
        /// (default: <csv>/extracted_dataset.csv)
        #[arg(long)]
        input: Option<PathBuf>,

        /// Output directory for PDFs (default: <base>/papers)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Concurrent downloads
        #[arg(long, default_value_t = DEFAULT_WORKERS)]
        workers: usize,
    },
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let overrides = DirOverrides {
        raw: cli.raw_dir.clone(),
        intermediate: cli.intermediate_dir.clone(),
        csv: cli.csv_dir.clone(),
        logs: cli.log_dir.clone(),
    };
    let layout = OutputLayout::resolve(&cli.base_dir, &overrides);
    layout.ensure().context("Failed to create output directories")?;
    logging::init(Some(&layout.logs), cli.debug).context("Failed to initialize logging")?;

    match cli.command {
        Commands::Harvest { configs } => run_harvest(&layout, &configs).await,
        Commands::Enrich { input, params } => run_enrich(&layout, input, params).await,
        Commands::Download { input, out, workers } => run_download(&layout, input, out, workers).await,
    }
}

// ============================================================================
// Harvest
// ============================================================================

async fn run_harvest(layout: &OutputLayout, configs: &[PathBuf]) -> Result<()> {
    let modes = harvest::load_modes(configs).context("Failed to load harvest configs")?;
    let transport = ReqwestTransport::new(HARVEST_TIMEOUT)?;
    let log = DecisionLog::to_file(layout.logs.join("harvest_client.log"));
    let harvester = Harvester::new(&transport, &TokioSleeper, log);

    let unified = harvester
        .run_all(&modes, layout)
        .await
        .context("Harvest failed")?;

    for mode in &unified.modes {
        let status = if mode.aborted() { "ABORTED" } else { "ok" };
        println!("{:<8} {:>7} records  [{}]", mode.mode, mode.hits_retrieved, status);
        for note in &mode.notes {
            println!("         {}", note);
        }
    }
    println!("Unified ledger: {:?}", layout.logs.join("harvest_ledger.json"));
    Ok(())
}

// ============================================================================
// Enrich + Export
// ============================================================================

async fn run_enrich(layout: &OutputLayout, input: Option<PathBuf>, params: Option<PathBuf>) -> Result<()> {
    let params = EnrichParams::load(params.as_deref()).context("Failed to load enrichment params")?;
    let input = input.unwrap_or_else(|| layout.csv.clone());
    let dataset = table::load_input(&input)
        .with_context(|| format!("Failed to load input from {}", input.display()))?;

    let transport = ReqwestTransport::new(params.s2.timeout())?;
    let enriched = enrich::enrich_extract(dataset, &params, layout, &transport, &TokioSleeper)
        .await
        .context("Enrichment failed")?;

    let flag = enriched
        .get(0, enrich::ENRICHED_FLAG)
        .unwrap_or("FALSE")
        .to_string();
    let paths = export::export_extracted(&enriched, &layout.csv).context("Export failed")?;
    info!(rows = enriched.len(), s2_enriched = %flag, "Enrich run complete");

    println!("Rows:        {}", enriched.len());
    println!("s2_enriched: {}", flag);
    println!("Saved:       {:?}", paths.xlsx);
    println!("Saved:       {:?}", paths.csv);
    Ok(())
}

// ============================================================================
// Download
// ============================================================================

async fn run_download(
    layout: &OutputLayout,
    input: Option<PathBuf>,
    out: Option<PathBuf>,
    workers: usize,
) -> Result<()> {
    let input = input.unwrap_or_else(|| layout.csv.join("extracted_dataset.csv"));
    let out = out.unwrap_or_else(|| layout.base.join("papers"));
    let tasks = download::read_tasks(&input)
        .with_context(|| format!("Failed to read download list {}", input.display()))?;

    let report = download::download_all(tasks, &out, workers, download::reqwest_factory, &TokioSleeper)
        .await
        .context("Download run failed")?;

    println!(
        "Downloaded: {}  Skipped: {}  Failed: {}",
        report.downloaded,
        report.skipped,
        report.failures.len()
    );
    if !report.failures.is_empty() {
        println!("Failures written to {:?}", out.join("download_failures.csv"));
    }
    Ok(())
}
