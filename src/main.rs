// src/main.rs
mod config;
mod cvm;
mod discovery;
mod driver;
mod math;
mod model;
mod storage;
mod utils;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use config::Settings;
use cvm::CvmClient;
use discovery::{build_scrape_queue, discover, DiscoveryOutcome};
use driver::{BatchDriver, DriverReport};
use model::CompanyInfo;
use storage::{CompanyRegistry, MainStore, SectorRouter};
use utils::AppError;

/// B3/CVM financial statement scraper and normalizer
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON settings file; missing fields keep their defaults
    #[arg(short, long, env = "B3_CONFIG")]
    config: Option<PathBuf>,

    /// Folder holding the main database and the sector stores
    #[arg(long)]
    db_folder: Option<PathBuf>,

    /// Filings fetched between two store flushes
    #[arg(long)]
    batch_size: Option<usize>,

    /// Debug mode - verbose logs and annotated copies of unreadable pages
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show which NSD ids would be probed next
    Discover,
    /// Probe new and missing NSD ids, then store their statements
    Sync,
    /// Fetch statements of known filings not stored yet
    Scrape,
    /// Rebuild normalized stores from the as-reported ones
    Recalc,
    /// Load company classifications from a JSON array
    ImportCompanies { path: PathBuf },
}

fn load_settings(args: &Args) -> Result<Settings, AppError> {
    let mut settings = match &args.config {
        Some(path) => Settings::from_file(path)?,
        None => Settings::default(),
    };
    if let Some(folder) = &args.db_folder {
        settings.db_folder = folder.clone();
    }
    if let Some(size) = args.batch_size {
        settings.batch_size = size;
    }
    settings.debug |= args.debug;
    settings.validate()?;
    Ok(settings)
}

/// Flag set on Ctrl-C; the driver stops before its next chunk.
fn cancel_on_ctrl_c() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let handle = Arc::clone(&flag);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Ctrl-C received, stopping after the current chunk");
            handle.store(true, Ordering::Relaxed);
        }
    });
    flag
}

fn log_driver_report(report: &DriverReport) {
    tracing::info!(
        "Processed {} items ({} filings found), {} records, {}{}",
        report.processed,
        report.filings_found,
        report.records,
        report.persist.summary(),
        if report.cancelled { " (cancelled)" } else { "" }
    );
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // 1. Parse CLI Arguments and settings
    let args = Args::parse();
    let settings = load_settings(&args)?;

    // 2. Setup Logging (reads RUST_LOG env var)
    utils::logging::setup_logging(settings.debug);
    tracing::info!("Starting {:?} with databases in {}", args.command, settings.db_folder.display());

    // 3. Open the stores
    let main_store = MainStore::open(settings.main_db_path())?;
    let router = SectorRouter::new(&settings)?;

    match &args.command {
        Command::Discover => {
            let discovery = discover(&main_store.history()?, chrono::Local::now().naive_local(), settings.max_forward);
            if discovery.outcome == DiscoveryOutcome::NoHistory {
                tracing::info!("No filings known yet; seed the nsd table with a first sync range");
            }
            tracing::info!(
                "{} forward candidates {:?}, {} gaps",
                discovery.forward.len(),
                discovery.forward.first().zip(discovery.forward.last()),
                discovery.gaps.len()
            );
        }
        Command::Sync => {
            let discovery = discover(&main_store.history()?, chrono::Local::now().naive_local(), settings.max_forward);
            let registry = CompanyRegistry::load(&main_store, &settings.legal_terms)?;
            let client = CvmClient::new(&settings.cvm)?;
            let driver = BatchDriver::new(&client, &settings, &main_store, &registry, &router)
                .with_cancel_flag(cancel_on_ctrl_c());
            let report = driver.run(discovery.candidates()).await;
            log_driver_report(&report);
        }
        Command::Scrape => {
            let registry = CompanyRegistry::load(&main_store, &settings.legal_terms)?;
            let filings = main_store.filings_of_types(&settings.finsheet_types)?;
            let queue = build_scrape_queue(filings, &registry, &router.stored_versions()?);
            let client = CvmClient::new(&settings.cvm)?;
            let driver = BatchDriver::new(&client, &settings, &main_store, &registry, &router)
                .with_cancel_flag(cancel_on_ctrl_c());
            let report = driver.run_queue(queue).await;
            log_driver_report(&report);
        }
        Command::Recalc => {
            let report = router.recalculate()?;
            tracing::info!("Recalculation finished: {}", report.summary());
        }
        Command::ImportCompanies { path } => {
            let raw = std::fs::read_to_string(path)?;
            let companies: Vec<CompanyInfo> = serde_json::from_str(&raw)
                .map_err(|e| AppError::Processing(format!("Invalid company list {}: {}", path.display(), e)))?;
            for company in &companies {
                main_store.upsert_company(company)?;
            }
            tracing::info!("Imported {} companies", companies.len());
        }
    }

    Ok(())
}
