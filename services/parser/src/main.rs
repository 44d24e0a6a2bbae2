//! Parser Service - Loads weight and loss files into the gold loss store
//!
//! Responsibilities:
//! - Read a CSV or XLS/XLSX file from disk
//! - Normalize rows and convert masses to pure gold
//! - Ingest in append or replace mode, in batches
//! - Wipe both datasets on request
//!
//! Dry runs ingest into an in-memory store so the numbers printed are the
//! same ones a live run would produce.

use anyhow::{bail, Context, Result};
use clap::Parser;
use goldloss_core::ingest::DEFAULT_BATCH_SIZE;
use goldloss_core::{
    Config, FileFormat, IngestReport, Ingestor, MemoryStore, PgStore, RecordKind, Store,
    UploadMode,
};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "parser", about = "Loads weight and loss files into the gold loss store")]
struct Args {
    /// Which dataset the file holds: weight or loss
    #[arg(long)]
    kind: Option<RecordKind>,

    /// CSV or XLS/XLSX file to load
    #[arg(long)]
    file: Option<PathBuf>,

    /// add (append) or replace
    #[arg(long, default_value = "add")]
    mode: UploadMode,

    /// Dry run - ingest into memory only, nothing is saved
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Wipe both weight and loss data, then exit
    #[arg(long, default_value = "false", conflicts_with_all = ["kind", "file"])]
    clear: bool,
}

#[derive(Debug, PartialEq)]
enum Action {
    Clear,
    Load { kind: RecordKind, file: PathBuf },
}

impl Args {
    fn action(&self) -> Result<Action> {
        if self.clear {
            return Ok(Action::Clear);
        }
        match (self.kind, &self.file) {
            (Some(kind), Some(file)) => Ok(Action::Load {
                kind,
                file: file.clone(),
            }),
            _ => bail!("--kind and --file are required unless --clear is given"),
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn format_for(path: &Path) -> FileFormat {
    FileFormat::detect(&path.to_string_lossy())
}

async fn load<S: Store + ?Sized>(
    store: &S,
    batch_size: usize,
    kind: RecordKind,
    content: &[u8],
    format: FileFormat,
    mode: UploadMode,
) -> Result<IngestReport> {
    let report = Ingestor::new(store)
        .with_batch_size(batch_size)
        .ingest_content(kind, content, format, mode)
        .await?;
    Ok(report)
}

fn print_report(report: &IngestReport) {
    println!("\nKind: {}", report.kind);
    println!("Mode: {}", report.mode);
    if report.mode.is_replace() {
        println!("Deleted: {} existing rows", report.deleted);
    }
    println!("Rows read: {}", report.received);
    println!("Inserted: {}", report.inserted);
    if report.rejected > 0 {
        println!("Rejected: {} (see log for details)", report.rejected);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let args = Args::parse();
    let action = args.action()?;

    println!("=== Gold Loss Parser ===");
    println!("Mode: {}", if args.dry_run { "dry-run" } else { "live" });

    let upload = match &action {
        Action::Load { kind, file } => {
            println!("Reading file: {}", file.display());
            let content = fs::read(file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let format = format_for(file);
            println!("Content size: {} bytes ({:?})", content.len(), format);
            Some((*kind, content, format))
        }
        Action::Clear => None,
    };

    if args.dry_run {
        match &upload {
            Some((kind, content, format)) => {
                let store = MemoryStore::new();
                let report =
                    load(&store, DEFAULT_BATCH_SIZE, *kind, content, *format, args.mode).await?;
                print_report(&report);
                println!("\nDry run - nothing saved to database");
            }
            None => println!("Dry run - database not cleared"),
        }
        return Ok(());
    }

    let config = Config::from_env()?;
    println!("Connecting to database...");
    let store = PgStore::connect(&config.db_url, config.max_connections)
        .await
        .context("Failed to connect to database")?;
    store.ensure_schema().await?;
    println!("Database connected");

    match upload {
        Some((kind, content, format)) => {
            let report = load(&store, config.batch_size, kind, &content, format, args.mode).await?;
            print_report(&report);
            info!(kind = %report.kind, inserted = report.inserted, "load complete");
        }
        None => {
            let (weight, loss) = Ingestor::new(&store).clear_all().await?;
            println!("Deleted {} weight rows and {} loss rows", weight, loss);
        }
    }

    Ok(())
}
