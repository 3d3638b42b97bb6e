//! Gacha history export tool
//!
//! Reads the gacha history screen of Snowbreak: Containment Zone page by
//! page, recognizes the rows with Tesseract and merges them into a
//! per-account history on disk, plus a readable CSV table.

mod capture;
mod config;
mod merge;
mod ocr;
mod parse;
mod paths;
mod pipeline;
mod record;
mod scan;
mod store;

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::capture::{DirectorySource, FrameRecorder, FrameSource, WindowCapture};
use crate::config::ExportConfig;
use crate::ocr::{ensure_tesseract, TesseractEngine};
use crate::parse::ItemCatalog;
use crate::pipeline::{RunContext, RunReport};
use crate::record::AccountId;
use crate::scan::OcrPageReader;
use crate::store::AccountStore;

const LOG_FILE: &str = "gacha_export.log";

#[derive(Parser)]
#[command(
    name = "gacha-export",
    version,
    about = "Export gacha pull history from the game screen"
)]
struct Cli {
    /// Config file (default: config.json next to the executable)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Where account histories are stored (default: records/ next to the executable)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Account UID to write to, instead of the one read from screen
    #[arg(long, global = true)]
    account: Option<String>,

    /// Banner shown on screen; required unless config.json sets default_pool
    #[arg(long, global = true)]
    pool: Option<String>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Capture the open history screen; turn the pages in game while it runs
    Scan,
    /// Run the same export on saved page screenshots
    Replay {
        /// Directory of screenshots, read in file name order
        dir: PathBuf,
    },
    /// Regenerate the readable table of a stored account (needs --account)
    Export,
    /// List accounts with a stored history
    Accounts,
}

fn init_logging(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let log_path = paths::get_logs_dir().join(LOG_FILE);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("opening log file {}", log_path.display()))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        .try_init()?;
    Ok(())
}

fn install_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        let msg = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        let location = panic_info
            .location()
            .map(|loc| format!(" at {}:{}:{}", loc.file(), loc.line(), loc.column()))
            .unwrap_or_default();
        error!("[PANIC]{} {}", location, msg);
    }));
}

fn main() {
    let cli = Cli::parse();

    // Log directory first, so the log file can be opened
    if let Err(e) = paths::ensure_directories() {
        eprintln!("Failed to create output directories: {}", e);
    }
    if let Err(e) = init_logging(cli.verbose) {
        eprintln!("Logging to file disabled: {:#}", e);
    }
    install_panic_hook();

    if let Err(e) = run(cli) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);
    let config = config::load_config(&config_path);
    let store = AccountStore::new(cli.data_dir.clone().unwrap_or_else(paths::get_records_dir));
    let account = cli
        .account
        .as_deref()
        .map(AccountId::parse)
        .transpose()?;

    match cli.command {
        Command::Accounts => {
            let accounts = store.list_accounts()?;
            if accounts.is_empty() {
                info!("No stored accounts in {}", store.root().display());
            }
            for id in accounts {
                println!("{}", id);
            }
            Ok(())
        }
        Command::Export => {
            let account = account.context("export needs --account <uid>")?;
            let catalog = load_catalog(&config);
            let path = pipeline::regenerate_export(&store, &catalog, &account)?;
            println!("{}", path.display());
            Ok(())
        }
        Command::Scan => {
            let ctx = run_context(&config, store, account, cli.pool);
            let capture = WindowCapture::attach(&config.window_titles, &config.scan)?;
            info!("Open the gacha history and turn the pages; stop by leaving the last page open");
            let mut source: Box<dyn FrameSource> = if config.scan.save_frames {
                let dir = paths::get_screenshots_dir()
                    .join(Local::now().format("%Y%m%d_%H%M%S").to_string());
                Box::new(FrameRecorder::new(capture, dir)?)
            } else {
                Box::new(capture)
            };
            export(&mut *source, &config, &ctx)
        }
        Command::Replay { dir } => {
            let ctx = run_context(&config, store, account, cli.pool);
            let mut source = DirectorySource::open(&dir)?;
            export(&mut source, &config, &ctx)
        }
    }
}

fn load_catalog(config: &ExportConfig) -> ItemCatalog {
    let path = config
        .catalog_path
        .clone()
        .unwrap_or_else(paths::get_default_catalog_path);
    ItemCatalog::load_or_default(&path)
}

fn run_context(
    config: &ExportConfig,
    store: AccountStore,
    account: Option<AccountId>,
    pool: Option<String>,
) -> RunContext {
    RunContext {
        account,
        default_pool: pool.or_else(|| config.default_pool.clone()),
        max_pages: config.scan.max_pages,
        columns: config.layout.columns.clone(),
        catalog: load_catalog(config),
        store,
    }
}

fn export<S: FrameSource + ?Sized>(
    source: &mut S,
    config: &ExportConfig,
    ctx: &RunContext,
) -> Result<()> {
    let tesseract = ensure_tesseract(&config.ocr).context("Tesseract is not available")?;
    let engine = TesseractEngine::new(tesseract, &config.ocr);
    let reader = OcrPageReader::new(engine, config.layout.clone(), config.ocr.threshold);

    let report = pipeline::run_export(source, &reader, ctx)?;
    print_summary(&report);
    Ok(())
}

fn print_summary(report: &RunReport) {
    println!("Account:     {}", report.account_id);
    println!("Pages read:  {}", report.pages);
    println!("Rows parsed: {}", report.parsed);
    println!("New pulls:   {}", report.newly_added.len());
    for record in &report.newly_added {
        println!("  + {}", record);
    }
    println!("Total:       {}", report.total);
    if let Some(path) = &report.export_path {
        println!("Export:      {}", path.display());
    }

    let dropped = report.parse_warnings.iter().filter(|w| w.dropped()).count();
    if dropped > 0 {
        println!("Skipped {} unreadable rows, see the log for details", dropped);
    }
    if report.incomplete {
        warn!("The scan stopped at the page limit; run again to read the remaining pages");
    }
    if report.merge_warnings.iter().any(|w| w.is_gap()) {
        warn!("Some pools may be missing pulls between this capture and the stored history");
    }
}
