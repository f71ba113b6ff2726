// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::{Context, Result};
use clap::Parser;
use merchant_batch_archive::config::{CliArgs, Command, Config, LoggingConfig};
use merchant_batch_archive::entities::{CardSchemeRegistry, MerchantRegistry};
use merchant_batch_archive::{pipeline, PipelineError, Scope, Storage};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = CliArgs::parse();
    let config = Config::load(&cli);
    init_logging(&config.logging)?;

    tracing::debug!(
        version = merchant_batch_archive::VERSION,
        config = %cli.config,
        "configuration loaded"
    );

    let mut storage = Storage::open(&config.storage.setup_db, &config.storage.data_db)
        .context("Failed to open storage")?;

    match run(&cli.command, &config, &mut storage) {
        Ok(()) => Ok(()),
        Err(e) if e.is_nothing_to_do() => {
            println!("Nothing to do: {}", e);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .context("Invalid log level")?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match (&logging.file, logging.json) {
        (Some(path), json) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file '{}'", path.display()))?;
            let builder = builder.with_ansi(false).with_writer(Mutex::new(file));
            if json {
                builder.json().init();
            } else {
                builder.init();
            }
        }
        (None, true) => builder.json().with_writer(std::io::stderr).init(),
        (None, false) => builder.with_writer(std::io::stderr).init(),
    }

    Ok(())
}

fn run(command: &Command, config: &Config, storage: &mut Storage) -> Result<(), PipelineError> {
    let export_dir = config.export.dir.as_path();

    match command {
        Command::ImportMerchants { file } => {
            let import = pipeline::ingest_merchant_list(storage, file)?;
            println!("✓ {} new merchant(s) added", import.added);
        }
        Command::Import { file } => {
            let batch = pipeline::ingest_transactions(storage, file)?;
            println!(
                "✓ Upload {} stored: {} row(s) from {}",
                batch.upload_id, batch.row_count, batch.filename
            );
        }
        Command::Export { upload } => {
            let scope = match upload {
                Some(id) => Scope::Upload(*id),
                None => Scope::All,
            };
            let batch = pipeline::run_export(storage, export_dir, scope)?;
            println!(
                "✓ Export {} written: {} ({} row(s))",
                batch.export_id,
                export_dir.join(&batch.filename).display(),
                batch.row_count
            );
        }
        Command::Report { json } => {
            let report = pipeline::build_report(storage, Some(export_dir))?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
            } else {
                print_report(&report);
            }
        }
        Command::History => {
            let history = pipeline::batch_history(storage)?;
            println!("Uploads");
            for b in &history.uploads {
                println!(
                    "  #{:<4} {}  {:<6} {:>7}  {}",
                    b.upload_id,
                    b.uploaded_at.format("%Y-%m-%d %H:%M:%S"),
                    if b.success { "ok" } else { "FAILED" },
                    b.row_count,
                    b.filename
                );
            }
            println!("Exports");
            for b in &history.exports {
                println!(
                    "  #{:<4} {}  {:<6} {:>7}  {}",
                    b.export_id,
                    b.exported_at.format("%Y-%m-%d %H:%M:%S"),
                    if b.success { "ok" } else { "FAILED" },
                    b.row_count,
                    b.filename
                );
            }
        }
        Command::DeleteUpload { id } => {
            let rows = pipeline::delete_upload_batch(storage, *id)?;
            println!("✓ Upload {} deleted ({} live row(s) removed)", id, rows);
        }
        Command::DeleteExport { id } => {
            if pipeline::delete_export_batch(storage, export_dir, *id)? {
                println!("✓ Export {} deleted", id);
            } else {
                println!("Export {} not found", id);
            }
        }
        Command::AddMerchant { name } => {
            let added = MerchantRegistry::new(storage.setup()).add(name)?;
            println!("{} merchant '{}'", if added { "✓ Added" } else { "Already had" }, name);
        }
        Command::RemoveMerchant { name } => {
            let removed = MerchantRegistry::new(storage.setup()).remove(name)?;
            println!("{} merchant '{}'", if removed { "✓ Removed" } else { "No such" }, name);
        }
        Command::AddCardScheme { name } => {
            let added = CardSchemeRegistry::new(storage.setup()).add(name)?;
            println!("{} card scheme '{}'", if added { "✓ Added" } else { "Already had" }, name);
        }
        Command::RemoveCardScheme { name } => {
            let removed = CardSchemeRegistry::new(storage.setup()).remove(name)?;
            println!("{} card scheme '{}'", if removed { "✓ Removed" } else { "No such" }, name);
        }
        Command::View => run_ui_mode(storage)?,
    }

    Ok(())
}

fn print_report(report: &merchant_batch_archive::Report) {
    if report.is_empty() {
        println!("No Data");
        return;
    }

    let header = report.header();
    for month in &report.months {
        println!("\n{}", month.year_month);
        println!("  {}", header[1..].join(" | "));
        for row in &month.rows {
            let mut cells = vec![
                row.merchant_name.clone(),
                row.total_count.to_string(),
                format!("{:.2}", row.sale_amount),
            ];
            cells.extend(
                report
                    .card_schemes
                    .iter()
                    .map(|s| row.scheme_counts.get(s).copied().unwrap_or(0).to_string()),
            );
            println!("  {}", cells.join(" | "));
        }
    }
}

#[cfg(feature = "tui")]
fn run_ui_mode(storage: &Storage) -> Result<(), PipelineError> {
    let report = pipeline::build_report(storage, None)?;
    let live_rows = merchant_batch_archive::db::count_live(storage.data())?;

    let mut app = ui::App::new(report, live_rows);
    if let Err(e) = ui::run_ui(&mut app) {
        tracing::error!(error = %e, "terminal viewer failed");
        eprintln!("Error: {:?}", e);
    }
    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_storage: &Storage) -> Result<(), PipelineError> {
    eprintln!("❌ TUI mode not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    Ok(())
}
