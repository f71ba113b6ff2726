// 📦 Export Engine
// Live rows → one CSV per (merchant, month) → single zip archive → purge
//
// Order of operations:
//   1. select rows for the scope
//   2. group by (MerchantName, YYYY-MM)
//   3. write <Merchant>_<YYYY-MM>.csv per group into a staging directory
//   4. zip the group files into export_<timestamp>.zip, drop the staging dir
//   5. record the ExportBatch
//   6. purge exported rows and their upload history
//
// Steps 5 and 6 share one IMMEDIATE transaction. Nothing is purged unless
// the archive was fully written.

use crate::db::{self, LiveTransaction, Scope, Storage};
use crate::error::{PipelineError, Result};
use crate::registry::{self, ExportBatch};
use crate::schema::SOURCE_COLUMNS;
use chrono::{Local, NaiveDateTime};
use rusqlite::TransactionBehavior;
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const ARCHIVE_STAMP_FORMAT: &str = "%Y-%m-%dT%H%M%S%.6f";

/// `export_<timestamp>.zip`
pub fn archive_filename(exported_at: NaiveDateTime) -> String {
    format!("export_{}.zip", exported_at.format(ARCHIVE_STAMP_FORMAT))
}

/// `<Merchant>_<YYYY-MM>.csv`, with characters that are not valid in a
/// file name replaced by `_`
pub fn group_filename(merchant: &str, year_month: &str) -> String {
    let merchant: String = merchant
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    format!("{}_{}.csv", merchant, year_month)
}

/// Rows grouped by (merchant, month), groups in key order
pub fn group_rows(rows: &[LiveTransaction]) -> BTreeMap<(String, String), Vec<&LiveTransaction>> {
    let mut groups: BTreeMap<(String, String), Vec<&LiveTransaction>> = BTreeMap::new();
    for row in rows {
        let key = (
            row.transaction.merchant_name.clone(),
            row.transaction.year_month(),
        );
        groups.entry(key).or_default().push(row);
    }
    groups
}

// ============================================================================
// EXPORT ENGINE
// ============================================================================

pub struct ExportEngine {
    export_dir: PathBuf,
}

impl ExportEngine {
    pub fn new(export_dir: impl Into<PathBuf>) -> Self {
        ExportEngine {
            export_dir: export_dir.into(),
        }
    }

    /// Export the rows selected by `scope` and purge them.
    ///
    /// A scope with no live rows yields `NothingToExport` and records
    /// nothing. Any other failure before the purge records a failed
    /// ExportBatch and leaves live data untouched.
    pub fn run(&self, storage: &mut Storage, scope: Scope) -> Result<ExportBatch> {
        let tx = storage
            .data_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let export_id = registry::next_export_id(&tx)?;
        let exported_at = Local::now().naive_local();
        let mut batch = ExportBatch {
            export_id,
            exported_at,
            success: false,
            row_count: 0,
            filename: archive_filename(exported_at),
        };

        let rows = match db::query_scope(&tx, scope) {
            Ok(rows) if rows.is_empty() => return Err(PipelineError::NothingToExport),
            Ok(rows) => rows,
            Err(e) => return record_failure(tx, batch, e),
        };
        batch.row_count = rows.len();

        let archive_path = self.export_dir.join(&batch.filename);
        if let Err(e) = self.write_archive(&rows, &archive_path, exported_at) {
            return record_failure(tx, batch, e);
        }
        tracing::info!(
            export_id,
            rows = rows.len(),
            archive = %archive_path.display(),
            "archive written"
        );

        batch.success = true;
        match commit_export(tx, &batch, scope) {
            Ok(purged) => {
                tracing::info!(export_id, purged, ?scope, "exported rows purged");
                Ok(batch)
            }
            Err(e) => {
                // the transaction rolled back, so the archive must not outlive it
                remove_quietly(&archive_path);
                tracing::error!(export_id, error = %e, "export bookkeeping failed");
                Err(e)
            }
        }
    }

    fn write_archive(
        &self,
        rows: &[LiveTransaction],
        archive_path: &Path,
        exported_at: NaiveDateTime,
    ) -> Result<()> {
        fs::create_dir_all(&self.export_dir)?;

        let staging = self
            .export_dir
            .join(format!(".export_{}", exported_at.format(ARCHIVE_STAMP_FORMAT)));
        fs::create_dir_all(&staging)?;

        let result = stage_groups(rows, &staging).and_then(|staged| pack(&staged, archive_path));

        if let Err(e) = fs::remove_dir_all(&staging) {
            tracing::warn!(dir = %staging.display(), error = %e, "could not remove staging directory");
        }
        if result.is_err() {
            remove_quietly(archive_path);
        }
        result
    }
}

/// Write one CSV per group; returns (archive entry name, staged path)
fn stage_groups(rows: &[LiveTransaction], staging: &Path) -> Result<Vec<(String, PathBuf)>> {
    let groups = group_rows(rows);
    let mut used = HashSet::new();
    let mut staged = Vec::with_capacity(groups.len());

    for ((merchant, year_month), group) in &groups {
        let name = unique_name(group_filename(merchant, year_month), &mut used);
        let path = staging.join(&name);

        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(SOURCE_COLUMNS)?;
        for row in group {
            writer.write_record(row.transaction.to_record())?;
        }
        writer.flush()?;

        tracing::debug!(file = %name, rows = group.len(), "group staged");
        staged.push((name, path));
    }

    Ok(staged)
}

fn pack(staged: &[(String, PathBuf)], archive_path: &Path) -> Result<()> {
    let mut zip = ZipWriter::new(File::create(archive_path)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (name, path) in staged {
        zip.start_file(name.as_str(), options)?;
        let mut source = File::open(path)?;
        io::copy(&mut source, &mut zip)?;
    }

    zip.finish()?;
    Ok(())
}

/// Two merchants can sanitize to the same file name; suffix the later one
fn unique_name(name: String, used: &mut HashSet<String>) -> String {
    if used.insert(name.clone()) {
        return name;
    }

    let stem = name.trim_end_matches(".csv").to_string();
    let mut n = 2;
    loop {
        let candidate = format!("{}-{}.csv", stem, n);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Record the successful export and purge its rows, as one unit
fn commit_export(tx: rusqlite::Transaction<'_>, batch: &ExportBatch, scope: Scope) -> Result<usize> {
    registry::record_export(&tx, batch)?;

    let purged = db::purge(&tx, scope)?;
    match scope {
        Scope::All => registry::delete_all_uploads(&tx)?,
        Scope::Upload(id) => registry::delete_upload_entry(&tx, id)?,
    };

    tx.commit()?;
    Ok(purged)
}

fn record_failure(
    tx: rusqlite::Transaction<'_>,
    batch: ExportBatch,
    error: PipelineError,
) -> Result<ExportBatch> {
    tracing::error!(export_id = batch.export_id, error = %error, "export failed");

    let recorded = registry::record_export(&tx, &batch)
        .and_then(|_| tx.commit().map_err(PipelineError::from));
    if let Err(e) = recorded {
        tracing::error!(export_id = batch.export_id, error = %e, "could not record failed export");
    }

    Err(error)
}

fn remove_quietly(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "could not remove file"),
    }
}
