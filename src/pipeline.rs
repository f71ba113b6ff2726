// 🔄 Pipeline - collaborator-facing operations
//
// Transaction ingestion:
//   decode → reconcile schema → reference filter → normalize → id + append
//
// Every operation takes the storage handle explicitly. Rejections before
// the store write leave no trace; a failed store write is recorded in
// UploadHistory with success=false and no rows kept.

use crate::db::{self, Scope, Storage, Transaction};
use crate::entities::{CardSchemeRegistry, MerchantRegistry};
use crate::error::{PipelineError, Result};
use crate::export::ExportEngine;
use crate::parser::{decode_file, sanitize_filename, RowSet, SourceFormat};
use crate::reconciliation::ReferenceFilter;
use crate::registry::{self, ExportBatch, UploadBatch};
use crate::report::{self, Report, REPORT_FILENAME};
use crate::schema::SchemaReconciler;
use crate::temporal::TemporalNormalizer;
use chrono::Local;
use rusqlite::TransactionBehavior;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MerchantImport {
    pub added: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchHistory {
    pub uploads: Vec<UploadBatch>,
    pub exports: Vec<ExportBatch>,
}

// ============================================================================
// INGESTION
// ============================================================================

/// Add the distinct merchant names of a file to the Merchants list
pub fn ingest_merchant_list(storage: &Storage, path: &Path) -> Result<MerchantImport> {
    let (format, rows) = decode_file(path)?;
    let names = SchemaReconciler::new().reconcile_merchant_list(&rows)?;
    let added = MerchantRegistry::new(storage.setup()).add_all(&names)?;

    tracing::info!(
        file = %path.display(),
        format = format.code(),
        names = names.len(),
        added,
        "merchant list imported"
    );
    Ok(MerchantImport { added })
}

/// Ingest a transaction file as a new upload batch
pub fn ingest_transactions(storage: &mut Storage, path: &Path) -> Result<UploadBatch> {
    let result = decode_file(path).and_then(|(format, rows)| {
        ingest_rows(storage, format, &rows, &sanitize_filename(path))
    });

    if let Err(e) = &result {
        if e.is_nothing_to_do() {
            tracing::info!(file = %path.display(), "{}", e);
        } else {
            tracing::warn!(file = %path.display(), error = %e, "upload rejected");
        }
    }
    result
}

/// Ingest already-decoded rows. `filename` is recorded as given.
pub fn ingest_rows(
    storage: &mut Storage,
    format: SourceFormat,
    rows: &RowSet,
    filename: &str,
) -> Result<UploadBatch> {
    let reconciled = SchemaReconciler::new().reconcile_transactions(rows)?;

    let filter = ReferenceFilter::new(
        MerchantRegistry::new(storage.setup()).name_set()?,
        CardSchemeRegistry::new(storage.setup()).name_set()?,
    );
    let (kept, filtered) = filter.apply(reconciled)?;
    if filtered.dropped() > 0 {
        tracing::info!(
            file = filename,
            dropped = filtered.dropped(),
            unknown_merchant = filtered.unknown_merchant,
            unknown_card_scheme = filtered.unknown_card_scheme,
            "rows outside the reference lists skipped"
        );
    }
    tracing::debug!(kept = filtered.kept, "reference filter applied");

    let transactions = TemporalNormalizer::new(format).normalize(&kept)?;
    store_batch(storage, &transactions, filename)
}

/// Assign the next UploadId and append, in one IMMEDIATE transaction
fn store_batch(storage: &mut Storage, transactions: &[Transaction], filename: &str) -> Result<UploadBatch> {
    let tx = storage
        .data_mut()
        .transaction_with_behavior(TransactionBehavior::Immediate)?;

    let upload_id = registry::next_upload_id(&tx)?;
    let uploaded_at = Local::now().naive_local();
    let mut batch = UploadBatch {
        upload_id,
        uploaded_at,
        filename: filename.to_string(),
        success: true,
        row_count: transactions.len(),
    };

    match db::append_batch(&tx, transactions, upload_id, uploaded_at) {
        Ok(_) => {
            registry::record_upload(&tx, &batch)?;
            tx.commit()?;
            tracing::info!(upload_id, rows = batch.row_count, file = filename, "upload stored");
            Ok(batch)
        }
        Err(e) => {
            batch.success = false;
            let recorded = registry::record_upload(&tx, &batch)
                .and_then(|_| tx.commit().map_err(PipelineError::from));
            if let Err(record_err) = recorded {
                tracing::error!(upload_id, error = %record_err, "could not record failed upload");
            }
            tracing::error!(upload_id, error = %e, "upload store write failed");
            Err(e)
        }
    }
}

// ============================================================================
// EXPORT & REPORT
// ============================================================================

pub fn run_export(storage: &mut Storage, export_dir: &Path, scope: Scope) -> Result<ExportBatch> {
    ExportEngine::new(export_dir).run(storage, scope)
}

/// Aggregate the live data. With a snapshot directory the flattened report
/// is also written there as `report.csv`.
pub fn build_report(storage: &Storage, snapshot_dir: Option<&Path>) -> Result<Report> {
    let rows = db::query_all(storage.data())?;
    let report = report::build_report(&rows)?;

    if let Some(dir) = snapshot_dir {
        fs::create_dir_all(dir)?;
        let path = dir.join(REPORT_FILENAME);
        report.write_csv(&path)?;
        tracing::debug!(path = %path.display(), months = report.months.len(), "report snapshot written");
    }
    Ok(report)
}

// ============================================================================
// HISTORY
// ============================================================================

pub fn batch_history(storage: &Storage) -> Result<BatchHistory> {
    Ok(BatchHistory {
        uploads: registry::list_uploads(storage.data())?,
        exports: registry::list_exports(storage.data())?,
    })
}

/// Remove an upload batch's live rows together with its history entry.
/// Returns the number of rows removed.
pub fn delete_upload_batch(storage: &mut Storage, upload_id: i64) -> Result<usize> {
    let tx = storage
        .data_mut()
        .transaction_with_behavior(TransactionBehavior::Immediate)?;

    let rows = db::purge(&tx, Scope::Upload(upload_id))?;
    let entries = registry::delete_upload_entry(&tx, upload_id)?;
    tx.commit()?;

    tracing::info!(upload_id, rows, entries, "upload batch deleted");
    Ok(rows)
}

/// Remove an export history entry and, best effort, its archive file.
/// Returns false if no such export exists.
pub fn delete_export_batch(storage: &Storage, export_dir: &Path, export_id: i64) -> Result<bool> {
    let batch = match registry::find_export(storage.data(), export_id)? {
        Some(batch) => batch,
        None => return Ok(false),
    };

    let archive = export_dir.join(&batch.filename);
    match fs::remove_file(&archive) {
        Ok(()) => tracing::info!(archive = %archive.display(), "archive removed"),
        Err(e) if e.kind() == io::ErrorKind::NotFound && !batch.success => {}
        Err(e) => tracing::warn!(archive = %archive.display(), error = %e, "could not remove archive"),
    }

    registry::delete_export_entry(storage.data(), export_id)?;
    tracing::info!(export_id, "export history entry deleted");
    Ok(true)
}
