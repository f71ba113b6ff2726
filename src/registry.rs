// 🔢 Batch Registry
// Monotonic UploadId / ExportId assignment and the two history tables
//
// Ids are max(existing)+1, or 0 for an empty table. The idSequence table
// keeps a high-water mark per history, so an id freed by a purge is never
// handed out again.

use crate::db::{parse_stored_time, TIMESTAMP_FORMAT};
use crate::error::Result;
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, Row};
use serde::Serialize;

// ============================================================================
// BATCH RECORDS
// ============================================================================

/// One ingestion attempt, successful or not
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadBatch {
    pub upload_id: i64,
    pub uploaded_at: NaiveDateTime,
    pub filename: String,
    pub success: bool,
    pub row_count: usize,
}

/// One export run, successful or not
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportBatch {
    pub export_id: i64,
    pub exported_at: NaiveDateTime,
    pub success: bool,
    pub row_count: usize,
    pub filename: String,
}

#[derive(Debug, Clone, Copy)]
enum History {
    Upload,
    Export,
}

impl History {
    fn sequence_name(self) -> &'static str {
        match self {
            History::Upload => "upload",
            History::Export => "export",
        }
    }

    fn max_id_sql(self) -> &'static str {
        match self {
            History::Upload => "SELECT MAX(UploadId) FROM UploadHistory",
            History::Export => "SELECT MAX(exportId) FROM exportHistory",
        }
    }
}

// ============================================================================
// ID ASSIGNMENT
// ============================================================================

pub fn next_upload_id(conn: &Connection) -> Result<i64> {
    next_id(conn, History::Upload)
}

pub fn next_export_id(conn: &Connection) -> Result<i64> {
    next_id(conn, History::Export)
}

fn next_id(conn: &Connection, history: History) -> Result<i64> {
    let max: Option<i64> = conn.query_row(history.max_id_sql(), [], |row| row.get(0))?;
    let floor: i64 = match conn.query_row(
        "SELECT next_id FROM idSequence WHERE name = ?1",
        [history.sequence_name()],
        |row| row.get(0),
    ) {
        Ok(next) => next,
        Err(rusqlite::Error::QueryReturnedNoRows) => 0,
        Err(e) => return Err(e.into()),
    };

    let from_table = max.map(|id| id + 1).unwrap_or(0);
    Ok(from_table.max(floor))
}

fn advance_sequence(conn: &Connection, history: History, used_id: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO idSequence (name, next_id) VALUES (?1, ?2)
         ON CONFLICT(name) DO UPDATE SET next_id = MAX(next_id, excluded.next_id)",
        params![history.sequence_name(), used_id + 1],
    )?;
    Ok(())
}

// ============================================================================
// UPLOAD HISTORY
// ============================================================================

pub fn record_upload(conn: &Connection, batch: &UploadBatch) -> Result<()> {
    conn.execute(
        "INSERT INTO UploadHistory (uploadtime, filename, success, len, UploadId)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            batch.uploaded_at.format(TIMESTAMP_FORMAT).to_string(),
            batch.filename,
            batch.success,
            batch.row_count as i64,
            batch.upload_id,
        ],
    )?;
    advance_sequence(conn, History::Upload, batch.upload_id)?;

    tracing::info!(
        upload_id = batch.upload_id,
        success = batch.success,
        rows = batch.row_count,
        "upload recorded"
    );
    Ok(())
}

pub fn list_uploads(conn: &Connection) -> Result<Vec<UploadBatch>> {
    let mut stmt = conn.prepare(
        "SELECT uploadtime, filename, success, len, UploadId
         FROM UploadHistory ORDER BY UploadId",
    )?;
    let batches = stmt
        .query_map([], row_to_upload)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(batches)
}

pub fn find_upload(conn: &Connection, upload_id: i64) -> Result<Option<UploadBatch>> {
    let result = conn.query_row(
        "SELECT uploadtime, filename, success, len, UploadId
         FROM UploadHistory WHERE UploadId = ?1",
        [upload_id],
        row_to_upload,
    );
    match result {
        Ok(batch) => Ok(Some(batch)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn delete_upload_entry(conn: &Connection, upload_id: i64) -> Result<usize> {
    Ok(conn.execute("DELETE FROM UploadHistory WHERE UploadId = ?1", [upload_id])?)
}

pub fn delete_all_uploads(conn: &Connection) -> Result<usize> {
    Ok(conn.execute("DELETE FROM UploadHistory", [])?)
}

fn row_to_upload(row: &Row<'_>) -> rusqlite::Result<UploadBatch> {
    let len: i64 = row.get(3)?;
    Ok(UploadBatch {
        uploaded_at: parse_stored_time(row, 0)?,
        filename: row.get(1)?,
        success: row.get(2)?,
        row_count: len.max(0) as usize,
        upload_id: row.get(4)?,
    })
}

// ============================================================================
// EXPORT HISTORY
// ============================================================================

pub fn record_export(conn: &Connection, batch: &ExportBatch) -> Result<()> {
    conn.execute(
        "INSERT INTO exportHistory (exportDate, success, len, filename, exportId)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            batch.exported_at.format(TIMESTAMP_FORMAT).to_string(),
            batch.success,
            batch.row_count as i64,
            batch.filename,
            batch.export_id,
        ],
    )?;
    advance_sequence(conn, History::Export, batch.export_id)?;

    tracing::info!(
        export_id = batch.export_id,
        success = batch.success,
        rows = batch.row_count,
        archive = %batch.filename,
        "export recorded"
    );
    Ok(())
}

pub fn list_exports(conn: &Connection) -> Result<Vec<ExportBatch>> {
    let mut stmt = conn.prepare(
        "SELECT exportDate, success, len, filename, exportId
         FROM exportHistory ORDER BY exportId",
    )?;
    let batches = stmt
        .query_map([], row_to_export)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(batches)
}

pub fn find_export(conn: &Connection, export_id: i64) -> Result<Option<ExportBatch>> {
    let result = conn.query_row(
        "SELECT exportDate, success, len, filename, exportId
         FROM exportHistory WHERE exportId = ?1",
        [export_id],
        row_to_export,
    );
    match result {
        Ok(batch) => Ok(Some(batch)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn delete_export_entry(conn: &Connection, export_id: i64) -> Result<usize> {
    Ok(conn.execute("DELETE FROM exportHistory WHERE exportId = ?1", [export_id])?)
}

fn row_to_export(row: &Row<'_>) -> rusqlite::Result<ExportBatch> {
    let len: i64 = row.get(2)?;
    Ok(ExportBatch {
        exported_at: parse_stored_time(row, 0)?,
        success: row.get(1)?,
        row_count: len.max(0) as usize,
        filename: row.get(3)?,
        export_id: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Storage;
    use chrono::NaiveDate;

    fn at(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, day)
            .unwrap()
            .and_hms_micro_opt(14, 0, 0, 500)
            .unwrap()
    }

    fn upload(id: i64, success: bool) -> UploadBatch {
        UploadBatch {
            upload_id: id,
            uploaded_at: at(1),
            filename: format!("batch_{}.csv", id),
            success,
            row_count: 3,
        }
    }

    fn export(id: i64) -> ExportBatch {
        ExportBatch {
            export_id: id,
            exported_at: at(2),
            success: true,
            row_count: 10,
            filename: format!("export_{}.zip", id),
        }
    }

    #[test]
    fn test_ids_start_at_zero_and_increase() {
        let storage = Storage::open_in_memory().unwrap();
        let conn = storage.data();

        assert_eq!(next_upload_id(conn).unwrap(), 0);
        assert_eq!(next_export_id(conn).unwrap(), 0);

        record_upload(conn, &upload(0, true)).unwrap();
        record_upload(conn, &upload(1, false)).unwrap();
        assert_eq!(next_upload_id(conn).unwrap(), 2);

        // the two sequences are independent
        assert_eq!(next_export_id(conn).unwrap(), 0);
    }

    #[test]
    fn test_ids_are_not_reused_after_purge() {
        let storage = Storage::open_in_memory().unwrap();
        let conn = storage.data();

        record_upload(conn, &upload(0, true)).unwrap();
        record_upload(conn, &upload(1, true)).unwrap();
        delete_all_uploads(conn).unwrap();
        assert_eq!(next_upload_id(conn).unwrap(), 2, "purged ids must not come back");

        record_export(conn, &export(0)).unwrap();
        delete_export_entry(conn, 0).unwrap();
        assert_eq!(next_export_id(conn).unwrap(), 1);
    }

    #[test]
    fn test_upload_history_round_trip() {
        let storage = Storage::open_in_memory().unwrap();
        let conn = storage.data();

        record_upload(conn, &upload(0, true)).unwrap();
        record_upload(conn, &upload(1, false)).unwrap();

        let history = list_uploads(conn).unwrap();
        assert_eq!(history, vec![upload(0, true), upload(1, false)]);
        assert_eq!(find_upload(conn, 1).unwrap(), Some(upload(1, false)));

        assert_eq!(delete_upload_entry(conn, 0).unwrap(), 1);
        assert_eq!(list_uploads(conn).unwrap().len(), 1);
        assert_eq!(find_upload(conn, 0).unwrap(), None);
    }

    #[test]
    fn test_export_history_round_trip() {
        let storage = Storage::open_in_memory().unwrap();
        let conn = storage.data();

        record_export(conn, &export(0)).unwrap();
        let mut failed = export(1);
        failed.success = false;
        record_export(conn, &failed).unwrap();

        assert_eq!(list_exports(conn).unwrap(), vec![export(0), failed]);
        assert_eq!(find_export(conn, 0).unwrap(), Some(export(0)));
        assert_eq!(find_export(conn, 9).unwrap(), None);
    }

    #[test]
    fn test_duplicate_id_is_rejected() {
        let storage = Storage::open_in_memory().unwrap();
        let conn = storage.data();

        record_upload(conn, &upload(0, true)).unwrap();
        assert!(record_upload(conn, &upload(0, true)).is_err());
    }
}
