use crate::error::{PipelineError, Result};
use chrono::NaiveDateTime;
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Storage format for transaction dates. Whole seconds print without a
/// fraction; sub-second spreadsheet dates keep theirs.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Storage format for ingestion / export timestamps
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Accepts both of the above when reading back
const READ_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Canonical transaction row, as produced by ingestion.
/// Field names serialize as the canonical column names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(rename = "MerchantName")]
    pub merchant_name: String,

    #[serde(rename = "ClientName")]
    pub client_name: Option<String>,

    #[serde(rename = "TransactionDate")]
    pub transaction_date: NaiveDateTime,

    #[serde(rename = "TransactionType")]
    pub transaction_type: Option<String>,

    #[serde(rename = "DataEntryMethod")]
    pub data_entry_method: Option<String>,

    #[serde(rename = "CurrencyCode")]
    pub currency_code: Option<String>,

    #[serde(rename = "DccCurrencyCode")]
    pub dcc_currency_code: Option<String>,

    #[serde(rename = "SaleAmount")]
    pub sale_amount: Decimal,

    #[serde(rename = "DccAmount")]
    pub dcc_amount: Option<Decimal>,

    #[serde(rename = "CardNumber")]
    pub card_number: Option<String>,

    #[serde(rename = "AuthMessage")]
    pub auth_message: Option<String>,

    #[serde(rename = "TerminalId")]
    pub terminal_id: Option<String>,

    #[serde(rename = "CardScheme")]
    pub card_scheme: String,

    #[serde(rename = "TransactionMode")]
    pub transaction_mode: Option<String>,

    #[serde(rename = "ExpiryDate")]
    pub expiry_date: Option<String>,

    #[serde(rename = "ResponseCode")]
    pub response_code: Option<String>,
}

impl Transaction {
    /// Values in source-column order (see `schema::SOURCE_COLUMNS`), nulls as
    /// empty strings. This is the shape of an exported row.
    pub fn to_record(&self) -> Vec<String> {
        let opt = |v: &Option<String>| v.clone().unwrap_or_default();

        vec![
            self.merchant_name.clone(),
            opt(&self.client_name),
            self.transaction_date.format(DATE_FORMAT).to_string(),
            opt(&self.transaction_type),
            opt(&self.data_entry_method),
            opt(&self.currency_code),
            opt(&self.dcc_currency_code),
            self.sale_amount.to_string(),
            self.dcc_amount.map(|d| d.to_string()).unwrap_or_default(),
            opt(&self.card_number),
            opt(&self.auth_message),
            opt(&self.terminal_id),
            self.card_scheme.clone(),
            opt(&self.transaction_mode),
            opt(&self.expiry_date),
            opt(&self.response_code),
        ]
    }

    /// Year-Month of the transaction date, e.g. "2024-03"
    pub fn year_month(&self) -> String {
        self.transaction_date.format("%Y-%m").to_string()
    }
}

/// A stored transaction: the canonical row plus the tags set at ingestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveTransaction {
    #[serde(flatten)]
    pub transaction: Transaction,

    #[serde(rename = "UploadTime")]
    pub upload_time: NaiveDateTime,

    #[serde(rename = "UploadId")]
    pub upload_id: i64,
}

/// Which live rows an operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope {
    All,
    Upload(i64),
}

// ============================================================================
// STORAGE HANDLE
// ============================================================================

/// Explicit handle over the two storage groups: reference lists (`setup`)
/// and transactional data (`data`). Open one per command; nothing is global.
pub struct Storage {
    setup: Connection,
    data: Connection,
}

impl Storage {
    pub fn open(setup_path: &Path, data_path: &Path) -> Result<Self> {
        let setup = Connection::open(setup_path)?;
        let data = Connection::open(data_path)?;

        // Enable WAL mode for crash recovery
        setup.pragma_update(None, "journal_mode", "WAL")?;
        data.pragma_update(None, "journal_mode", "WAL")?;

        Self::from_connections(setup, data)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connections(Connection::open_in_memory()?, Connection::open_in_memory()?)
    }

    fn from_connections(setup: Connection, data: Connection) -> Result<Self> {
        setup_reference_database(&setup)?;
        setup_transaction_database(&data)?;
        Ok(Storage { setup, data })
    }

    /// Reference lists (Merchants, CardSchemes)
    pub fn setup(&self) -> &Connection {
        &self.setup
    }

    /// Transactions and batch history
    pub fn data(&self) -> &Connection {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Connection {
        &mut self.data
    }
}

pub fn setup_reference_database(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS Merchants (name TEXT NOT NULL UNIQUE);
         CREATE TABLE IF NOT EXISTS CardSchemes (name TEXT NOT NULL UNIQUE);",
    )?;
    Ok(())
}

pub fn setup_transaction_database(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS data (
            MerchantName TEXT NOT NULL,
            ClientName TEXT,
            TransactionDate TEXT NOT NULL,
            TransactionType TEXT,
            DataEntryMethod TEXT,
            CurrencyCode TEXT,
            DccCurrencyCode TEXT,
            SaleAmount TEXT NOT NULL,
            DccAmount TEXT,
            CardNumber TEXT,
            AuthMessage TEXT,
            TerminalId TEXT,
            CardScheme TEXT NOT NULL,
            TransactionMode TEXT,
            ExpiryDate TEXT,
            ResponseCode TEXT,
            UploadTime TEXT NOT NULL,
            UploadId INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_data_upload_id ON data(UploadId);

        CREATE TABLE IF NOT EXISTS UploadHistory (
            uploadtime TEXT NOT NULL,
            filename TEXT NOT NULL,
            success INTEGER NOT NULL,
            len INTEGER NOT NULL,
            UploadId INTEGER NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS exportHistory (
            exportDate TEXT NOT NULL,
            success INTEGER NOT NULL,
            len INTEGER NOT NULL,
            filename TEXT NOT NULL,
            exportId INTEGER NOT NULL UNIQUE
        );

        -- high-water marks so ids are never reused after a purge
        CREATE TABLE IF NOT EXISTS idSequence (
            name TEXT PRIMARY KEY,
            next_id INTEGER NOT NULL
        );",
    )?;
    Ok(())
}

// ============================================================================
// TRANSACTION STORE
// ============================================================================

const SELECT_COLUMNS: &str = "SELECT MerchantName, ClientName, TransactionDate, TransactionType,
        DataEntryMethod, CurrencyCode, DccCurrencyCode, SaleAmount, DccAmount,
        CardNumber, AuthMessage, TerminalId, CardScheme, TransactionMode,
        ExpiryDate, ResponseCode, UploadTime, UploadId
     FROM data";

/// Insert a batch tagged with `upload_id`. All rows are committed or none:
/// the inserts run inside a savepoint that is rolled back on the first
/// failure, so this is safe both standalone and inside an outer transaction.
pub fn append_batch(
    conn: &Connection,
    transactions: &[Transaction],
    upload_id: i64,
    upload_time: NaiveDateTime,
) -> Result<usize> {
    let store_err = |source| PipelineError::StoreWrite {
        upload_id,
        attempted: transactions.len(),
        source,
    };

    conn.execute_batch("SAVEPOINT append_batch").map_err(store_err)?;

    let result = insert_rows(conn, transactions, upload_id, upload_time)
        .and_then(|n| conn.execute_batch("RELEASE SAVEPOINT append_batch").map(|_| n));

    match result {
        Ok(inserted) => {
            tracing::debug!(upload_id, inserted, "batch appended");
            Ok(inserted)
        }
        Err(source) => {
            if let Err(e) = conn
                .execute_batch("ROLLBACK TO SAVEPOINT append_batch; RELEASE SAVEPOINT append_batch")
            {
                tracing::error!(upload_id, error = %e, "failed to roll back partial batch");
            }
            Err(store_err(source))
        }
    }
}

fn insert_rows(
    conn: &Connection,
    transactions: &[Transaction],
    upload_id: i64,
    upload_time: NaiveDateTime,
) -> rusqlite::Result<usize> {
    let upload_time = upload_time.format(TIMESTAMP_FORMAT).to_string();
    let mut stmt = conn.prepare_cached(
        "INSERT INTO data (
            MerchantName, ClientName, TransactionDate, TransactionType, DataEntryMethod,
            CurrencyCode, DccCurrencyCode, SaleAmount, DccAmount, CardNumber,
            AuthMessage, TerminalId, CardScheme, TransactionMode, ExpiryDate,
            ResponseCode, UploadTime, UploadId
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
    )?;

    for tx in transactions {
        stmt.execute(params![
            tx.merchant_name,
            tx.client_name,
            tx.transaction_date.format(DATE_FORMAT).to_string(),
            tx.transaction_type,
            tx.data_entry_method,
            tx.currency_code,
            tx.dcc_currency_code,
            tx.sale_amount.to_string(),
            tx.dcc_amount.map(|d| d.to_string()),
            tx.card_number,
            tx.auth_message,
            tx.terminal_id,
            tx.card_scheme,
            tx.transaction_mode,
            tx.expiry_date,
            tx.response_code,
            upload_time,
            upload_id,
        ])?;
    }

    Ok(transactions.len())
}

/// Delete live rows. Returns the number of rows removed.
pub fn purge(conn: &Connection, scope: Scope) -> Result<usize> {
    let removed = match scope {
        Scope::All => conn.execute("DELETE FROM data", [])?,
        Scope::Upload(id) => conn.execute("DELETE FROM data WHERE UploadId = ?1", [id])?,
    };
    Ok(removed)
}

/// Every live row, in insertion order
pub fn query_all(conn: &Connection) -> Result<Vec<LiveTransaction>> {
    query_scope(conn, Scope::All)
}

pub fn query_scope(conn: &Connection, scope: Scope) -> Result<Vec<LiveTransaction>> {
    let rows = match scope {
        Scope::All => {
            let mut stmt = conn.prepare(&format!("{} ORDER BY rowid", SELECT_COLUMNS))?;
            let rows = stmt
                .query_map([], row_to_live)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        }
        Scope::Upload(id) => {
            let mut stmt =
                conn.prepare(&format!("{} WHERE UploadId = ?1 ORDER BY rowid", SELECT_COLUMNS))?;
            let rows = stmt
                .query_map([id], row_to_live)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        }
    };
    Ok(rows)
}

pub fn count_live(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM data", [], |row| row.get(0))?;
    Ok(count)
}

fn row_to_live(row: &Row<'_>) -> rusqlite::Result<LiveTransaction> {
    let dcc_amount: Option<String> = row.get(8)?;

    Ok(LiveTransaction {
        transaction: Transaction {
            merchant_name: row.get(0)?,
            client_name: row.get(1)?,
            transaction_date: parse_stored_time(row, 2)?,
            transaction_type: row.get(3)?,
            data_entry_method: row.get(4)?,
            currency_code: row.get(5)?,
            dcc_currency_code: row.get(6)?,
            sale_amount: parse_stored_decimal(7, row.get(7)?)?,
            dcc_amount: match dcc_amount {
                Some(text) => Some(parse_stored_decimal(8, text)?),
                None => None,
            },
            card_number: row.get(9)?,
            auth_message: row.get(10)?,
            terminal_id: row.get(11)?,
            card_scheme: row.get(12)?,
            transaction_mode: row.get(13)?,
            expiry_date: row.get(14)?,
            response_code: row.get(15)?,
        },
        upload_time: parse_stored_time(row, 16)?,
        upload_id: row.get(17)?,
    })
}

pub(crate) fn parse_stored_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    let text: String = row.get(idx)?;
    NaiveDateTime::parse_from_str(&text, READ_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_stored_decimal(idx: usize, text: String) -> rusqlite::Result<Decimal> {
    Decimal::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Test helper: a transaction with every required field set
#[cfg(test)]
pub(crate) fn sample_transaction(
    merchant: &str,
    scheme: &str,
    date: (i32, u32, u32),
    amount: &str,
) -> Transaction {
    Transaction {
        merchant_name: merchant.to_string(),
        client_name: Some("Client".to_string()),
        transaction_date: chrono::NaiveDate::from_ymd_opt(date.0, date.1, date.2)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap(),
        transaction_type: Some("SALE".to_string()),
        data_entry_method: None,
        currency_code: Some("EUR".to_string()),
        dcc_currency_code: None,
        sale_amount: Decimal::from_str(amount).unwrap(),
        dcc_amount: None,
        card_number: Some("4111********1111".to_string()),
        auth_message: None,
        terminal_id: Some("T-01".to_string()),
        card_scheme: scheme.to_string(),
        transaction_mode: None,
        expiry_date: None,
        response_code: Some("00".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn upload_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 4, 1)
            .unwrap()
            .and_hms_micro_opt(9, 0, 0, 123_456)
            .unwrap()
    }

    #[test]
    fn test_append_and_query_round_trip() {
        let storage = Storage::open_in_memory().unwrap();
        let mut tx = sample_transaction("Acme", "VISA", (2024, 3, 5), "1234.56");
        tx.dcc_amount = Some(Decimal::from_str("99.10").unwrap());

        let inserted = append_batch(storage.data(), &[tx.clone()], 0, upload_time()).unwrap();
        assert_eq!(inserted, 1);

        let live = query_all(storage.data()).unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].transaction, tx);
        assert_eq!(live[0].upload_id, 0);
        assert_eq!(live[0].upload_time, upload_time());
    }

    #[test]
    fn test_sub_second_dates_survive_storage() {
        let storage = Storage::open_in_memory().unwrap();
        let mut tx = sample_transaction("Acme", "VISA", (2024, 3, 5), "1");
        tx.transaction_date = NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_milli_opt(10, 15, 30, 250)
            .unwrap();

        append_batch(storage.data(), &[tx.clone()], 0, upload_time()).unwrap();

        let live = query_all(storage.data()).unwrap();
        assert_eq!(live[0].transaction.transaction_date, tx.transaction_date);
        assert_eq!(live[0].transaction.to_record()[2], "2024-03-05 10:15:30.250");
    }

    #[test]
    fn test_append_is_all_or_nothing() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .data()
            .execute_batch(
                "CREATE TRIGGER reject_boom BEFORE INSERT ON data
                 WHEN NEW.ClientName = 'boom'
                 BEGIN SELECT RAISE(ABORT, 'boom'); END;",
            )
            .unwrap();

        let good = sample_transaction("Acme", "VISA", (2024, 3, 5), "10");
        let mut bad = good.clone();
        bad.client_name = Some("boom".to_string());

        let result = append_batch(storage.data(), &[good.clone(), good, bad], 4, upload_time());

        match result {
            Err(PipelineError::StoreWrite { upload_id, attempted, .. }) => {
                assert_eq!(upload_id, 4);
                assert_eq!(attempted, 3);
            }
            other => panic!("expected StoreWrite, got {:?}", other),
        }
        assert_eq!(count_live(storage.data()).unwrap(), 0, "no partial rows may remain");
    }

    #[test]
    fn test_purge_by_scope() {
        let storage = Storage::open_in_memory().unwrap();
        let tx = sample_transaction("Acme", "VISA", (2024, 3, 5), "10");

        append_batch(storage.data(), &[tx.clone(), tx.clone()], 0, upload_time()).unwrap();
        append_batch(storage.data(), &[tx], 1, upload_time()).unwrap();

        assert_eq!(query_scope(storage.data(), Scope::Upload(0)).unwrap().len(), 2);
        assert_eq!(purge(storage.data(), Scope::Upload(0)).unwrap(), 2);
        assert_eq!(count_live(storage.data()).unwrap(), 1);

        assert_eq!(purge(storage.data(), Scope::All).unwrap(), 1);
        assert_eq!(count_live(storage.data()).unwrap(), 0);
    }

    #[test]
    fn test_export_record_shape() {
        let tx = sample_transaction("Acme", "VISA", (2024, 3, 5), "1234.56");
        let record = tx.to_record();

        assert_eq!(record.len(), crate::schema::SOURCE_COLUMNS.len());
        assert_eq!(record[0], "Acme");
        assert_eq!(record[2], "2024-03-05 12:30:00");
        assert_eq!(record[7], "1234.56");
        assert_eq!(record[8], "");
        assert_eq!(tx.year_month(), "2024-03");
    }
}
