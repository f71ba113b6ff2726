// 📐 Shape Layer - Schema Reconciliation
// Checks decoded rows against the canonical transaction schema and fills gaps

use crate::error::{PipelineError, Result};
use crate::parser::{CellValue, RowSet};

// ============================================================================
// CANONICAL SCHEMA
// ============================================================================

pub const MERCHANT_NAME: &str = "MerchantName";
pub const CARD_SCHEME: &str = "CardScheme";
pub const TRANSACTION_DATE: &str = "TransactionDate";
pub const SALE_AMOUNT: &str = "SaleAmount";

/// The 18 canonical transaction columns, in storage order
pub const CANONICAL_COLUMNS: [&str; 18] = [
    "MerchantName",
    "ClientName",
    "TransactionDate",
    "TransactionType",
    "DataEntryMethod",
    "CurrencyCode",
    "DccCurrencyCode",
    "SaleAmount",
    "DccAmount",
    "CardNumber",
    "AuthMessage",
    "TerminalId",
    "CardScheme",
    "TransactionMode",
    "ExpiryDate",
    "ResponseCode",
    "UploadTime",
    "UploadId",
];

/// Columns a source file is expected to supply. `UploadTime` and `UploadId`
/// are assigned at ingestion, so they never count as missing.
pub const SOURCE_COLUMNS: [&str; 16] = [
    "MerchantName",
    "ClientName",
    "TransactionDate",
    "TransactionType",
    "DataEntryMethod",
    "CurrencyCode",
    "DccCurrencyCode",
    "SaleAmount",
    "DccAmount",
    "CardNumber",
    "AuthMessage",
    "TerminalId",
    "CardScheme",
    "TransactionMode",
    "ExpiryDate",
    "ResponseCode",
];

/// Default number of missing (and, separately, unrecognized) columns tolerated
pub const DEFAULT_TOLERANCE: usize = 2;

// ============================================================================
// RECONCILED ROW
// ============================================================================

/// A source row with every canonical column present. Columns the file did
/// not carry hold `CellValue::Empty`.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRow {
    /// 1-based line in the source file (header is line 1)
    pub line: usize,
    pub merchant_name: CellValue,
    pub client_name: CellValue,
    pub transaction_date: CellValue,
    pub transaction_type: CellValue,
    pub data_entry_method: CellValue,
    pub currency_code: CellValue,
    pub dcc_currency_code: CellValue,
    pub sale_amount: CellValue,
    pub dcc_amount: CellValue,
    pub card_number: CellValue,
    pub auth_message: CellValue,
    pub terminal_id: CellValue,
    pub card_scheme: CellValue,
    pub transaction_mode: CellValue,
    pub expiry_date: CellValue,
    pub response_code: CellValue,
}

// ============================================================================
// SCHEMA RECONCILER
// ============================================================================

pub struct SchemaReconciler {
    /// How many source columns may be absent
    pub max_missing: usize,
    /// How many unrecognized columns may be present (they are dropped)
    pub max_extra: usize,
}

impl Default for SchemaReconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaReconciler {
    pub fn new() -> Self {
        SchemaReconciler {
            max_missing: DEFAULT_TOLERANCE,
            max_extra: DEFAULT_TOLERANCE,
        }
    }

    pub fn with_tolerance(max_missing: usize, max_extra: usize) -> Self {
        SchemaReconciler {
            max_missing,
            max_extra,
        }
    }

    /// Merchant-list path: only MerchantName is required. Returns the
    /// non-empty merchant names in file order (duplicates included).
    pub fn reconcile_merchant_list(&self, rows: &RowSet) -> Result<Vec<String>> {
        let idx = rows
            .column_index(MERCHANT_NAME)
            .ok_or_else(|| PipelineError::MissingColumn(MERCHANT_NAME.to_string()))?;

        Ok(rows
            .rows
            .iter()
            .filter_map(|row| row.get(idx).and_then(CellValue::as_text))
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect())
    }

    /// Transaction path: MerchantName and CardScheme are required, and the
    /// column set may differ from the source schema by at most the configured
    /// tolerance in either direction.
    pub fn reconcile_transactions(&self, rows: &RowSet) -> Result<Vec<SourceRow>> {
        for required in [MERCHANT_NAME, CARD_SCHEME] {
            if !rows.has_column(required) {
                return Err(PipelineError::MissingColumn(required.to_string()));
            }
        }

        let missing: Vec<String> = SOURCE_COLUMNS
            .iter()
            .filter(|c| !rows.has_column(c))
            .map(|c| c.to_string())
            .collect();

        let extra: Vec<String> = rows
            .columns
            .iter()
            .filter(|c| !CANONICAL_COLUMNS.contains(&c.as_str()))
            .cloned()
            .collect();

        if missing.len() > self.max_missing || extra.len() > self.max_extra {
            return Err(PipelineError::SchemaMismatch { missing, extra });
        }

        let lookup = ColumnLookup::new(rows);
        Ok(rows
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| lookup.source_row(row, i + 2))
            .collect())
    }
}

/// Column positions resolved once per file
struct ColumnLookup {
    positions: [Option<usize>; 16],
}

impl ColumnLookup {
    fn new(rows: &RowSet) -> Self {
        let mut positions = [None; 16];
        for (slot, column) in positions.iter_mut().zip(SOURCE_COLUMNS.iter()) {
            *slot = rows.column_index(column);
        }
        ColumnLookup { positions }
    }

    fn cell(&self, row: &[CellValue], field: usize) -> CellValue {
        self.positions[field]
            .and_then(|idx| row.get(idx))
            .cloned()
            .unwrap_or(CellValue::Empty)
    }

    fn source_row(&self, row: &[CellValue], line: usize) -> SourceRow {
        SourceRow {
            line,
            merchant_name: self.cell(row, 0),
            client_name: self.cell(row, 1),
            transaction_date: self.cell(row, 2),
            transaction_type: self.cell(row, 3),
            data_entry_method: self.cell(row, 4),
            currency_code: self.cell(row, 5),
            dcc_currency_code: self.cell(row, 6),
            sale_amount: self.cell(row, 7),
            dcc_amount: self.cell(row, 8),
            card_number: self.cell(row, 9),
            auth_message: self.cell(row, 10),
            terminal_id: self.cell(row, 11),
            card_scheme: self.cell(row, 12),
            transaction_mode: self.cell(row, 13),
            expiry_date: self.cell(row, 14),
            response_code: self.cell(row, 15),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rowset_with(columns: &[&str]) -> RowSet {
        RowSet {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: vec![columns
                .iter()
                .map(|c| CellValue::Text(format!("{}-value", c)))
                .collect()],
        }
    }

    fn source_columns_without(skip: &[&str]) -> Vec<&'static str> {
        SOURCE_COLUMNS
            .iter()
            .copied()
            .filter(|c| !skip.contains(c))
            .collect()
    }

    #[test]
    fn test_full_schema_is_accepted() {
        let rows = rowset_with(&SOURCE_COLUMNS);
        let reconciled = SchemaReconciler::new().reconcile_transactions(&rows).unwrap();

        assert_eq!(reconciled.len(), 1);
        assert_eq!(reconciled[0].line, 2);
        assert_eq!(
            reconciled[0].terminal_id,
            CellValue::Text("TerminalId-value".to_string())
        );
    }

    #[test]
    fn test_two_missing_columns_are_filled_with_null() {
        let columns = source_columns_without(&["DccCurrencyCode", "DccAmount"]);
        let rows = rowset_with(&columns);

        let reconciled = SchemaReconciler::new().reconcile_transactions(&rows).unwrap();

        assert_eq!(reconciled[0].dcc_currency_code, CellValue::Empty);
        assert_eq!(reconciled[0].dcc_amount, CellValue::Empty);
    }

    #[test]
    fn test_three_missing_columns_are_rejected() {
        let columns = source_columns_without(&["DccCurrencyCode", "DccAmount", "AuthMessage"]);
        let rows = rowset_with(&columns);

        match SchemaReconciler::new().reconcile_transactions(&rows) {
            Err(PipelineError::SchemaMismatch { missing, extra }) => {
                assert_eq!(missing.len(), 3);
                assert!(extra.is_empty());
            }
            other => panic!("expected SchemaMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_extra_columns_within_tolerance_are_dropped() {
        let mut columns = SOURCE_COLUMNS.to_vec();
        columns.push("Notes");
        columns.push("BatchRef");
        let rows = rowset_with(&columns);

        let reconciled = SchemaReconciler::new().reconcile_transactions(&rows).unwrap();
        assert_eq!(reconciled.len(), 1);
    }

    #[test]
    fn test_three_extra_columns_are_rejected() {
        let mut columns = SOURCE_COLUMNS.to_vec();
        columns.extend(["Notes", "BatchRef", "Operator"]);
        let rows = rowset_with(&columns);

        let result = SchemaReconciler::new().reconcile_transactions(&rows);
        assert!(matches!(result, Err(PipelineError::SchemaMismatch { .. })));
    }

    #[test]
    fn test_upload_columns_in_source_are_not_extras() {
        let mut columns = SOURCE_COLUMNS.to_vec();
        columns.extend(["UploadTime", "UploadId", "Notes"]);
        let rows = rowset_with(&columns);

        assert!(SchemaReconciler::new().reconcile_transactions(&rows).is_ok());
    }

    #[test]
    fn test_required_columns() {
        let rows = rowset_with(&source_columns_without(&["CardScheme"]));
        let result = SchemaReconciler::new().reconcile_transactions(&rows);
        assert!(matches!(result, Err(PipelineError::MissingColumn(ref c)) if c == "CardScheme"));

        let rows = rowset_with(&source_columns_without(&["MerchantName"]));
        let result = SchemaReconciler::new().reconcile_transactions(&rows);
        assert!(matches!(result, Err(PipelineError::MissingColumn(ref c)) if c == "MerchantName"));
    }

    #[test]
    fn test_merchant_list_only_needs_merchant_column() {
        let rows = RowSet {
            columns: vec!["MerchantName".to_string(), "Whatever".to_string()],
            rows: vec![
                vec![CellValue::Text(" Acme ".to_string()), CellValue::Empty],
                vec![CellValue::Empty, CellValue::Empty],
                vec![CellValue::Number(1001.0), CellValue::Empty],
            ],
        };

        let names = SchemaReconciler::new().reconcile_merchant_list(&rows).unwrap();
        assert_eq!(names, vec!["Acme", "1001"]);

        let no_merchant = rowset_with(&["Name"]);
        let result = SchemaReconciler::new().reconcile_merchant_list(&no_merchant);
        assert!(matches!(result, Err(PipelineError::MissingColumn(_))));
    }
}
