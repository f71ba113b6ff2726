// ⏰ Temporal & Amount Normalization
// Source-specific date encodings and decimal-comma amounts → canonical types
//
// Each source format has a primary and a fallback date pattern:
//   csv  : DD/MM/YYYY HH:MM:SS   then DD/MM/YYYY HH:MM
//   ods  : YYYY/MM/DDTHH:MM:SS   then YYYY/MM/DDTHH:MM
//   xlsx : YYYY/MM/DD HH:MM:SS   then YYYY/MM/DD HH:MM
//
// A value matching neither pattern rejects the whole batch.

use crate::db::Transaction;
use crate::error::{PipelineError, Result};
use crate::parser::{CellValue, SourceFormat};
use crate::schema::SourceRow;
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use std::str::FromStr;

// ============================================================================
// DATE PATTERNS
// ============================================================================

/// (primary, fallback) chrono patterns for a source format
pub fn date_patterns(format: SourceFormat) -> (&'static str, &'static str) {
    match format {
        SourceFormat::Csv => ("%d/%m/%Y %H:%M:%S", "%d/%m/%Y %H:%M"),
        SourceFormat::Ods => ("%Y/%m/%dT%H:%M:%S", "%Y/%m/%dT%H:%M"),
        SourceFormat::Xlsx => ("%Y/%m/%d %H:%M:%S", "%Y/%m/%d %H:%M"),
    }
}

// ============================================================================
// NORMALIZER
// ============================================================================

pub struct TemporalNormalizer {
    format: SourceFormat,
}

impl TemporalNormalizer {
    pub fn new(format: SourceFormat) -> Self {
        TemporalNormalizer { format }
    }

    /// Parse a TransactionDate cell.
    ///
    /// Cells the spreadsheet already typed as dates are taken as they are;
    /// text goes through the primary pattern, then the fallback.
    pub fn parse_transaction_date(&self, value: &CellValue, line: usize) -> Result<NaiveDateTime> {
        let text = match value {
            CellValue::DateTime(dt) => return Ok(*dt),
            CellValue::Text(s) => s.trim(),
            other => {
                return Err(PipelineError::DateParse {
                    line,
                    value: other.as_text().unwrap_or_default(),
                })
            }
        };

        let (primary, fallback) = date_patterns(self.format);
        NaiveDateTime::parse_from_str(text, primary)
            .or_else(|_| NaiveDateTime::parse_from_str(text, fallback))
            .map_err(|_| PipelineError::DateParse {
                line,
                value: text.to_string(),
            })
    }

    /// Build the canonical transaction for one reconciled row
    pub fn normalize_row(&self, row: &SourceRow) -> Result<Transaction> {
        let transaction_date = self.parse_transaction_date(&row.transaction_date, row.line)?;
        let sale_amount = parse_amount(&row.sale_amount, row.line)?;
        let dcc_amount = if row.dcc_amount.is_empty() {
            None
        } else {
            Some(parse_amount(&row.dcc_amount, row.line)?)
        };

        Ok(Transaction {
            merchant_name: row.merchant_name.as_text().unwrap_or_default(),
            client_name: row.client_name.as_text(),
            transaction_date,
            transaction_type: row.transaction_type.as_text(),
            data_entry_method: row.data_entry_method.as_text(),
            currency_code: row.currency_code.as_text(),
            dcc_currency_code: row.dcc_currency_code.as_text(),
            sale_amount,
            dcc_amount,
            card_number: row.card_number.as_text(),
            auth_message: row.auth_message.as_text(),
            terminal_id: row.terminal_id.as_text(),
            card_scheme: row.card_scheme.as_text().unwrap_or_default(),
            transaction_mode: row.transaction_mode.as_text(),
            expiry_date: row.expiry_date.as_text(),
            response_code: row.response_code.as_text(),
        })
    }

    /// Normalize a whole batch; the first bad row rejects all of them
    pub fn normalize(&self, rows: &[SourceRow]) -> Result<Vec<Transaction>> {
        rows.iter().map(|row| self.normalize_row(row)).collect()
    }
}

// ============================================================================
// AMOUNTS
// ============================================================================

/// Parse an amount cell. Text may use a decimal comma ("1234,56").
pub fn parse_amount(value: &CellValue, line: usize) -> Result<Decimal> {
    let text = match value {
        // Display for f64 is the shortest representation that round-trips
        CellValue::Number(n) if n.is_finite() => n.to_string(),
        CellValue::Text(s) => s.trim().replace(',', "."),
        other => {
            return Err(PipelineError::AmountParse {
                line,
                value: other.as_text().unwrap_or_default(),
            })
        }
    };

    Decimal::from_str(&text).map_err(|_| PipelineError::AmountParse { line, value: text })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, s)
            .unwrap()
    }

    #[test]
    fn test_csv_primary_pattern() {
        let n = TemporalNormalizer::new(SourceFormat::Csv);
        let dt = n.parse_transaction_date(&text("05/03/2024 10:00:00"), 2).unwrap();
        assert_eq!(dt, at(2024, 3, 5, 10, 0, 0));
    }

    #[test]
    fn test_csv_fallback_without_seconds() {
        let n = TemporalNormalizer::new(SourceFormat::Csv);
        let dt = n.parse_transaction_date(&text("05/03/2024 10:00"), 2).unwrap();
        assert_eq!(dt, at(2024, 3, 5, 10, 0, 0));
    }

    #[test]
    fn test_csv_rejects_iso_date() {
        let n = TemporalNormalizer::new(SourceFormat::Csv);
        let err = n.parse_transaction_date(&text("2024-03-05"), 7).unwrap_err();

        match err {
            PipelineError::DateParse { line, value } => {
                assert_eq!(line, 7);
                assert_eq!(value, "2024-03-05");
            }
            other => panic!("expected DateParse, got {:?}", other),
        }
    }

    #[test]
    fn test_ods_and_xlsx_patterns() {
        let ods = TemporalNormalizer::new(SourceFormat::Ods);
        assert_eq!(
            ods.parse_transaction_date(&text("2024/03/05T10:15:30"), 2).unwrap(),
            at(2024, 3, 5, 10, 15, 30)
        );
        assert_eq!(
            ods.parse_transaction_date(&text("2024/03/05T10:15"), 2).unwrap(),
            at(2024, 3, 5, 10, 15, 0)
        );

        let xlsx = TemporalNormalizer::new(SourceFormat::Xlsx);
        assert_eq!(
            xlsx.parse_transaction_date(&text("2024/03/05 23:59:59"), 2).unwrap(),
            at(2024, 3, 5, 23, 59, 59)
        );
        assert!(xlsx.parse_transaction_date(&text("05/03/2024 10:00"), 2).is_err());
    }

    #[test]
    fn test_typed_spreadsheet_dates_pass_through() {
        let xlsx = TemporalNormalizer::new(SourceFormat::Xlsx);
        let dt = at(2024, 1, 31, 8, 30, 0);
        assert_eq!(xlsx.parse_transaction_date(&CellValue::DateTime(dt), 2).unwrap(), dt);
    }

    #[test]
    fn test_empty_date_is_rejected() {
        let n = TemporalNormalizer::new(SourceFormat::Csv);
        assert!(matches!(
            n.parse_transaction_date(&CellValue::Empty, 3),
            Err(PipelineError::DateParse { line: 3, .. })
        ));
    }

    #[test]
    fn test_amount_decimal_comma() {
        let amount = parse_amount(&text("1234,56"), 2).unwrap();
        assert_eq!(amount, Decimal::from_str("1234.56").unwrap());
    }

    #[test]
    fn test_amount_numeric_cell() {
        assert_eq!(
            parse_amount(&CellValue::Number(12.5), 2).unwrap(),
            Decimal::from_str("12.5").unwrap()
        );
        assert_eq!(
            parse_amount(&CellValue::Number(1234.56), 2).unwrap(),
            Decimal::from_str("1234.56").unwrap()
        );
    }

    #[test]
    fn test_amount_rejects_text() {
        let err = parse_amount(&text("twelve"), 4).unwrap_err();
        assert!(matches!(err, PipelineError::AmountParse { line: 4, .. }));

        // thousands separator plus decimal comma becomes two points
        assert!(parse_amount(&text("1.234,56"), 4).is_err());
        assert!(parse_amount(&CellValue::Empty, 4).is_err());
    }
}
