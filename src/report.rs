// 📊 Report Aggregator
// Monthly per-merchant totals with one count column per card scheme
//
// Read-only over live data. The same figures are flattened into a CSV
// snapshot: Year-Month, Merchant Name, Total Count, Sale Amount, <schemes...>

use crate::db::LiveTransaction;
use crate::error::{PipelineError, Result};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Snapshot file name inside the export directory
pub const REPORT_FILENAME: &str = "report.csv";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub merchant_name: String,
    pub total_count: usize,
    /// Rounded to 2 decimal places
    pub sale_amount: Decimal,
    /// Count per card scheme; every scheme in the report has an entry
    pub scheme_counts: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyReport {
    pub year_month: String,
    pub rows: Vec<ReportRow>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Report {
    /// Distinct card schemes present in the data, sorted
    pub card_schemes: Vec<String>,
    /// Months in ascending order
    pub months: Vec<MonthlyReport>,
}

#[derive(Default)]
struct Totals {
    count: usize,
    amount: Decimal,
    schemes: BTreeMap<String, usize>,
}

/// Aggregate live rows per (Year-Month, merchant).
///
/// Fails with `AmountOverflow` when a merchant's monthly sale total does not
/// fit in a `Decimal`.
pub fn build_report(rows: &[LiveTransaction]) -> Result<Report> {
    let card_schemes: BTreeSet<&str> = rows
        .iter()
        .map(|r| r.transaction.card_scheme.as_str())
        .collect();

    let mut totals: BTreeMap<String, BTreeMap<String, Totals>> = BTreeMap::new();
    for row in rows {
        let tx = &row.transaction;
        let entry = totals
            .entry(tx.year_month())
            .or_default()
            .entry(tx.merchant_name.clone())
            .or_default();

        entry.count += 1;
        entry.amount = entry
            .amount
            .checked_add(tx.sale_amount)
            .ok_or_else(|| PipelineError::AmountOverflow {
                year_month: tx.year_month(),
                merchant: tx.merchant_name.clone(),
            })?;
        *entry.schemes.entry(tx.card_scheme.clone()).or_default() += 1;
    }

    let months = totals
        .into_iter()
        .map(|(year_month, merchants)| MonthlyReport {
            year_month,
            rows: merchants
                .into_iter()
                .map(|(merchant_name, t)| ReportRow {
                    merchant_name,
                    total_count: t.count,
                    sale_amount: t.amount.round_dp(2),
                    scheme_counts: card_schemes
                        .iter()
                        .map(|s| (s.to_string(), t.schemes.get(*s).copied().unwrap_or(0)))
                        .collect(),
                })
                .collect(),
        })
        .collect();

    Ok(Report {
        card_schemes: card_schemes.into_iter().map(String::from).collect(),
        months,
    })
}

impl Report {
    pub fn is_empty(&self) -> bool {
        self.months.is_empty()
    }

    pub fn header(&self) -> Vec<String> {
        let mut header: Vec<String> = ["Year-Month", "Merchant Name", "Total Count", "Sale Amount"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        header.extend(self.card_schemes.iter().cloned());
        header
    }

    /// One flattened record per (month, merchant)
    pub fn records(&self) -> Vec<Vec<String>> {
        let mut records = Vec::new();
        for month in &self.months {
            for row in &month.rows {
                let mut record = vec![
                    month.year_month.clone(),
                    row.merchant_name.clone(),
                    row.total_count.to_string(),
                    row.sale_amount.to_string(),
                ];
                record.extend(
                    self.card_schemes
                        .iter()
                        .map(|s| row.scheme_counts.get(s).copied().unwrap_or(0).to_string()),
                );
                records.push(record);
            }
        }
        records
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(self.header())?;
        for record in self.records() {
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sample_transaction;
    use chrono::NaiveDate;
    use std::str::FromStr;

    fn live(merchant: &str, scheme: &str, date: (i32, u32, u32), amount: &str) -> LiveTransaction {
        LiveTransaction {
            transaction: sample_transaction(merchant, scheme, date, amount),
            upload_time: NaiveDate::from_ymd_opt(2024, 4, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            upload_id: 0,
        }
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_empty_data_gives_empty_report() {
        let report = build_report(&[]).unwrap();
        assert!(report.is_empty());
        assert!(report.card_schemes.is_empty());
    }

    #[test]
    fn test_monthly_totals_per_merchant() {
        let rows = vec![
            live("Beta", "VISA", (2024, 2, 1), "1.005"),
            live("Acme", "VISA", (2024, 1, 5), "10.10"),
            live("Acme", "MC", (2024, 1, 6), "0.20"),
            live("Acme", "VISA", (2024, 2, 9), "3"),
        ];
        let report = build_report(&rows).unwrap();

        assert_eq!(report.card_schemes, vec!["MC", "VISA"]);
        assert_eq!(report.months.len(), 2);
        assert_eq!(report.months[0].year_month, "2024-01");

        let january = &report.months[0].rows;
        assert_eq!(january.len(), 1);
        assert_eq!(january[0].merchant_name, "Acme");
        assert_eq!(january[0].total_count, 2);
        assert_eq!(january[0].sale_amount, dec("10.30"));
        assert_eq!(january[0].scheme_counts["MC"], 1);
        assert_eq!(january[0].scheme_counts["VISA"], 1);

        let february = &report.months[1].rows;
        let names: Vec<&str> = february.iter().map(|r| r.merchant_name.as_str()).collect();
        assert_eq!(names, vec!["Acme", "Beta"]);
        assert_eq!(february[1].scheme_counts["MC"], 0, "absent schemes count as zero");
    }

    #[test]
    fn test_sale_amount_rounds_to_two_places() {
        let rows = vec![
            live("Acme", "VISA", (2024, 1, 5), "0.333"),
            live("Acme", "VISA", (2024, 1, 6), "0.333"),
        ];
        let report = build_report(&rows).unwrap();
        assert_eq!(report.months[0].rows[0].sale_amount, dec("0.67"));
    }

    #[test]
    fn test_sale_total_overflow_is_an_error() {
        let rows = vec![
            live("Acme", "VISA", (2024, 1, 5), "50000000000000000000000000000"),
            live("Acme", "VISA", (2024, 1, 6), "50000000000000000000000000000"),
        ];

        let err = build_report(&rows).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::AmountOverflow { ref year_month, ref merchant }
                if year_month == "2024-01" && merchant == "Acme"
        ));
    }

    #[test]
    fn test_snapshot_is_flattened_and_deterministic() {
        let rows = vec![
            live("Acme", "VISA", (2024, 1, 5), "10"),
            live("Beta", "MC", (2024, 1, 7), "2.5"),
        ];
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(REPORT_FILENAME);

        build_report(&rows).unwrap().write_csv(&path).unwrap();
        let first = std::fs::read_to_string(&path).unwrap();

        let mut reversed = rows.clone();
        reversed.reverse();
        build_report(&reversed).unwrap().write_csv(&path).unwrap();
        let second = std::fs::read_to_string(&path).unwrap();

        assert_eq!(first, second);
        let lines: Vec<&str> = first.lines().collect();
        assert_eq!(lines[0], "Year-Month,Merchant Name,Total Count,Sale Amount,MC,VISA");
        assert_eq!(lines[1], "2024-01,Acme,1,10,0,1");
        assert_eq!(lines[2], "2024-01,Beta,1,2.5,1,0");
    }
}
