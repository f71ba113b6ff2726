// 🏗️ Format Decoders
// Turns an uploaded xlsx / ods / csv file into untyped rows keyed by column name

use crate::error::{PipelineError, Result};
use calamine::{Data, Ods, Reader, Xlsx};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read, Seek};
use std::path::Path;

// ============================================================================
// CORE TYPES
// ============================================================================

/// SourceFormat - the three accepted upload encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceFormat {
    Xlsx,
    Ods,
    Csv,
}

impl SourceFormat {
    pub const ALLOWED_EXTENSIONS: [&'static str; 3] = ["xlsx", "ods", "csv"];

    /// Map a file extension (case-insensitive) to a format
    pub fn from_extension(ext: &str) -> Result<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "xlsx" => Ok(SourceFormat::Xlsx),
            "ods" => Ok(SourceFormat::Ods),
            "csv" => Ok(SourceFormat::Csv),
            other => Err(PipelineError::UnsupportedFormat(other.to_string())),
        }
    }

    /// Short code, also the file extension
    pub fn code(&self) -> &'static str {
        match self {
            SourceFormat::Xlsx => "xlsx",
            SourceFormat::Ods => "ods",
            SourceFormat::Csv => "csv",
        }
    }
}

/// One decoded cell. No canonicalization happens at this stage: text stays
/// text, and only cells the spreadsheet itself typed as dates become
/// `DateTime`.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Text(String),
    Number(f64),
    DateTime(NaiveDateTime),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    /// Render the cell as text, `None` for empty cells.
    ///
    /// Whole numbers print without a fractional part so that a merchant id
    /// typed into a spreadsheet as `1001` compares equal to the text "1001".
    pub fn as_text(&self) -> Option<String> {
        match self {
            CellValue::Empty => None,
            CellValue::Text(s) => Some(s.clone()),
            CellValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    Some(format!("{}", *n as i64))
                } else {
                    Some(format!("{}", n))
                }
            }
            CellValue::DateTime(dt) => Some(dt.format("%Y-%m-%d %H:%M:%S").to_string()),
        }
    }
}

/// RowSet - output of a decoder: a header plus rows in file order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl RowSet {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Cell at (row, column name); `None` when the column does not exist
    pub fn get(&self, row: usize, column: &str) -> Option<&CellValue> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// ============================================================================
// DECODER TRAIT
// ============================================================================

/// FormatDecoder - one implementation per accepted encoding
pub trait FormatDecoder: Send + Sync {
    /// Decode the raw file contents into a row set
    fn decode(&self, bytes: &[u8]) -> Result<RowSet>;

    /// The format this decoder handles
    fn format(&self) -> SourceFormat;
}

// ============================================================================
// FACTORY FUNCTIONS
// ============================================================================

/// Detect the format from the file extension
pub fn detect_format(file_path: &Path) -> Result<SourceFormat> {
    let ext = file_path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");

    SourceFormat::from_extension(ext)
}

/// Get the decoder for a format
pub fn get_decoder(format: SourceFormat) -> Box<dyn FormatDecoder> {
    match format {
        SourceFormat::Xlsx => Box::new(XlsxDecoder),
        SourceFormat::Ods => Box::new(OdsDecoder),
        SourceFormat::Csv => Box::new(CsvDecoder),
    }
}

/// Read and decode a file, picking the decoder from its extension
pub fn decode_file(file_path: &Path) -> Result<(SourceFormat, RowSet)> {
    let format = detect_format(file_path)?;
    let bytes = std::fs::read(file_path).map_err(|e| {
        PipelineError::decode(format.code(), format!("{}: {}", file_path.display(), e))
    })?;
    let rows = get_decoder(format).decode(&bytes)?;
    Ok((format, rows))
}

/// Name recorded in the upload history for a source file: the basename with
/// spaces turned into underscores and anything outside `[A-Za-z0-9._-]` dropped.
pub fn sanitize_filename(file_path: &Path) -> String {
    let name = file_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    name.trim()
        .chars()
        .filter_map(|c| match c {
            ' ' => Some('_'),
            c if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') => Some(c),
            _ => None,
        })
        .collect()
}

// ============================================================================
// DELIMITED TEXT
// ============================================================================

pub struct CsvDecoder;

impl CsvDecoder {
    /// Pick the delimiter that yields the most consistent (>1) field count
    /// over the first lines of the file.
    fn sniff_delimiter(content: &str) -> u8 {
        let candidates: &[u8] = &[b',', b';', b'\t', b'|'];
        let sample: Vec<&str> = content.lines().filter(|l| !l.is_empty()).take(10).collect();

        let mut best = b',';
        let mut best_score = 0usize;

        for &delim in candidates {
            let counts: Vec<usize> = sample
                .iter()
                .map(|line| {
                    csv::ReaderBuilder::new()
                        .delimiter(delim)
                        .has_headers(false)
                        .flexible(true)
                        .from_reader(line.as_bytes())
                        .records()
                        .next()
                        .and_then(|r| r.ok())
                        .map(|r| r.len())
                        .unwrap_or(1)
                })
                .collect();

            let first = counts.first().copied().unwrap_or(0);
            if first <= 1 {
                continue;
            }

            let consistent = counts.iter().filter(|&&c| c == first).count();
            let score = consistent * 1000 + first;
            if score > best_score {
                best_score = score;
                best = delim;
            }
        }

        best
    }
}

impl FormatDecoder for CsvDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<RowSet> {
        let content = std::str::from_utf8(bytes)
            .map_err(|e| PipelineError::decode("csv", format!("file is not valid UTF-8: {}", e)))?;
        let content = content.strip_prefix('\u{feff}').unwrap_or(content);

        let delimiter = Self::sniff_delimiter(content);
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .from_reader(content.as_bytes());

        let columns: Vec<String> = reader
            .headers()
            .map_err(|e| PipelineError::decode("csv", e))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        if columns.iter().all(|c| c.is_empty()) {
            return Err(PipelineError::decode("csv", "missing header row"));
        }

        let mut rows = Vec::new();
        for (line_num, result) in reader.records().enumerate() {
            let record = result.map_err(|e| {
                PipelineError::decode("csv", format!("line {}: {}", line_num + 2, e))
            })?;

            // Short rows (trailing empty fields left out) are padded; long ones
            // have no header to land under.
            if record.len() > columns.len() {
                return Err(PipelineError::decode(
                    "csv",
                    format!(
                        "line {}: expected at most {} fields, found {}",
                        line_num + 2,
                        columns.len(),
                        record.len()
                    ),
                ));
            }

            let mut row: Vec<CellValue> = record
                .iter()
                .map(|field| {
                    if field.is_empty() {
                        CellValue::Empty
                    } else {
                        CellValue::Text(field.to_string())
                    }
                })
                .collect();
            row.resize(columns.len(), CellValue::Empty);

            if row.iter().all(CellValue::is_empty) {
                continue;
            }
            rows.push(row);
        }

        Ok(RowSet { columns, rows })
    }

    fn format(&self) -> SourceFormat {
        SourceFormat::Csv
    }
}

// ============================================================================
// SPREADSHEETS (first sheet, first row is the header)
// ============================================================================

pub struct XlsxDecoder;

impl FormatDecoder for XlsxDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<RowSet> {
        let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes))
            .map_err(|e| PipelineError::decode("xlsx", e))?;
        first_sheet(&mut workbook, "xlsx")
    }

    fn format(&self) -> SourceFormat {
        SourceFormat::Xlsx
    }
}

pub struct OdsDecoder;

impl FormatDecoder for OdsDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<RowSet> {
        let mut workbook: Ods<_> = Ods::new(Cursor::new(bytes))
            .map_err(|e| PipelineError::decode("ods", e))?;
        first_sheet(&mut workbook, "ods")
    }

    fn format(&self) -> SourceFormat {
        SourceFormat::Ods
    }
}

fn first_sheet<RS, R>(workbook: &mut R, format: &str) -> Result<RowSet>
where
    RS: Read + Seek,
    R: Reader<RS>,
    R::Error: std::fmt::Display,
{
    let range = match workbook.worksheet_range_at(0) {
        Some(range) => range.map_err(|e| PipelineError::decode(format, e))?,
        None => return Err(PipelineError::decode(format, "workbook contains no sheets")),
    };

    let mut sheet_rows = range.rows();
    let columns: Vec<String> = match sheet_rows.next() {
        Some(header) => header
            .iter()
            .map(|cell| convert_cell(cell).as_text().unwrap_or_default().trim().to_string())
            .collect(),
        None => return Err(PipelineError::decode(format, "sheet is empty")),
    };

    let rows = sheet_rows
        .map(|cells| cells.iter().map(convert_cell).collect::<Vec<_>>())
        .filter(|row| !row.iter().all(CellValue::is_empty))
        .collect();

    Ok(RowSet { columns, rows })
}

fn convert_cell(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Empty,
        Data::String(s) if s.is_empty() => CellValue::Empty,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Float(n) => CellValue::Number(*n),
        Data::Int(n) => CellValue::Number(*n as f64),
        Data::Bool(b) => CellValue::Text(if *b { "TRUE" } else { "FALSE" }.to_string()),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(value) => CellValue::DateTime(value),
            None => CellValue::Number(dt.as_f64()),
        },
        Data::DateTimeIso(s) => parse_iso_datetime(s)
            .map(CellValue::DateTime)
            .unwrap_or_else(|| CellValue::Text(s.clone())),
        other => CellValue::Text(other.to_string()),
    }
}

/// ODS stores typed dates as ISO strings, with or without a time part
fn parse_iso_datetime(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(SourceFormat::from_extension("csv").unwrap(), SourceFormat::Csv);
        assert_eq!(SourceFormat::from_extension("XLSX").unwrap(), SourceFormat::Xlsx);
        assert_eq!(SourceFormat::from_extension("ods").unwrap(), SourceFormat::Ods);

        let err = SourceFormat::from_extension("pdf").unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedFormat(ref ext) if ext == "pdf"));
    }

    #[test]
    fn test_detect_format_without_extension() {
        let result = detect_format(Path::new("transactions"));
        assert!(matches!(result, Err(PipelineError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(
            sanitize_filename(Path::new("/tmp/March Sales (final).csv")),
            "March_Sales_final.csv"
        );
        assert_eq!(sanitize_filename(Path::new("plain.xlsx")), "plain.xlsx");
    }

    #[test]
    fn test_csv_decoder_keeps_row_order_and_empty_cells() {
        let data = "MerchantName,CardScheme,SaleAmount\nAcme,VISA,10.50\nBeta,,3\n";
        let rows = CsvDecoder.decode(data.as_bytes()).unwrap();

        assert_eq!(rows.columns, vec!["MerchantName", "CardScheme", "SaleAmount"]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.get(0, "MerchantName"), Some(&CellValue::Text("Acme".to_string())));
        assert_eq!(rows.get(1, "CardScheme"), Some(&CellValue::Empty));
        assert_eq!(rows.get(1, "Missing"), None);
    }

    #[test]
    fn test_csv_decoder_sniffs_semicolon_and_strips_bom() {
        let data = "\u{feff}MerchantName;SaleAmount\nAcme;1234,56\n";
        let rows = CsvDecoder.decode(data.as_bytes()).unwrap();

        assert_eq!(rows.columns, vec!["MerchantName", "SaleAmount"]);
        assert_eq!(rows.get(0, "SaleAmount"), Some(&CellValue::Text("1234,56".to_string())));
    }

    #[test]
    fn test_csv_decoder_rejects_ragged_rows() {
        let data = "MerchantName,CardScheme\nAcme,VISA,extra,fields\n";
        let result = CsvDecoder.decode(data.as_bytes());

        assert!(matches!(result, Err(PipelineError::Decode { .. })));
    }

    #[test]
    fn test_csv_decoder_pads_short_rows() {
        let data = "MerchantName,CardScheme,SaleAmount,DccAmount\nAcme,VISA,1,2\nBeta,VISA,3\n";
        let rows = CsvDecoder.decode(data.as_bytes()).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows.rows[1].len(), 4);
        assert_eq!(rows.get(1, "SaleAmount"), Some(&CellValue::Text("3".to_string())));
        assert_eq!(rows.get(1, "DccAmount"), Some(&CellValue::Empty));
    }

    #[test]
    fn test_csv_decoder_rejects_invalid_utf8() {
        let result = CsvDecoder.decode(&[0x4d, 0xff, 0xfe, 0x0a]);
        assert!(matches!(result, Err(PipelineError::Decode { .. })));
    }

    #[test]
    fn test_spreadsheet_decoders_reject_garbage() {
        let garbage = b"definitely not a zip container";

        assert!(matches!(XlsxDecoder.decode(garbage), Err(PipelineError::Decode { .. })));
        assert!(matches!(OdsDecoder.decode(garbage), Err(PipelineError::Decode { .. })));
    }

    #[test]
    fn test_cell_as_text() {
        assert_eq!(CellValue::Number(1001.0).as_text(), Some("1001".to_string()));
        assert_eq!(CellValue::Number(12.5).as_text(), Some("12.5".to_string()));
        assert_eq!(CellValue::Empty.as_text(), None);
    }

    #[test]
    fn test_parse_iso_datetime() {
        let dt = parse_iso_datetime("2024-03-05T10:00:00").unwrap();
        assert_eq!(dt.format("%Y-%m-%d %H:%M:%S").to_string(), "2024-03-05 10:00:00");

        let date_only = parse_iso_datetime("2024-03-05").unwrap();
        assert_eq!(date_only.format("%H:%M").to_string(), "00:00");

        assert!(parse_iso_datetime("05/03/2024").is_none());
    }
}
