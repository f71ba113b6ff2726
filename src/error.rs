// 🚦 Error Taxonomy
// One variant per way an ingestion or export run can be rejected

use std::io;

use thiserror::Error;

/// Every failure the pipeline can report to its caller.
///
/// All variants are recoverable: the caller retries with a corrected file or
/// a different export scope. `EmptyAfterFilter` and `NothingToExport` are not
/// failures at all from the user's point of view, see [`is_nothing_to_do`].
///
/// [`is_nothing_to_do`]: PipelineError::is_nothing_to_do
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unsupported file format '{0}' (expected xlsx, ods or csv)")]
    UnsupportedFormat(String),

    #[error("could not decode {format} file: {message}")]
    Decode { format: String, message: String },

    #[error("could not find {0} column in the data")]
    MissingColumn(String),

    #[error(
        "schema mismatch: missing columns [{}], unrecognized columns [{}]",
        missing.join(", "),
        extra.join(", ")
    )]
    SchemaMismatch { missing: Vec<String>, extra: Vec<String> },

    #[error("no data to upload after applying filtering")]
    EmptyAfterFilter,

    #[error("line {line}: could not parse transaction date '{value}'")]
    DateParse { line: usize, value: String },

    #[error("line {line}: could not parse amount '{value}'")]
    AmountParse { line: usize, value: String },

    #[error("sale amount total for '{merchant}' in {year_month} is out of range")]
    AmountOverflow { year_month: String, merchant: String },

    #[error("failed to store upload {upload_id} ({attempted} rows): {source}")]
    StoreWrite {
        upload_id: i64,
        attempted: usize,
        #[source]
        source: rusqlite::Error,
    },

    #[error("nothing to export")]
    NothingToExport,

    #[error("export I/O error: {0}")]
    ExportIo(#[from] io::Error),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl PipelineError {
    /// True for conditions the caller should report as "nothing to do"
    /// rather than as a failure.
    pub fn is_nothing_to_do(&self) -> bool {
        matches!(
            self,
            PipelineError::EmptyAfterFilter | PipelineError::NothingToExport
        )
    }

    pub(crate) fn decode(format: impl Into<String>, message: impl ToString) -> Self {
        PipelineError::Decode {
            format: format.into(),
            message: message.to_string(),
        }
    }
}

impl From<zip::result::ZipError> for PipelineError {
    fn from(err: zip::result::ZipError) -> Self {
        PipelineError::ExportIo(io::Error::from(err))
    }
}

impl From<csv::Error> for PipelineError {
    fn from(err: csv::Error) -> Self {
        PipelineError::ExportIo(io::Error::from(err))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nothing_to_do_classification() {
        assert!(PipelineError::EmptyAfterFilter.is_nothing_to_do());
        assert!(PipelineError::NothingToExport.is_nothing_to_do());
        assert!(!PipelineError::MissingColumn("MerchantName".to_string()).is_nothing_to_do());
        assert!(!PipelineError::UnsupportedFormat("pdf".to_string()).is_nothing_to_do());
    }

    #[test]
    fn test_schema_mismatch_message_lists_columns() {
        let err = PipelineError::SchemaMismatch {
            missing: vec!["ClientName".to_string(), "TerminalId".to_string()],
            extra: vec![],
        };

        let message = err.to_string();
        assert!(message.contains("ClientName, TerminalId"));
    }
}
