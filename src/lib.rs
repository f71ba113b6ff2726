// Merchant Batch Archive - Core Library
// Ingestion, batching and export/archival of merchant transaction files.
// Exposes all modules for use in the CLI and tests.

pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod export;
pub mod parser;
pub mod pipeline;
pub mod reconciliation;
pub mod registry;
pub mod report;
pub mod schema;
pub mod temporal;

// Re-export commonly used types
pub use db::{LiveTransaction, Scope, Storage, Transaction};
pub use error::{PipelineError, Result};
pub use export::ExportEngine;
pub use parser::{decode_file, get_decoder, CellValue, FormatDecoder, RowSet, SourceFormat};
pub use pipeline::{
    batch_history, build_report, delete_export_batch, delete_upload_batch, ingest_merchant_list,
    ingest_rows, ingest_transactions, run_export, BatchHistory, MerchantImport,
};
pub use reconciliation::{FilterReport, ReferenceFilter};
pub use registry::{ExportBatch, UploadBatch};
pub use report::{MonthlyReport, Report, ReportRow};
pub use schema::{SchemaReconciler, SourceRow, CANONICAL_COLUMNS};
pub use temporal::TemporalNormalizer;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
