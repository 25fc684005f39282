// DW ETL - Core Library
// Spreadsheet sheets -> SQLite star schema, full reload or incremental load.
// Exposes all modules for use in the CLI and tests

pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod facts;
pub mod incremental;
pub mod model;
pub mod pipeline;
pub mod reconciliation;
pub mod runlog;
pub mod source;
pub mod transform;
pub mod watermark;

// Re-export commonly used types
pub use config::{EtlConfig, LoadMode};
pub use db::{setup_schema, RunRecord, RunStatus, TableCounts, Warehouse};
pub use error::{EtlError, Result};
pub use export::{export_warehouse, ExportCounts};
pub use facts::{load_expenses, load_sales, TimeKeys};
pub use incremental::{partition, select_new, BoundaryPolicy, Partition};
pub use model::{CustomerRow, Dated, ExpenseRow, FactStream, ProductRow, TransactionRow};
pub use pipeline::{run, run_from_config, run_full_reload, run_incremental, RunReport, StreamReport};
pub use reconciliation::{insert_dimension, reconcile_dimension, DimensionRow, UpsertStats};
pub use runlog::{FileRunLog, MemoryRunLog, RunLog, TracingRunLog};
pub use source::{load_source, SourceData};
pub use transform::{normalize_date, transform, TransformReport, Transformed};
pub use watermark::{read_watermark, read_watermarks, Watermark, Watermarks};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
