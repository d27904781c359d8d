//! Snapshot and purge of key-value tables.
//!
//! [`TableCatalog`] finds the tables of an environment, [`ScanStream`] pages
//! through them, [`TableExporter`] writes one CSV per table through
//! [`CsvProjector`], and [`TableClearer`] deletes items through
//! [`BatchWriter`].

pub mod aws;
pub mod batch;
pub mod catalog;
pub mod clear;
pub mod export;
pub mod item;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod projector;
pub mod scan;
pub mod service;

pub use aws::DynamoDbTableService;
pub use batch::{BatchFailure, BatchOutcome, BatchWriter, MAX_BATCH_SIZE};
pub use catalog::{ResolvedTable, TableCatalog, TableFilter};
pub use clear::{ClearOptions, ClearPlan, ClearReport, TableClear, TableClearer};
pub use export::{ExportOptions, ExportReport, SkippedTable, TableExport, TableExporter, TableFailure};
pub use item::{Item, ItemValue, KeySchema};
pub use projector::CsvProjector;
pub use scan::ScanStream;
pub use service::{TableDescriptor, TableService, TableStatus, WriteRequest};
