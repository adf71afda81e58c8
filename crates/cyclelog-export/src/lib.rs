//! Export collaborators for cyclelog.
//!
//! Writes a finished [`ProcessingResult`](cyclelog_runtime::processor::ProcessingResult)
//! to CSV files plus a plain-text summary report.

pub mod csv_export;
pub mod report;

pub use csv_export::{CsvExporter, TableSink};
