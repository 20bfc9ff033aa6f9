//! Output formatting module
//!
//! Renders sync status, store contents and query answers.

mod formatter;

pub use formatter::{store_entries, OutputFormat, ReportFormatter, StoreEntry};
