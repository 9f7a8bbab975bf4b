//! Console output formatting

pub mod table;

pub use table::TableFormatter;
