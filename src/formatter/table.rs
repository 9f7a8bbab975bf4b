//! Table rendering for row previews and run summaries using tabled

use tabled::{
    builder::Builder,
    settings::{Alignment, Modify, Style, object::Columns, object::Rows, width::Width},
};

use crate::source::{Record, Schema};

/// Maximum width for a single column (characters)
const DEFAULT_MAX_COLUMN_WIDTH: usize = 40;

/// Table formatter for rows and key/value listings
pub struct TableFormatter {
    max_column_width: usize,
}

impl Default for TableFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl TableFormatter {
    pub fn new() -> Self {
        Self {
            max_column_width: DEFAULT_MAX_COLUMN_WIDTH,
        }
    }

    /// Set maximum column width
    pub fn with_max_column_width(mut self, width: usize) -> Self {
        self.max_column_width = width;
        self
    }

    /// Render rows under their schema
    ///
    /// # Arguments
    /// * `schema` - Column names, used as the header
    /// * `rows` - Records to render; nulls show as `null`
    ///
    /// # Returns
    /// * `String` - Rendered table
    pub fn format_rows(&self, schema: &Schema, rows: &[Record]) -> String {
        if schema.is_empty() {
            return "(no columns)".to_string();
        }
        if rows.is_empty() {
            return "(empty result set)".to_string();
        }

        let mut builder = Builder::default();
        builder.push_record(schema.columns().iter().cloned());
        for row in rows {
            builder.push_record(row.values().iter().map(|v| v.to_string()));
        }

        let mut table = builder.build();
        table.with(Style::modern());
        for i in 0..schema.len() {
            table.with(Modify::new(Columns::new(i..=i)).with(Width::wrap(self.max_column_width)));
        }
        table.with(Modify::new(Rows::first()).with(Alignment::center()));
        table.to_string()
    }

    /// Render `(key, value)` pairs as a two-column table without header
    pub fn format_pairs(&self, pairs: &[(String, String)]) -> String {
        let mut builder = Builder::default();
        for (key, value) in pairs {
            builder.push_record([key.as_str(), value.as_str()]);
        }
        let mut table = builder.build();
        table.with(Style::rounded());
        table.with(Modify::new(Columns::new(1..=1)).with(Width::wrap(self.max_column_width * 2)));
        table.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Value;

    #[test]
    fn test_format_rows() {
        let schema = Schema::new(vec!["cep".into(), "latitude".into()]);
        let rows = vec![
            Record::new(vec![Value::Text("01001000".into()), Value::Float(-23.55)]),
            Record::new(vec![Value::Text("01002000".into()), Value::Null]),
        ];

        let out = TableFormatter::new().format_rows(&schema, &rows);
        assert!(out.contains("cep"));
        assert!(out.contains("01001000"));
        assert!(out.contains("-23.55"));
        assert!(out.contains("null"));
    }

    #[test]
    fn test_format_empty_rows() {
        let schema = Schema::new(vec!["cep".into()]);
        assert_eq!(
            TableFormatter::new().format_rows(&schema, &[]),
            "(empty result set)"
        );
    }

    #[test]
    fn test_format_pairs() {
        let out = TableFormatter::new().format_pairs(&[
            ("Target".to_string(), "enderecos".to_string()),
            ("Status".to_string(), "completed".to_string()),
        ]);
        assert!(out.contains("Target"));
        assert!(out.contains("completed"));
    }
}
