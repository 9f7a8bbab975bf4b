//! Row sources for extraction runs
//!
//! A row source abstracts the remote query engine into two calls:
//! a row-count probe and a paginated `(offset, limit)` fetch. The pipeline
//! never looks inside the query text.
//!
//! - [`BigQuerySource`]: BigQuery REST adapter (`jobs.query` + `getQueryResults`)
//! - [`RetryingSource`]: decorator adding bounded retries with backoff

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

pub mod bigquery;
pub mod credentials;
pub mod retry;

pub use bigquery::BigQuerySource;
pub use credentials::TokenProvider;
pub use retry::{RetryPolicy, RetryingSource};

/// Immutable description of what to extract
///
/// `sql` is passed through untouched; `target` names the dataset in logs and
/// summaries; `order_by` is the deterministic ordering key used to paginate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuerySpec {
    sql: String,
    target: String,
    order_by: Vec<String>,
}

impl QuerySpec {
    pub fn new(sql: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            target: target.into(),
            order_by: Vec::new(),
        }
    }

    pub fn with_order_by(mut self, columns: Vec<String>) -> Self {
        self.order_by = columns;
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn order_by(&self) -> &[String] {
        &self.order_by
    }
}

/// A scalar cell value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Render the value as a CSV field (null becomes an empty field)
    pub fn as_field(&self) -> Cow<'_, str> {
        match self {
            Value::Null => Cow::Borrowed(""),
            Value::Bool(b) => Cow::Borrowed(if *b { "true" } else { "false" }),
            Value::Integer(i) => Cow::Owned(i.to_string()),
            Value::Float(f) if f.is_nan() => Cow::Borrowed("NaN"),
            Value::Float(f) if f.is_infinite() => {
                Cow::Borrowed(if *f > 0.0 { "Infinity" } else { "-Infinity" })
            }
            Value::Float(f) => Cow::Owned(f.to_string()),
            Value::Text(s) => Cow::Borrowed(s.as_str()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            other => f.write_str(&other.as_field()),
        }
    }
}

/// Ordered column names shared by every record of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    columns: Arc<[String]>,
}

impl Schema {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns: columns.into(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// One result row, values aligned with the run's [`Schema`]
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    values: Vec<Value>,
}

impl Record {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

impl From<Vec<Value>> for Record {
    fn from(values: Vec<Value>) -> Self {
        Self::new(values)
    }
}

/// Rows returned for one `(offset, limit)` window
#[derive(Debug, Clone)]
pub struct RowPage {
    pub schema: Schema,
    pub rows: Vec<Record>,
    /// True when the source ran out of rows before `limit` was reached
    pub end_of_data: bool,
}

/// Abstraction over the remote engine
///
/// Implementations must return rows in a stable order for a fixed query and
/// must not drop rows inside the requested range. Returning fewer rows than
/// `limit` past the end of the data is allowed.
#[async_trait]
pub trait RowSource: Send + Sync {
    /// Count the rows the query produces
    ///
    /// # Errors
    /// * `SourceUnavailable` - connectivity, auth or timeout failures
    /// * `Query` - the engine rejected the query (message kept verbatim)
    async fn count(&self, query: &QuerySpec) -> Result<u64>;

    /// Fetch up to `limit` rows starting at `offset`
    async fn fetch(&self, query: &QuerySpec, offset: u64, limit: u64) -> Result<RowPage>;
}

#[async_trait]
impl<S: RowSource + ?Sized> RowSource for Arc<S> {
    async fn count(&self, query: &QuerySpec) -> Result<u64> {
        (**self).count(query).await
    }

    async fn fetch(&self, query: &QuerySpec, offset: u64, limit: u64) -> Result<RowPage> {
        (**self).fetch(query, offset, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_as_field() {
        assert_eq!(Value::Null.as_field(), "");
        assert_eq!(Value::Bool(true).as_field(), "true");
        assert_eq!(Value::Integer(-42).as_field(), "-42");
        assert_eq!(Value::Float(-23.5505).as_field(), "-23.5505");
        assert_eq!(Value::Float(f64::INFINITY).as_field(), "Infinity");
        assert_eq!(Value::Float(f64::NEG_INFINITY).as_field(), "-Infinity");
        assert_eq!(Value::Float(f64::NAN).as_field(), "NaN");
        assert_eq!(Value::Text("01001-000".into()).as_field(), "01001-000");
    }

    #[test]
    fn test_query_spec_accessors() {
        let spec = QuerySpec::new("SELECT 1", "demo").with_order_by(vec!["id".into()]);
        assert_eq!(spec.sql(), "SELECT 1");
        assert_eq!(spec.target(), "demo");
        assert_eq!(spec.order_by(), ["id".to_string()]);
    }
}
