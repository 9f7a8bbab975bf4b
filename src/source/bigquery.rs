//! BigQuery REST adapter
//!
//! Runs the caller's query through `jobs.query`, polls `getQueryResults`
//! until the job completes, then follows `pageToken` pagination until the
//! requested window is filled. The caller's SQL is wrapped as a sub-select
//! for counting and windowing and is otherwise left untouched.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::SourceConfig;
use crate::error::bigquery::{classify_error_response, classify_transport_error};
use crate::error::{ConfigError, ExtractError, Result};

use super::credentials::TokenProvider;
use super::{QuerySpec, Record, RowPage, RowSource, Schema, Value};

/// Server-side wait per `jobs.query`/`getQueryResults` call
const SERVER_WAIT_MS: u64 = 10_000;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    query: &'a str,
    use_legacy_sql: bool,
    max_results: u32,
    timeout_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    job_reference: Option<JobReference>,
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<TableRow>,
    page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    project_id: String,
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

#[derive(Debug, Clone, Deserialize)]
struct FieldSchema {
    name: String,
    #[serde(rename = "type", default)]
    field_type: String,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
struct TableCell {
    #[serde(default)]
    v: serde_json::Value,
}

/// Rows collected for one query, across pages
struct QueryRows {
    schema: Schema,
    rows: Vec<Record>,
}

/// Row source backed by the BigQuery REST API
pub struct BigQuerySource {
    http: reqwest::Client,
    base_url: String,
    project_id: String,
    location: Option<String>,
    page_size: u32,
    timeout: Duration,
    tokens: TokenProvider,
    warned_unordered: AtomicBool,
}

impl BigQuerySource {
    /// Create an adapter with credentials resolved from the environment
    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        Self::new(config, TokenProvider::from_env())
    }

    /// Create an adapter with an explicit token provider
    ///
    /// # Arguments
    /// * `config` - Source section of the configuration
    /// * `tokens` - Bearer token provider
    ///
    /// # Returns
    /// * `Result<Self>` - Adapter or `InvalidConfiguration` if no project is set
    pub fn new(config: &SourceConfig, tokens: TokenProvider) -> Result<Self> {
        let project_id = config
            .project_id
            .clone()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingField("source.project_id".to_string()))?;

        let timeout = config.call_timeout();
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("bqpull/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                ExtractError::SourceUnavailable(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            project_id,
            location: config.location.clone(),
            page_size: config.page_size,
            timeout,
            tokens,
            warned_unordered: AtomicBool::new(false),
        })
    }

    /// Run a query and collect at most `row_limit` rows
    ///
    /// Every API call (job start, each poll, each page) gets its own deadline;
    /// a window spanning many pages is not bounded as a whole.
    async fn run_query(&self, sql: &str, row_limit: u64) -> Result<QueryRows> {
        let limit = usize::try_from(row_limit).unwrap_or(usize::MAX);
        let max_results = u32::try_from(row_limit).unwrap_or(u32::MAX).clamp(1, self.page_size);

        let mut response = self.start_query(sql, max_results).await?;
        while !response.job_complete {
            let job = response.job_reference.clone().ok_or_else(|| {
                ExtractError::SourceUnavailable("incomplete job without a job reference".into())
            })?;
            debug!("Job {} still running, polling", job.job_id);
            response = self.query_results(&job, max_results, None).await?;
        }

        let job = response.job_reference.clone();
        let fields = response.schema.take().unwrap_or_default().fields;
        let schema = Schema::new(fields.iter().map(|f| f.name.clone()).collect());

        let mut rows = Vec::with_capacity(limit.min(self.page_size as usize));
        rows.extend(response.rows.drain(..).map(|row| decode_row(&fields, row)));
        let mut page_token = response.page_token.take();

        while rows.len() < limit
            && let Some(token) = page_token.take()
        {
            let job = job.as_ref().ok_or_else(|| {
                ExtractError::SourceUnavailable("paged result without a job reference".into())
            })?;
            let page = self.query_results(job, max_results, Some(&token)).await?;
            rows.extend(page.rows.into_iter().map(|row| decode_row(&fields, row)));
            page_token = page.page_token;
            debug!("Fetched page, {} rows so far", rows.len());
        }

        rows.truncate(limit);
        Ok(QueryRows { schema, rows })
    }

    async fn start_query(&self, sql: &str, max_results: u32) -> Result<QueryResponse> {
        let url = format!("{}/projects/{}/queries", self.base_url, self.project_id);
        let body = QueryRequest {
            query: sql,
            use_legacy_sql: false,
            max_results,
            timeout_ms: self.server_wait_ms(),
            location: self.location.as_deref(),
        };
        self.send(self.http.post(url).json(&body)).await
    }

    async fn query_results(
        &self,
        job: &JobReference,
        max_results: u32,
        page_token: Option<&str>,
    ) -> Result<QueryResponse> {
        let url = format!(
            "{}/projects/{}/queries/{}",
            self.base_url, job.project_id, job.job_id
        );
        let mut params = vec![
            ("maxResults", max_results.to_string()),
            ("timeoutMs", self.server_wait_ms().to_string()),
        ];
        if let Some(location) = job.location.as_deref().or(self.location.as_deref()) {
            params.push(("location", location.to_string()));
        }
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }
        self.send(self.http.get(url).query(&params)).await
    }

    /// Server-side wait, kept under the client deadline so long polls return in time
    fn server_wait_ms(&self) -> u64 {
        let half = u64::try_from(self.timeout.as_millis() / 2).unwrap_or(u64::MAX);
        SERVER_WAIT_MS.min(half)
    }

    /// Send one API call under the per-call deadline
    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        match tokio::time::timeout(self.timeout, self.send_inner(request)).await {
            Ok(result) => result,
            Err(_) => Err(ExtractError::SourceUnavailable(format!(
                "BigQuery call did not complete within {}s",
                self.timeout.as_secs_f64()
            ))),
        }
    }

    async fn send_inner<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let token = self.tokens.token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            if status == StatusCode::UNAUTHORIZED {
                self.tokens.invalidate().await;
            }
            let body = response.text().await.unwrap_or_default();
            return Err(classify_error_response(status.as_u16(), &body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| classify_transport_error(&e))
    }
}

#[async_trait]
impl RowSource for BigQuerySource {
    async fn count(&self, query: &QuerySpec) -> Result<u64> {
        let result = self.run_query(&count_sql(query), 1).await?;
        let value = result
            .rows
            .first()
            .and_then(|row| row.values().first())
            .cloned()
            .unwrap_or(Value::Null);

        match value {
            Value::Integer(n) if n >= 0 => Ok(n as u64),
            Value::Text(s) => s.parse().map_err(|_| {
                ExtractError::SourceUnavailable(format!("unexpected count value '{s}'"))
            }),
            other => Err(ExtractError::SourceUnavailable(format!(
                "unexpected count value '{other}'"
            ))),
        }
    }

    async fn fetch(&self, query: &QuerySpec, offset: u64, limit: u64) -> Result<RowPage> {
        if query.order_by().is_empty() && !self.warned_unordered.swap(true, Ordering::Relaxed) {
            warn!(
                "No ordering key for '{}': OFFSET pagination may skip or repeat rows",
                query.target()
            );
        }

        let result = self.run_query(&window_sql(query, offset, limit), limit).await?;
        let end_of_data = (result.rows.len() as u64) < limit;
        Ok(RowPage {
            schema: result.schema,
            rows: result.rows,
            end_of_data,
        })
    }
}

/// Strip whitespace and a trailing `;` so the text can be nested
fn query_body(query: &QuerySpec) -> &str {
    query.sql().trim().trim_end_matches(';').trim_end()
}

/// SQL counting the rows of the caller's query
pub(crate) fn count_sql(query: &QuerySpec) -> String {
    format!("SELECT COUNT(*) AS total_rows FROM (\n{}\n)", query_body(query))
}

/// SQL selecting one `[offset, offset + limit)` window of the caller's query
pub(crate) fn window_sql(query: &QuerySpec, offset: u64, limit: u64) -> String {
    let mut sql = format!("SELECT * FROM (\n{}\n)", query_body(query));
    if !query.order_by().is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(&query.order_by().join(", "));
    }
    sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}"));
    sql
}

fn decode_row(fields: &[FieldSchema], row: TableRow) -> Record {
    let values = fields
        .iter()
        .zip(row.f)
        .map(|(field, cell)| decode_cell(field, cell.v))
        .collect();
    Record::new(values)
}

/// Decode one `f/v` cell according to its field type
fn decode_cell(field: &FieldSchema, raw: serde_json::Value) -> Value {
    use serde_json::Value as Json;

    if raw.is_null() {
        return Value::Null;
    }
    if field.is_repeated() || field.is_record() {
        let plain = to_plain_json(field, raw);
        return Value::Text(plain.to_string());
    }

    let text = match raw {
        Json::String(s) => s,
        Json::Bool(b) => return Value::Bool(b),
        other => other.to_string(),
    };

    match field.field_type.to_ascii_uppercase().as_str() {
        "INTEGER" | "INT64" => text.parse().map(Value::Integer).unwrap_or(Value::Text(text)),
        "FLOAT" | "FLOAT64" => match text.parse::<f64>() {
            Ok(f) if f.is_finite() => Value::Float(f),
            _ => Value::Text(text),
        },
        "BOOLEAN" | "BOOL" => match text.to_ascii_lowercase().as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::Text(text),
        },
        "TIMESTAMP" => format_timestamp(&text).map(Value::Text).unwrap_or(Value::Text(text)),
        _ => Value::Text(text),
    }
}

/// Resolve nested `f/v` wrappers into plain JSON using the field schema
fn to_plain_json(field: &FieldSchema, raw: serde_json::Value) -> serde_json::Value {
    use serde_json::Value as Json;

    if field.is_repeated() {
        let items = match raw {
            Json::Array(items) => items,
            other => return other,
        };
        let element = FieldSchema {
            mode: None,
            ..field.clone()
        };
        return Json::Array(
            items
                .into_iter()
                .map(|item| match item {
                    Json::Object(mut obj) => {
                        to_plain_json(&element, obj.remove("v").unwrap_or(Json::Null))
                    }
                    other => other,
                })
                .collect(),
        );
    }

    if field.is_record() {
        let cells = match raw {
            Json::Object(mut obj) => match obj.remove("f") {
                Some(Json::Array(cells)) => cells,
                _ => return Json::Object(obj),
            },
            other => return other,
        };
        let mut out = serde_json::Map::new();
        for (child, cell) in field.fields.iter().zip(cells) {
            let v = match cell {
                Json::Object(mut obj) => obj.remove("v").unwrap_or(Json::Null),
                other => other,
            };
            out.insert(child.name.clone(), to_plain_json(child, v));
        }
        return Json::Object(out);
    }

    raw
}

/// BigQuery returns TIMESTAMP cells as floating point epoch seconds
fn format_timestamp(text: &str) -> Option<String> {
    let seconds: f64 = text.parse().ok()?;
    let micros = (seconds * 1_000_000.0).round() as i64;
    DateTime::from_timestamp_micros(micros)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

impl FieldSchema {
    fn is_repeated(&self) -> bool {
        self.mode
            .as_deref()
            .is_some_and(|m| m.eq_ignore_ascii_case("REPEATED"))
    }

    fn is_record(&self) -> bool {
        matches!(
            self.field_type.to_ascii_uppercase().as_str(),
            "RECORD" | "STRUCT"
        )
    }
}
