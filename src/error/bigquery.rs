use std::fmt;

use serde::{Deserialize, Serialize};

use super::ExtractError;

/// Error body returned by Google APIs.
///
/// ```json
/// {"error": {"code": 400, "message": "...", "status": "INVALID_ARGUMENT",
///            "errors": [{"reason": "invalidQuery", "message": "...", "location": "q"}]}}
/// ```
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub error: ErrorInfo,
}

/// Structured error information extracted from a BigQuery error body.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorDetails>,
}

/// One entry of the `errors` array.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Reasons that indicate a problem with the query itself rather than the
/// service. Retrying these never helps.
const QUERY_REASONS: &[&str] = &[
    "invalidQuery",
    "invalid",
    "notFound",
    "duplicate",
    "responseTooLarge",
    "resourcesExceeded",
];

impl ErrorInfo {
    /// First `reason` from the `errors` array, if any.
    pub fn reason(&self) -> Option<&str> {
        self.errors.iter().find_map(|e| e.reason.as_deref())
    }

    /// Whether the error is caused by the query rather than the service.
    pub fn is_query_error(&self) -> bool {
        self.reason()
            .is_some_and(|reason| QUERY_REASONS.contains(&reason))
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = self
            .message
            .as_deref()
            .or_else(|| self.errors.iter().find_map(|e| e.message.as_deref()))
            .unwrap_or("unknown error");
        match (self.code, self.reason()) {
            (Some(code), Some(reason)) => write!(f, "{message} (HTTP {code}, {reason})"),
            (Some(code), None) => write!(f, "{message} (HTTP {code})"),
            (None, Some(reason)) => write!(f, "{message} ({reason})"),
            (None, None) => f.write_str(message),
        }
    }
}

/// Classify a non-success HTTP response from the BigQuery API.
///
/// Query problems (HTTP 400/404 or a query-related reason) become
/// [`ExtractError::Query`] with the remote message passed through; auth,
/// quota, and server errors become [`ExtractError::SourceUnavailable`].
///
/// # Arguments
/// * `status` - HTTP status code
/// * `body` - Raw response body
pub fn classify_error_response(status: u16, body: &str) -> ExtractError {
    let mut info = serde_json::from_str::<ErrorResponse>(body)
        .map(|r| r.error)
        .unwrap_or_default();
    if info.code.is_none() {
        info.code = Some(status);
    }
    if info.message.is_none() && info.errors.is_empty() && !body.trim().is_empty() {
        info.message = Some(body.trim().to_string());
    }

    let query_error = match status {
        400 | 404 => true,
        401 | 403 | 408 | 429 | 500..=599 => false,
        _ => info.is_query_error(),
    };

    if query_error {
        ExtractError::Query(info.to_string())
    } else {
        ExtractError::SourceUnavailable(info.to_string())
    }
}

/// Map a transport error from the HTTP client.
pub fn classify_transport_error(err: &reqwest::Error) -> ExtractError {
    if err.is_timeout() {
        ExtractError::SourceUnavailable(format!("request timed out: {err}"))
    } else if err.is_connect() {
        ExtractError::SourceUnavailable(format!("connection failed: {err}"))
    } else if err.is_decode() {
        ExtractError::SourceUnavailable(format!("malformed response: {err}"))
    } else {
        ExtractError::SourceUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_query_is_query_error() {
        let body = r#"{"error":{"code":400,"message":"Syntax error: Unexpected keyword FROM at [1:8]",
            "status":"INVALID_ARGUMENT",
            "errors":[{"reason":"invalidQuery","message":"Syntax error: Unexpected keyword FROM at [1:8]","location":"q"}]}}"#;
        match classify_error_response(400, body) {
            ExtractError::Query(msg) => {
                assert!(msg.starts_with("Syntax error: Unexpected keyword FROM at [1:8]"));
                assert!(msg.contains("invalidQuery"));
            }
            other => panic!("expected query error, got {other:?}"),
        }
    }

    #[test]
    fn test_not_found_is_query_error() {
        let body = r#"{"error":{"code":404,"message":"Not found: Table p:d.t was not found in location US",
            "errors":[{"reason":"notFound"}]}}"#;
        assert!(matches!(
            classify_error_response(404, body),
            ExtractError::Query(_)
        ));
    }

    #[test]
    fn test_auth_errors_are_unavailable() {
        let body = r#"{"error":{"code":401,"message":"Request had invalid authentication credentials.",
            "status":"UNAUTHENTICATED"}}"#;
        assert!(matches!(
            classify_error_response(401, body),
            ExtractError::SourceUnavailable(_)
        ));

        let body = r#"{"error":{"code":403,"message":"Access Denied","errors":[{"reason":"accessDenied"}]}}"#;
        assert!(matches!(
            classify_error_response(403, body),
            ExtractError::SourceUnavailable(_)
        ));
    }

    #[test]
    fn test_server_errors_are_unavailable() {
        assert!(matches!(
            classify_error_response(503, "Service Unavailable"),
            ExtractError::SourceUnavailable(_)
        ));
        let body = r#"{"error":{"code":500,"errors":[{"reason":"backendError"}]}}"#;
        assert!(matches!(
            classify_error_response(500, body),
            ExtractError::SourceUnavailable(_)
        ));
    }

    #[test]
    fn test_non_json_body_is_kept_verbatim() {
        match classify_error_response(502, "<html>Bad Gateway</html>") {
            ExtractError::SourceUnavailable(msg) => {
                assert_eq!(msg, "<html>Bad Gateway</html> (HTTP 502)");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
