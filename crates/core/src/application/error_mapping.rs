//! Result/Error Mapping
//!
//! Normalizes the three failure origins into [`SunraError`]:
//! - structured API error bodies (`{"error": {...}}` or legacy top-level fields)
//! - bare HTTP failures without a structured body
//! - transport/local failures with no HTTP response at all

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::constants::header;
use crate::error::{code, ErrorKind, RateLimit, SunraError};
use crate::port::{HttpResponse, TransportError};

/// Extract `{limit, remaining, reset}` when all three headers are present and numeric
pub fn rate_limit_from_headers(headers: &[(String, String)]) -> Option<RateLimit> {
    let get = |name: &str| {
        headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.trim().parse::<u64>().ok())
    };
    Some(RateLimit {
        limit: get(header::RATE_LIMIT_LIMIT)?,
        remaining: get(header::RATE_LIMIT_REMAINING)?,
        reset: get(header::RATE_LIMIT_RESET)?,
    })
}

/// Map a non-2xx response to a normalized error
pub fn from_response(response: &HttpResponse) -> SunraError {
    let status = response.status;
    let request_id = response.header(header::REQUEST_ID).map(str::to_string);
    let rate_limit = rate_limit_from_headers(&response.headers);

    let mut err = match serde_json::from_slice::<Value>(&response.body) {
        Ok(Value::Object(body)) => structured_error(status, &body)
            .unwrap_or_else(|| bare_http_error(status, &response.text())),
        _ => bare_http_error(status, &response.text()),
    };

    err.request_id = request_id;
    err.rate_limit = rate_limit;
    err
}

/// Map a transport failure (no response obtained)
pub fn from_transport(err: TransportError) -> SunraError {
    match err {
        TransportError::Timeout(msg) => {
            SunraError::new(ErrorKind::Http, code::NETWORK_TIMEOUT, msg)
        }
        TransportError::Aborted => SunraError::unknown("Request aborted"),
        other => SunraError::new(ErrorKind::Http, code::NETWORK_ERROR, other.to_string()),
    }
}

fn kind_for_status(status: u16) -> ErrorKind {
    if (400..500).contains(&status) {
        ErrorKind::Validation
    } else {
        ErrorKind::Http
    }
}

fn structured_error(status: u16, body: &serde_json::Map<String, Value>) -> Option<SunraError> {
    let fallback_code = format!("HTTP_{}", status);
    let timestamp = body
        .get("timestamp")
        .and_then(Value::as_str)
        .map(str::to_string);

    if let Some(Value::Object(error)) = body.get("error") {
        let mut err = SunraError::new(
            kind_for_status(status),
            string_field(error, "code").unwrap_or(fallback_code),
            string_field(error, "message").unwrap_or_else(|| "Request failed".to_string()),
        );
        err.server_type = string_field(error, "type");
        err.details = error.get("details").cloned().filter(|d| !d.is_null());
        err.timestamp = timestamp;
        return Some(err);
    }

    // Legacy responses put the fields at the top level
    let message = match (body.get("message"), body.get("detail")) {
        (Some(Value::String(m)), _) => m.clone(),
        (_, Some(Value::String(d))) => d.clone(),
        (_, Some(Value::Array(_))) => "Request validation failed".to_string(),
        _ => return None,
    };
    let mut err = SunraError::new(
        kind_for_status(status),
        string_field(body, "code").unwrap_or(fallback_code),
        message,
    );
    err.server_type = string_field(body, "type");
    err.details = Some(Value::Object(body.clone()));
    err.timestamp = timestamp;
    Some(err)
}

fn bare_http_error(status: u16, body: &str) -> SunraError {
    let shown = if body.is_empty() { "Request failed" } else { body };
    SunraError::new(
        ErrorKind::Http,
        format!("HTTP_{}", status),
        format!("HTTP {}: {}", status, shown),
    )
    .with_details(json!({
        "statusCode": status,
        "responseBody": body,
    }))
}

fn string_field(map: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// One field-level validation failure (FastAPI/Pydantic shape)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    pub loc: Vec<Value>,
    pub msg: String,
    #[serde(rename = "type")]
    pub error_type: String,
}

/// Field-level errors carried by a validation error
///
/// A plain-string `detail` becomes a single `body`-level entry.
pub fn field_errors(err: &SunraError) -> Vec<FieldError> {
    let Some(details) = &err.details else {
        return Vec::new();
    };
    let detail = details.get("detail").unwrap_or(details);
    match detail {
        Value::String(msg) => vec![FieldError {
            loc: vec![Value::String("body".to_string())],
            msg: msg.clone(),
            error_type: "value_error".to_string(),
        }],
        Value::Array(items) => items
            .iter()
            .filter_map(|item| serde_json::from_value(item.clone()).ok())
            .collect(),
        _ => Vec::new(),
    }
}

/// Field-level errors whose location ends with `field`
pub fn field_errors_for(err: &SunraError, field: &str) -> Vec<FieldError> {
    field_errors(err)
        .into_iter()
        .filter(|e| e.loc.last().and_then(Value::as_str) == Some(field))
        .collect()
}
