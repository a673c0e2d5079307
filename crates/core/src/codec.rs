//! Wire contract between the guest runner and the host.
//!
//! The guest prints its result as one JSON object between two marker lines
//! on standard output. Everything outside the markers is diagnostic text.
//! Two reserved keys inside the object carry telemetry and are stripped
//! before the result reaches the caller.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tracing::warn;

use crate::metrics::MetricKind;

pub const RESULT_START: &str = "__RESULT_START__";
pub const RESULT_END: &str = "__RESULT_END__";

/// Reserved key carrying telemetry entries
pub const METRICS_KEY: &str = "__flowbridge_metrics__";
/// Reserved key carrying check entries
pub const CHECKS_KEY: &str = "__flowbridge_checks__";

// Markers count only on lines of their own; the JSON line never holds a raw newline.
static RESULT_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?ms)^__RESULT_START__\r?\n(?:(.*?)\r?\n)?__RESULT_END__\r?$")
        .expect("result block pattern is valid")
});

/// Why a result could not be recovered from the child's output
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("result markers not found in output")]
    MarkersNotFound,

    #[error("failed to unmarshal result: {0}")]
    InvalidJson(String),

    #[error("result is not a JSON object (got {0})")]
    NotAnObject(&'static str),
}

/// One typed metric emission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEntry {
    #[serde(alias = "type")]
    pub kind: MetricKind,
    pub name: String,
    /// Left raw; numeric coercion happens when merging
    pub value: Value,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl TelemetryEntry {
    pub fn new(kind: MetricKind, name: impl Into<String>, value: f64) -> Self {
        Self {
            kind,
            name: name.into(),
            value: Value::from(value),
            tags: BTreeMap::new(),
        }
    }

    /// Lenient decode: unknown kinds become counters, non-string tags are dropped
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let name = object.get("name")?.as_str()?.to_string();
        let kind = object
            .get("kind")
            .or_else(|| object.get("type"))
            .and_then(Value::as_str)
            .map(MetricKind::parse_lenient)
            .unwrap_or_default();
        let tags = object
            .get("tags")
            .and_then(Value::as_object)
            .map(|tags| {
                tags.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            kind,
            name,
            value: object.get("value").cloned().unwrap_or(Value::Null),
            tags,
        })
    }
}

/// One named pass/fail outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckEntry {
    pub name: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl CheckEntry {
    pub fn new(name: impl Into<String>, passed: bool) -> Self {
        Self {
            name: name.into(),
            passed,
            tags: BTreeMap::new(),
        }
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let name = object.get("name")?.as_str()?.to_string();
        let passed = match object.get("passed") {
            Some(Value::Bool(b)) => *b,
            _ => return None,
        };
        let tags = object
            .get("tags")
            .and_then(Value::as_object)
            .map(|tags| {
                tags.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        Some(Self { name, passed, tags })
    }
}

/// Telemetry pulled out of a wire result
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Telemetry {
    pub metrics: Vec<TelemetryEntry>,
    pub checks: Vec<CheckEntry>,
}

impl Telemetry {
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty() && self.checks.is_empty()
    }
}

/// Locate the first start-marker line and the next end-marker line, and parse
/// what lies between
pub fn extract_result(output: &str) -> Result<Map<String, Value>, ProtocolError> {
    let captures = RESULT_BLOCK
        .captures(output)
        .ok_or(ProtocolError::MarkersNotFound)?;
    let body = captures
        .get(1)
        .map(|m| m.as_str().trim())
        .unwrap_or_default();

    let value: Value =
        serde_json::from_str(body).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(ProtocolError::NotAnObject(json_type_name(&other))),
    }
}

/// Remove both reserved keys from `result`, decoding whatever they carried
pub fn take_telemetry(result: &mut Map<String, Value>) -> Telemetry {
    let metrics = decode_list(result.remove(METRICS_KEY), METRICS_KEY, TelemetryEntry::from_value);
    let checks = decode_list(result.remove(CHECKS_KEY), CHECKS_KEY, CheckEntry::from_value);
    Telemetry { metrics, checks }
}

fn decode_list<T>(value: Option<Value>, key: &str, decode: fn(&Value) -> Option<T>) -> Vec<T> {
    let items = match value {
        None => return Vec::new(),
        Some(Value::Array(items)) => items,
        Some(other) => {
            warn!(
                "Ignoring reserved key {} holding {} instead of an array",
                key,
                json_type_name(&other)
            );
            return Vec::new();
        }
    };

    items
        .iter()
        .filter_map(|item| {
            let decoded = decode(item);
            if decoded.is_none() {
                warn!("Dropping malformed {} entry: {}", key, item);
            }
            decoded
        })
        .collect()
}

/// Render a result in wire form, attaching non-empty telemetry under the reserved keys
pub fn encode_result(result: &Map<String, Value>, telemetry: &Telemetry) -> String {
    let mut object = result.clone();
    if !telemetry.metrics.is_empty() {
        object.insert(
            METRICS_KEY.to_string(),
            serde_json::to_value(&telemetry.metrics).unwrap_or(Value::Null),
        );
    }
    if !telemetry.checks.is_empty() {
        object.insert(
            CHECKS_KEY.to_string(),
            serde_json::to_value(&telemetry.checks).unwrap_or(Value::Null),
        );
    }
    format!(
        "{RESULT_START}\n{}\n{RESULT_END}\n",
        Value::Object(object)
    )
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_ignores_surrounding_logs() {
        let output = "booting\nwarn: slow\n__RESULT_START__\n{\"ok\":true}\n__RESULT_END__\nbye\n";
        let result = extract_result(output).unwrap();
        assert_eq!(Value::Object(result), json!({"ok": true}));
    }

    #[test]
    fn test_marker_text_inside_payload_strings_is_data() {
        let payload = json!({"note": "see __RESULT_END__ and __RESULT_START__ in docs"});
        let wire = encode_result(payload.as_object().unwrap(), &Telemetry::default());

        let result = extract_result(&wire).unwrap();
        assert_eq!(Value::Object(result), payload);
    }

    #[test]
    fn test_log_lines_mentioning_markers_are_not_protocol() {
        let output = "debug: __RESULT_START__ soon\nsaw __RESULT_END__ too\n\
                      __RESULT_START__\n{\"ok\":1}\n__RESULT_END__\n";
        let result = extract_result(output).unwrap();
        assert_eq!(Value::Object(result), json!({"ok": 1}));
    }

    #[test]
    fn test_crlf_marker_lines_are_accepted() {
        let output = "log\r\n__RESULT_START__\r\n{\"ok\":true}\r\n__RESULT_END__\r\n";
        let result = extract_result(output).unwrap();
        assert_eq!(Value::Object(result), json!({"ok": true}));
    }

    #[test]
    fn test_extract_uses_first_start_and_next_end() {
        let output = "__RESULT_START__\n{\"n\":1}\n__RESULT_END__\n__RESULT_START__\n{\"n\":2}\n__RESULT_END__\n";
        let result = extract_result(output).unwrap();
        assert_eq!(result.get("n"), Some(&json!(1)));
    }

    #[test]
    fn test_extract_failures() {
        assert_eq!(
            extract_result("no markers here"),
            Err(ProtocolError::MarkersNotFound)
        );
        assert_eq!(
            extract_result("__RESULT_START__\n{\"a\":1}\n"),
            Err(ProtocolError::MarkersNotFound)
        );
        assert!(matches!(
            extract_result("__RESULT_START__\n{oops\n__RESULT_END__"),
            Err(ProtocolError::InvalidJson(_))
        ));
        assert_eq!(
            extract_result("__RESULT_START__\n[1,2]\n__RESULT_END__"),
            Err(ProtocolError::NotAnObject("array"))
        );
    }

    #[test]
    fn test_take_telemetry_strips_reserved_keys() {
        let mut result = json!({
            "user": "alice",
            METRICS_KEY: [
                {"kind": "counter", "name": "orders", "value": 2, "tags": {"shop": "eu", "n": 1}},
                {"type": "trend", "name": "latency", "value": 12.5},
                {"kind": "gauge", "value": 1},
                "garbage"
            ],
            CHECKS_KEY: [
                {"name": "status is 200", "passed": true},
                {"name": "no passed field"}
            ]
        })
        .as_object()
        .cloned()
        .unwrap();

        let telemetry = take_telemetry(&mut result);

        assert_eq!(Value::Object(result), json!({"user": "alice"}));
        assert_eq!(telemetry.metrics.len(), 2);
        assert_eq!(telemetry.metrics[0].kind, MetricKind::Counter);
        assert_eq!(telemetry.metrics[0].tags.len(), 1);
        assert_eq!(telemetry.metrics[1].kind, MetricKind::Trend);
        assert_eq!(telemetry.checks, vec![CheckEntry::new("status is 200", true)]);
    }

    #[test]
    fn test_non_array_reserved_values_are_removed() {
        let mut result = json!({METRICS_KEY: "oops", "a": 1}).as_object().cloned().unwrap();
        let telemetry = take_telemetry(&mut result);
        assert!(telemetry.is_empty());
        assert!(!result.contains_key(METRICS_KEY));
    }

    #[test]
    fn test_encoded_result_is_extractable() {
        let mut telemetry = Telemetry::default();
        telemetry.checks.push(CheckEntry::new("ok", false));
        let result = json!({"a": [1, 2]}).as_object().cloned().unwrap();

        let wire = encode_result(&result, &telemetry);
        assert!(wire.starts_with("__RESULT_START__\n"));

        let mut decoded = extract_result(&format!("log line\n{wire}")).unwrap();
        let telemetry = take_telemetry(&mut decoded);
        assert_eq!(Value::Object(decoded), json!({"a": [1, 2]}));
        assert_eq!(telemetry.checks[0].name, "ok");
    }
}
