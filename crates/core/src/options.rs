//! Interpretation of the second argument to `run(entry, payloadOrOptions)`

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Keys whose presence turns an object argument into an options object.
/// `entry` is honoured inside an options object but does not make one.
pub const OPTION_KEYS: &[&str] = &["payload", "env", "timeout", "runtime"];

/// A canonical request produced from the call arguments
#[derive(Debug, Clone, PartialEq)]
pub struct CallRequest {
    pub entry: String,
    pub payload: Value,
    /// Explicit runtime name, validated later by runtime selection
    pub runtime: Option<String>,
    pub env: BTreeMap<String, String>,
    pub timeout: Option<String>,
}

impl CallRequest {
    pub fn new(entry: impl Into<String>, payload: Value) -> Self {
        Self {
            entry: entry.into(),
            payload,
            runtime: None,
            env: BTreeMap::new(),
            timeout: None,
        }
    }

    /// Classify `arg` as either the whole payload or an options object.
    ///
    /// Only key presence matters: `{user: "alice"}` is a payload, while
    /// `{payload: ...}` or `{timeout: "5s"}` is an options object. When an
    /// options object omits `payload`, the whole object is still sent as the
    /// payload.
    pub fn from_args(entry: &str, arg: Value) -> Result<Self> {
        let options = match &arg {
            Value::Object(map) if is_options_object(map) => map.clone(),
            _ => return Ok(Self::new(entry, arg)),
        };

        let mut request = Self::new(entry, Value::Null);

        if let Some(value) = options.get("runtime") {
            request.runtime = Some(expect_string("runtime", value)?.to_string());
        }

        if let Some(value) = options.get("entry") {
            let entry = expect_string("entry", value)?;
            if !entry.is_empty() {
                request.entry = entry.to_string();
            }
        }

        if let Some(value) = options.get("timeout") {
            let timeout = expect_string("timeout", value)?;
            if !timeout.is_empty() {
                request.timeout = Some(timeout.to_string());
            }
        }

        if let Some(value) = options.get("env") {
            request.env = parse_env(value)?;
        }

        request.payload = match options.get("payload") {
            Some(payload) => payload.clone(),
            None => arg,
        };

        Ok(request)
    }
}

fn is_options_object(map: &Map<String, Value>) -> bool {
    OPTION_KEYS.iter().any(|key| map.contains_key(*key))
}

fn expect_string<'a>(key: &str, value: &'a Value) -> Result<&'a str> {
    value
        .as_str()
        .ok_or_else(|| Error::InvalidOptions(format!("`{key}` must be a string, got {value}")))
}

fn parse_env(value: &Value) -> Result<BTreeMap<String, String>> {
    let map = match value {
        Value::Null => return Ok(BTreeMap::new()),
        Value::Object(map) => map,
        other => {
            return Err(Error::InvalidOptions(format!(
                "`env` must be an object of strings, got {other}"
            )));
        }
    };

    map.iter()
        .map(|(key, value)| match value {
            Value::String(s) => Ok((key.clone(), s.clone())),
            Value::Number(n) => Ok((key.clone(), n.to_string())),
            Value::Bool(b) => Ok((key.clone(), b.to_string())),
            other => Err(Error::InvalidOptions(format!(
                "`env.{key}` must be a string, got {other}"
            ))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_object_is_payload() {
        let request = CallRequest::from_args("flow.js", json!({"a": 1})).unwrap();
        assert_eq!(request.payload, json!({"a": 1}));
        assert_eq!(request.timeout, None);
        assert_eq!(request.entry, "flow.js");
    }

    #[test]
    fn test_scalar_and_array_are_payload() {
        assert_eq!(
            CallRequest::from_args("f.js", json!(42)).unwrap().payload,
            json!(42)
        );
        assert_eq!(
            CallRequest::from_args("f.js", json!(["timeout"])).unwrap().payload,
            json!(["timeout"])
        );
    }

    #[test]
    fn test_options_object_is_unwrapped() {
        let request =
            CallRequest::from_args("flow.js", json!({"payload": {"a": 1}, "timeout": "2s"}))
                .unwrap();
        assert_eq!(request.payload, json!({"a": 1}));
        assert_eq!(request.timeout.as_deref(), Some("2s"));
    }

    #[test]
    fn test_full_options_object() {
        let request = CallRequest::from_args(
            "flow.js",
            json!({
                "payload": null,
                "env": {"NODE_ENV": "production", "RETRIES": 3},
                "runtime": "deno",
                "entry": "other.ts"
            }),
        )
        .unwrap();
        assert_eq!(request.payload, Value::Null);
        assert_eq!(request.runtime.as_deref(), Some("deno"));
        assert_eq!(request.entry, "other.ts");
        assert_eq!(request.env.get("NODE_ENV").map(String::as_str), Some("production"));
        assert_eq!(request.env.get("RETRIES").map(String::as_str), Some("3"));
    }

    #[test]
    fn test_options_without_payload_send_whole_object() {
        let arg = json!({"timeout": "1s", "user": "alice"});
        let request = CallRequest::from_args("flow.js", arg.clone()).unwrap();
        assert_eq!(request.payload, arg);
        assert_eq!(request.timeout.as_deref(), Some("1s"));
    }

    #[test]
    fn test_entry_alone_does_not_make_options() {
        let arg = json!({"entry": "x.js"});
        let request = CallRequest::from_args("flow.js", arg.clone()).unwrap();
        assert_eq!(request.payload, arg);
        assert_eq!(request.entry, "flow.js");
    }

    #[test]
    fn test_malformed_option_values_are_caller_errors() {
        let err = CallRequest::from_args("f.js", json!({"timeout": 5})).unwrap_err();
        assert!(matches!(err, Error::InvalidOptions(_)));

        let err = CallRequest::from_args("f.js", json!({"env": ["A=1"]})).unwrap_err();
        assert!(matches!(err, Error::InvalidOptions(_)));

        let err = CallRequest::from_args("f.js", json!({"env": {"A": {"b": 1}}})).unwrap_err();
        assert!(err.to_string().contains("env.A"));
    }
}
