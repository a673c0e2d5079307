use anyhow::{Context, Result};
use flowbridge_core::{
    options::OPTION_KEYS, Bridge, BridgeConfig, Registry, SampleBuffer, StaticHost,
};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::display::{print_prepared_call, print_samples};
use crate::utils::parse_env_pair;

#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    pub entry: String,
    pub arg: Option<String>,
    pub runtime: Option<String>,
    pub timeout: Option<String>,
    pub env: Vec<String>,
    pub config: Option<PathBuf>,
    pub dry_run: bool,
    pub metrics: bool,
}

pub fn run_command(args: RunArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let call_arg = build_call_arg(&args)?;
    debug!("Call argument: {}", call_arg);

    let registry = Arc::new(Registry::new());
    let sink = Arc::new(SampleBuffer::new());
    let host = StaticHost::new(1, "default").with_tag("scenario", "default");
    let bridge = Bridge::with_config(Arc::new(host), registry, sink.clone(), config)
        .context("Failed to set up the bridge")?;

    if args.dry_run {
        let prepared = bridge.prepare(&args.entry, call_arg)?;
        print_prepared_call(&prepared);
        return Ok(());
    }

    info!("Running flow: {}", args.entry);
    let outcome = bridge.run(&args.entry, call_arg);

    if args.metrics {
        print_samples(&sink.snapshot());
    }

    let result = outcome.with_context(|| format!("Flow {} failed", args.entry))?;
    println!("{}", serde_json::to_string_pretty(&Value::Object(result))?);
    Ok(())
}

fn load_config(explicit: Option<&std::path::Path>) -> Result<BridgeConfig> {
    match explicit {
        Some(path) => BridgeConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => {
            let cwd = std::env::current_dir().context("Failed to get current directory")?;
            BridgeConfig::discover(&cwd).context("Failed to load config")
        }
    }
}

/// Fold the positional JSON argument and the option flags into the single
/// value the bridge expects as its second argument.
pub fn build_call_arg(args: &RunArgs) -> Result<Value> {
    let arg: Value = match args.arg.as_deref() {
        Some(raw) => serde_json::from_str(raw)
            .with_context(|| format!("Argument is not valid JSON: {raw}"))?,
        None => Value::Object(Map::new()),
    };

    if args.runtime.is_none() && args.timeout.is_none() && args.env.is_empty() {
        return Ok(arg);
    }

    let mut options = match arg {
        Value::Object(map) if OPTION_KEYS.iter().any(|k| map.contains_key(*k)) => map,
        payload => {
            let mut map = Map::new();
            map.insert("payload".to_string(), payload);
            map
        }
    };

    if let Some(ref runtime) = args.runtime {
        options.insert("runtime".to_string(), Value::String(runtime.clone()));
    }
    if let Some(ref timeout) = args.timeout {
        options.insert("timeout".to_string(), Value::String(timeout.clone()));
    }
    if !args.env.is_empty() {
        let env = options
            .entry("env")
            .or_insert_with(|| Value::Object(Map::new()));
        let Value::Object(env) = env else {
            anyhow::bail!("`env` in the options object must be an object");
        };
        for pair in &args.env {
            let (key, value) = parse_env_pair(pair)?;
            env.insert(key, Value::String(value));
        }
    }

    Ok(Value::Object(options))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(arg: Option<&str>) -> RunArgs {
        RunArgs {
            entry: "flow.js".to_string(),
            arg: arg.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_plain_argument_passes_through() {
        let value = build_call_arg(&args(Some(r#"{"user":"alice"}"#))).unwrap();
        assert_eq!(value, json!({"user": "alice"}));
    }

    #[test]
    fn test_missing_argument_is_empty_object() {
        assert_eq!(build_call_arg(&args(None)).unwrap(), json!({}));
    }

    #[test]
    fn test_flags_wrap_payload() {
        let mut run = args(Some(r#"{"user":"alice"}"#));
        run.timeout = Some("5s".to_string());
        run.env = vec!["NODE_ENV=production".to_string()];

        let value = build_call_arg(&run).unwrap();
        assert_eq!(
            value,
            json!({
                "payload": {"user": "alice"},
                "timeout": "5s",
                "env": {"NODE_ENV": "production"}
            })
        );
    }

    #[test]
    fn test_flags_merge_into_options_object() {
        let mut run = args(Some(r#"{"payload": 1, "env": {"A": "1"}}"#));
        run.runtime = Some("bun".to_string());
        run.env = vec!["B=2".to_string()];

        let value = build_call_arg(&run).unwrap();
        assert_eq!(
            value,
            json!({"payload": 1, "runtime": "bun", "env": {"A": "1", "B": "2"}})
        );
    }

    #[test]
    fn test_invalid_json_is_reported() {
        let err = build_call_arg(&args(Some("{nope"))).unwrap_err();
        assert!(err.to_string().contains("not valid JSON"));
    }
}
