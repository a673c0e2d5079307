//! Bridge configuration loaded from `.flowbridge.json`

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{
    command::DEFAULT_OUTPUT_GRACE,
    error::{Error, Result},
    runtime::Runtime,
};

pub const CONFIG_FILE_NAMES: &[&str] = &[".flowbridge.json", "flowbridge.json"];

/// Per-runtime launch overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RuntimeConfig {
    /// Executable to launch instead of the runtime's default name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Inserted before the script flag, e.g. `--max-old-space-size=4096`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_args: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BridgeConfig {
    /// Used when neither an explicit runtime nor a filename tag applies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_runtime: Option<Runtime>,

    /// Applied when a call gives no timeout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_timeout: Option<String>,

    /// Base environment overlay, beneath per-call `env`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_grace_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub runtimes: HashMap<Runtime, RuntimeConfig>,
}

impl BridgeConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Walk up from `start_path` looking for a config file
    pub fn find_config_file(start_path: &Path) -> Option<PathBuf> {
        let mut current = start_path;

        loop {
            for name in CONFIG_FILE_NAMES {
                let config_path = current.join(name);
                if config_path.is_file() {
                    return Some(config_path);
                }
            }
            current = current.parent()?;
        }
    }

    /// Load the nearest config above `start_path`, or defaults when there is none
    pub fn discover(start_path: &Path) -> Result<Self> {
        match Self::find_config_file(start_path) {
            Some(path) => {
                tracing::debug!("Loading config from {:?}", path);
                Self::load_from_file(&path)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(ref timeout) = self.default_timeout {
            crate::duration::parse_duration(timeout)
                .map_err(|e| Error::Config(format!("default_timeout: {e}")))?;
        }
        for (runtime, overrides) in &self.runtimes {
            if overrides.command.as_deref() == Some("") {
                return Err(Error::Config(format!(
                    "runtimes.{runtime}.command must not be empty"
                )));
            }
        }
        Ok(())
    }

    pub fn fallback_runtime(&self) -> Runtime {
        self.default_runtime.unwrap_or_default()
    }

    pub fn program_for(&self, runtime: Runtime) -> String {
        self.runtimes
            .get(&runtime)
            .and_then(|r| r.command.clone())
            .unwrap_or_else(|| runtime.program().to_string())
    }

    pub fn extra_args_for(&self, runtime: Runtime) -> &[String] {
        self.runtimes
            .get(&runtime)
            .and_then(|r| r.extra_args.as_deref())
            .unwrap_or_default()
    }

    pub fn output_grace(&self) -> Duration {
        self.output_grace_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_OUTPUT_GRACE)
    }
}
