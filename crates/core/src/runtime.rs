//! Supported guest runtimes and the per-runtime invocation convention

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Extensions for which a `.<runtime>.<ext>` filename suffix selects the runtime
pub const SCRIPT_EXTENSIONS: &[&str] = &["js", "mjs", "cjs", "ts", "mts", "cts"];

/// A guest runtime the bridge knows how to spawn
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
    #[default]
    Node,
    Deno,
    Bun,
}

/// How the runner script reaches the guest process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptDelivery {
    /// `<program> -e <script> <entry> <payload> <context>`
    InlineFlag,
    /// `<program> run --allow-all - <entry> <payload> <context>` with the script on stdin
    Stdin,
}

/// How the guest turns the entry string into something importable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleResolution {
    /// Filesystem path against the cwd, probing candidate extensions
    Path,
    /// Module specifier: URL or absolute path as-is, otherwise joined to the cwd
    Specifier,
}

impl ModuleResolution {
    /// Value of the hint the runner script reads to pick its resolution strategy
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleResolution::Path => "path",
            ModuleResolution::Specifier => "specifier",
        }
    }
}

impl Runtime {
    pub const ALL: [Runtime; 3] = [Runtime::Node, Runtime::Deno, Runtime::Bun];

    pub fn as_str(&self) -> &'static str {
        match self {
            Runtime::Node => "node",
            Runtime::Deno => "deno",
            Runtime::Bun => "bun",
        }
    }

    /// Comma-separated list of supported runtime names
    pub fn supported_list() -> String {
        Self::ALL
            .iter()
            .map(|r| r.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Default executable name
    pub fn program(&self) -> &'static str {
        self.as_str()
    }

    pub fn script_delivery(&self) -> ScriptDelivery {
        match self {
            Runtime::Node | Runtime::Bun => ScriptDelivery::InlineFlag,
            Runtime::Deno => ScriptDelivery::Stdin,
        }
    }

    pub fn module_resolution(&self) -> ModuleResolution {
        match self {
            Runtime::Node | Runtime::Bun => ModuleResolution::Path,
            Runtime::Deno => ModuleResolution::Specifier,
        }
    }

    /// Whether the entry/payload/context also travel through environment variables.
    /// Deno reads its script from stdin; Bun's `-e` argv layout differs from Node's.
    pub fn needs_env_channel(&self) -> bool {
        match self {
            Runtime::Node => false,
            Runtime::Deno | Runtime::Bun => true,
        }
    }

    /// Arguments placed between the program and the positional arguments
    pub fn launch_args(&self, script: &str) -> Vec<String> {
        match self.script_delivery() {
            ScriptDelivery::InlineFlag => vec!["-e".to_string(), script.to_string()],
            ScriptDelivery::Stdin => vec![
                "run".to_string(),
                "--allow-all".to_string(),
                "-".to_string(),
            ],
        }
    }

    /// Runtime tag embedded in an entry filename, e.g. `flow.deno.ts`
    pub fn from_entry(entry: &str) -> Option<Runtime> {
        let file_name = Path::new(entry).file_name()?.to_str()?;
        let mut parts = file_name.rsplit('.');
        let ext = parts.next()?;
        let tag = parts.next()?;
        // A bare `node.js` has no stem in front of the tag
        parts.next()?;

        if !SCRIPT_EXTENSIONS.contains(&ext) {
            return None;
        }
        Self::ALL.into_iter().find(|r| r.as_str() == tag)
    }

    /// Resolve the runtime for a call: explicit option, then filename tag, then `fallback`
    pub fn select(explicit: Option<&str>, entry: &str, fallback: Runtime) -> Result<Runtime> {
        if let Some(name) = explicit {
            return name.parse();
        }
        Ok(Self::from_entry(entry).unwrap_or(fallback))
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Runtime {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| Error::UnsupportedRuntime(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_suffix_selects_runtime() {
        let cases = [
            ("x.node.js", Runtime::Node),
            ("x.deno.ts", Runtime::Deno),
            ("x.bun.js", Runtime::Bun),
            ("x.js", Runtime::Node),
            ("flows/checkout.bun.mjs", Runtime::Bun),
        ];
        for (entry, expected) in cases {
            assert_eq!(
                Runtime::select(None, entry, Runtime::Node).unwrap(),
                expected,
                "entry {entry}"
            );
        }
    }

    #[test]
    fn test_unmatched_patterns_fall_through_to_default() {
        assert_eq!(Runtime::from_entry("x.deno.py"), None);
        assert_eq!(Runtime::from_entry("x.python.js"), None);
        assert_eq!(Runtime::from_entry("deno.ts"), None);
        assert_eq!(Runtime::from_entry("flow"), None);
        assert_eq!(
            Runtime::select(None, "x.deno.py", Runtime::Bun).unwrap(),
            Runtime::Bun
        );
    }

    #[test]
    fn test_explicit_runtime_wins_over_suffix() {
        assert_eq!(
            Runtime::select(Some("bun"), "x.deno.ts", Runtime::Node).unwrap(),
            Runtime::Bun
        );
    }

    #[test]
    fn test_unknown_explicit_runtime_fails_fast() {
        let err = Runtime::select(Some("python"), "x.js", Runtime::Node).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("python"));
        assert!(message.contains("node, deno, bun"));
    }

    #[test]
    fn test_launch_conventions() {
        assert_eq!(Runtime::Node.launch_args("S"), vec!["-e", "S"]);
        assert_eq!(Runtime::Bun.launch_args("S"), vec!["-e", "S"]);
        assert_eq!(Runtime::Deno.launch_args("S"), vec!["run", "--allow-all", "-"]);
        assert!(Runtime::Deno.needs_env_channel());
        assert!(Runtime::Bun.needs_env_channel());
        assert!(!Runtime::Node.needs_env_channel());
        assert_eq!(Runtime::Deno.module_resolution(), ModuleResolution::Specifier);
    }
}
