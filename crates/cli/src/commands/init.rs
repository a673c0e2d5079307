use anyhow::{Context, Result};
use flowbridge_core::{config::CONFIG_FILE_NAMES, BridgeConfig, Runtime};
use std::collections::BTreeMap;
use std::{env, path::Path};
use tracing::info;

/// Starter configuration written by `flowbridge init`
pub fn starter_config() -> BridgeConfig {
    BridgeConfig {
        default_runtime: Some(Runtime::Node),
        default_timeout: Some("30s".to_string()),
        env: BTreeMap::from([("NODE_ENV".to_string(), "production".to_string())]),
        ..Default::default()
    }
}

pub fn init_command(cwd: Option<&Path>, force: bool) -> Result<()> {
    let project_root = match cwd {
        Some(dir) => dir.to_path_buf(),
        None => env::current_dir().context("Failed to get current directory")?,
    };
    let project_root = project_root
        .canonicalize()
        .with_context(|| format!("Failed to canonicalize {}", project_root.display()))?;

    let config_path = project_root.join(CONFIG_FILE_NAMES[0]);
    if config_path.exists() && !force {
        anyhow::bail!(
            "Config already exists at {} (use --force to overwrite)",
            config_path.display()
        );
    }

    starter_config()
        .save_to_file(&config_path)
        .with_context(|| format!("Failed to write config to {}", config_path.display()))?;

    info!("Wrote {}", config_path.display());
    println!("Created config: {}", config_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_writes_loadable_config() {
        let temp_dir = TempDir::new().unwrap();
        init_command(Some(temp_dir.path()), false).unwrap();

        let path = temp_dir.path().join(".flowbridge.json");
        let loaded = BridgeConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, starter_config());
    }

    #[test]
    fn test_init_refuses_to_overwrite_without_force() {
        let temp_dir = TempDir::new().unwrap();
        init_command(Some(temp_dir.path()), false).unwrap();

        assert!(init_command(Some(temp_dir.path()), false).is_err());
        assert!(init_command(Some(temp_dir.path()), true).is_ok());
    }
}
