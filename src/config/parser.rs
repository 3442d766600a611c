use std::{collections::HashSet, fs, path::Path};

use anyhow::{Context, Result};

use crate::config::DaemonConfig;

/// Rejects configurations the daemon could not run with.
pub fn check_monitors(config: &DaemonConfig) -> Result<()> {
    if config.scratch_root.as_os_str().is_empty() {
        return Err(anyhow::anyhow!("`scratch_root` must not be empty"));
    }
    if config.monitors.is_empty() {
        return Err(anyhow::anyhow!("no monitor configured"));
    }

    let mut seen = HashSet::new();
    for (i, monitor) in config.monitors.iter().enumerate() {
        let repository = monitor.repository.trim();
        let branch = monitor.branch.trim();
        if repository.is_empty() {
            return Err(anyhow::anyhow!("monitor #{} has no repository", i + 1));
        }
        if branch.is_empty() {
            return Err(anyhow::anyhow!(
                "monitor #{} ({repository}) has no branch",
                i + 1
            ));
        }
        if !seen.insert((repository, branch)) {
            return Err(anyhow::anyhow!(
                "branch '{branch}' of '{repository}' is monitored twice"
            ));
        }
    }
    Ok(())
}

pub fn load_config(path: &Path) -> Result<DaemonConfig> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Error reading config file {path:?}"))?;

    let config: DaemonConfig =
        serde_yaml::from_str(&content).with_context(|| "Error parsing YAML configuration file")?;

    check_monitors(&config)?;
    Ok(config)
}
