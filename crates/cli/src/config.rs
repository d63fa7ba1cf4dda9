// cftunnel - CLI Config Module
// Loads the quick tunnel configuration and applies command-line overrides

use std::path::PathBuf;

use anyhow::{Context, Result};

use cftunnel_common::QuickConfig;

/// Values given on the command line that take precedence over quick.toml
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config_path: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
    pub binary: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
}

/// Load the configuration file (default location unless overridden) and
/// layer the command-line values on top
pub fn load(overrides: &Overrides) -> Result<QuickConfig> {
    let path = match &overrides.config_path {
        Some(path) => path.clone(),
        None => QuickConfig::config_path()?,
    };

    let mut config = QuickConfig::load_from(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    apply(&mut config, overrides);
    config
        .validate()
        .context("Configuration validation failed")?;

    Ok(config)
}

fn apply(config: &mut QuickConfig, overrides: &Overrides) {
    if let Some(dir) = &overrides.state_dir {
        config.state_dir = dir.clone();
    }
    if let Some(binary) = &overrides.binary {
        config.binary_path = Some(binary.clone());
    }
    if let Some(secs) = overrides.timeout_secs {
        config.resolve_timeout_ms = secs.saturating_mul(1000);
    }
}
