mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = ["./cmafkit.toml", "~/.config/cmafkit/config.toml"];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            tracing::debug!("Using config file {:?}", path);
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
fn validate_config(config: &Config) -> Result<()> {
    if config.resegment.target_ms == 0 {
        anyhow::bail!("resegment.target_ms must be greater than 0");
    }

    let tolerances = [
        ("total_duration_tolerance_secs", config.verify.total_duration_tolerance_secs),
        ("segment_duration_tolerance_secs", config.verify.segment_duration_tolerance_secs),
        ("average_duration_tolerance_secs", config.verify.average_duration_tolerance_secs),
    ];
    for (name, value) in tolerances {
        if value.is_nan() || value < 0.0 {
            anyhow::bail!("verify.{} must be a non-negative number, got {}", name, value);
        }
    }

    Ok(())
}
