//! Configuration loading from a TOML file with defaults.

use std::path::Path;
use strata_types::config::MemoryConfig;
use strata_types::error::{StrataError, StrataResult};
use tracing::{info, warn};

/// Read, parse and validate a TOML config file.
pub fn try_load_config(path: &Path) -> StrataResult<MemoryConfig> {
    let contents = std::fs::read_to_string(path)?;
    let config: MemoryConfig =
        toml::from_str(&contents).map_err(|e| StrataError::Config(e.to_string()))?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &MemoryConfig) -> StrataResult<()> {
    if config.embedding_dimensions == 0 {
        return Err(StrataError::Config(
            "embedding_dimensions must be positive".to_string(),
        ));
    }
    if config.max_page_size < 1 {
        return Err(StrataError::Config(
            "max_page_size must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Load store configuration from a TOML file.
///
/// A missing, unreadable, malformed or invalid file falls back to defaults;
/// the failure is logged, never returned.
pub fn load_config(path: &Path) -> MemoryConfig {
    if !path.exists() {
        info!(path = %path.display(), "Config file not found, using defaults");
        return MemoryConfig::default();
    }

    match try_load_config(path) {
        Ok(config) => {
            info!(path = %path.display(), "Loaded configuration");
            config
        }
        Err(e) => {
            warn!(
                error = %e,
                path = %path.display(),
                "Failed to load config, using defaults"
            );
            MemoryConfig::default()
        }
    }
}
