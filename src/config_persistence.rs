//! Config file location, first-run creation, and loading.

use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::config::{sanitize_config, Config};

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("title-critic").join("config.toml"))
}

/// Loads `config.toml`, writing a default file first when none exists.
///
/// An unparsable file falls back to defaults instead of failing startup.
pub fn load_or_create_config(config_file: &Path) -> Result<Config, String> {
    if let Some(config_root) = config_file.parent() {
        if !config_root.as_os_str().is_empty() {
            std::fs::create_dir_all(config_root).map_err(|err| {
                format!(
                    "Failed to create config directory {}: {}",
                    config_root.display(),
                    err
                )
            })?;
        }
    }

    if !config_file.exists() {
        info!(
            "Config file not found. Creating default config. path={}",
            config_file.display()
        );
        let default_config = sanitize_config(Config::default());
        let config_text = toml::to_string(&default_config)
            .map_err(|err| format!("Failed to serialize default config: {}", err))?;
        std::fs::write(config_file, config_text).map_err(|err| {
            format!(
                "Failed to write default config {}: {}",
                config_file.display(),
                err
            )
        })?;
        return Ok(default_config);
    }

    let config_content = std::fs::read_to_string(config_file)
        .map_err(|err| format!("Failed to read config {}: {}", config_file.display(), err))?;
    let config = match toml::from_str::<Config>(&config_content) {
        Ok(config) => config,
        Err(err) => {
            warn!(
                "Config file {} is invalid, using defaults: {}",
                config_file.display(),
                err
            );
            Config::default()
        }
    };
    Ok(sanitize_config(config))
}
