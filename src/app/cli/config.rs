//! TOML configuration file loading
//!
//! An explicit `--config-file` must exist. Without one, the default file in
//! the user's config directory is used when present; otherwise built-in
//! defaults apply. Command-line flags are layered on top.

use super::args::Args;
use crate::core::logging::{LogFormat, LogSettings};
use crate::queue::{ClientConfig, ConfigError, ConfigResult, QueueConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Contents of `partq.toml`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct FileConfig {
    pub log: LogSettings,
    #[serde(flatten)]
    pub client: ClientConfig,
}

impl FileConfig {
    pub fn from_toml_str(contents: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(contents)?)
    }
}

/// `<config dir>/partq/partq.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("partq").join("partq.toml"))
}

/// Load the file named on the command line, or the default file if any
pub async fn load_config(config_file: Option<&Path>) -> ConfigResult<FileConfig> {
    let path = match config_file {
        Some(path) => path.to_path_buf(),
        None => match default_config_path() {
            Some(path) if path.exists() => path,
            _ => return Ok(FileConfig::default()),
        },
    };

    let contents = tokio::fs::read_to_string(&path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
    let config = FileConfig::from_toml_str(&contents)?;
    log::debug!("Loaded configuration from {}", path.display());
    Ok(config)
}

impl Args {
    /// Layer command-line flags over a loaded configuration
    pub fn apply_overrides(&self, config: &mut FileConfig) -> ConfigResult<()> {
        if let Some(url) = &self.store_url {
            config.client.store.url = url.clone();
        }
        if let Some(namespace) = &self.namespace {
            config.client.store.namespace = namespace.clone();
        }
        if let Some(name) = &self.consumer_name {
            config.client.consumer_name = name.clone();
        }
        if let Some(level) = &self.log_level {
            config.log.level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.log.format = format
                .parse::<LogFormat>()
                .map_err(|reason| ConfigError::InvalidValue {
                    field: "log-format".to_string(),
                    reason,
                })?;
        }
        match self.log_file.as_deref() {
            Some("none") => config.log.file = None,
            Some(file) => config.log.file = Some(file.to_string()),
            None => {}
        }
        if self.no_color {
            config.log.color = false;
        }
        Ok(())
    }
}

/// Make sure the queue a command names is configured, falling back to
/// default queue settings
pub fn ensure_queue(config: &mut FileConfig, queue: &str) {
    if !config.client.queues.contains_key(queue) {
        log::warn!(
            "Queue '{}' is not configured; using default queue settings",
            queue
        );
        config
            .client
            .queues
            .insert(queue.to_string(), QueueConfig::new());
    }
}
