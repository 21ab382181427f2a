//! Host configuration: hub location, cache directory, runtime limits.
//!
//! Every field has a default, so an absent or partial JSON file still
//! yields a usable config.

use std::path::{Path, PathBuf};

use fixity_caption_types::ModelVariant;
use serde::{Deserialize, Serialize};

/// Environment variable consulted when no `--config` flag is given.
pub const CONFIG_ENV_VAR: &str = "FIXITY_CAPTION_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HostConfig {
    /// Base URL of the HuggingFace-compatible hub.
    pub hub_endpoint: String,
    /// Where downloaded model resources are cached.
    pub cache_dir: PathBuf,
    /// ONNX intra-op threads. The browser build ran single-threaded WASM.
    pub intra_threads: usize,
    /// Forces a variant instead of probing the hardware.
    pub variant: Option<ModelVariant>,
    /// Capacity of the UI -> host command channel.
    pub command_capacity: usize,
    /// Capacity of the host -> UI event channel.
    pub event_capacity: usize,
    /// `log` level filter name (error, warn, info, debug, trace).
    pub log_level: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            hub_endpoint: "https://huggingface.co".to_string(),
            cache_dir: PathBuf::from("models"),
            intra_threads: 1,
            variant: None,
            command_capacity: 8,
            event_capacity: 256,
            log_level: "info".to_string(),
        }
    }
}

impl HostConfig {
    fn validate(self) -> Result<Self, ConfigError> {
        if self.intra_threads == 0 {
            return Err(ConfigError::Invalid("intra_threads must be >= 1".into()));
        }
        if self.command_capacity == 0 || self.event_capacity == 0 {
            return Err(ConfigError::Invalid("channel capacities must be >= 1".into()));
        }
        if self.hub_endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("hub_endpoint is empty".into()));
        }
        Ok(self)
    }
}

/// Load a config file. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<HostConfig, ConfigError> {
    if !path.exists() {
        log::info!("No config at {}, using defaults", path.display());
        return Ok(HostConfig::default());
    }

    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: HostConfig = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate()
}

/// Resolve the config from an explicit path, then the environment, then defaults.
pub fn resolve_config(explicit: Option<&Path>) -> Result<HostConfig, ConfigError> {
    match explicit {
        Some(path) => load_config(path),
        None => match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => load_config(Path::new(&path)),
            None => Ok(HostConfig::default()),
        },
    }
}
