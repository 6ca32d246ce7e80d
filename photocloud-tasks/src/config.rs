//! Service configuration

use photocloud_data::PlyEncoding;
use photocloud_recon::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Settings of one orchestrator instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Directory that receives one `<task-id>.ply` per finished task
    pub storage_dir: PathBuf,
    /// Reconstructions allowed to run at the same time
    pub max_concurrent_tasks: usize,
    /// Encoding of generated artifacts; uploads are stored as received
    pub ply_encoding: PlyEncoding,
    pub pipeline: PipelineConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("results"),
            max_concurrent_tasks: 2,
            ply_encoding: PlyEncoding::BinaryLittleEndian,
            pipeline: PipelineConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_tasks == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_tasks must be at least 1".to_string(),
            ));
        }
        if self.storage_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("storage_dir is empty".to_string()));
        }
        self.pipeline
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}
