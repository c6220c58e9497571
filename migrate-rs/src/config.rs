use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub storage: StorageConfig,
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    pub database_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Batch size used when a job does not specify one
    pub default_batch_size: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::error::MigrateError::Config(e.to_string()))?;

        toml::from_str(&content).map_err(|e| crate::error::MigrateError::Config(e.to_string()))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                database_url: "sqlite://migrate.db".to_string(),
            },
            engine: EngineConfig {
                default_batch_size: 200,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}
