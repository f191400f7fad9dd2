use crate::identity::IdentityStrategy;
use crate::row::ContigPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Rows handed to a worker per dispatch when nothing else is configured.
pub const DEFAULT_BATCH_ROWS: usize = 512;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML config: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to serialize config to TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("'{0}' must be at least 1")]
    Zero(&'static str),
}

/// Settings of a sharded load. Every field may be omitted from a config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoadConfig {
    pub workers: usize,
    pub identity: IdentityStrategy,
    pub batch_rows: usize,
    /// Keep `parts/` after a successful merge.
    pub keep_parts: bool,
    pub contigs: ContigPolicy,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            identity: IdentityStrategy::default(),
            batch_rows: DEFAULT_BATCH_ROWS,
            keep_parts: true,
            contigs: ContigPolicy::default(),
        }
    }
}

impl LoadConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Zero("workers"));
        }
        if self.batch_rows == 0 {
            return Err(ConfigError::Zero("batch_rows"));
        }
        Ok(())
    }
}
