//! Configuration loading from disk.

use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::schema::ConfigSnapshot;
use crate::config::validation::ValidationError;

/// Error type for configuration loading, reloading and watching.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error in {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),
}

/// Settings document syntax, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Toml,
}

impl DocumentFormat {
    /// `.toml` files are TOML; everything else is treated as JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => DocumentFormat::Toml,
            _ => DocumentFormat::Json,
        }
    }
}

/// Parse document text into a snapshot.
pub fn parse_snapshot(path: &Path, content: &str) -> Result<ConfigSnapshot, ConfigError> {
    let parse_err = |message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    };

    let root: Value = match DocumentFormat::from_path(path) {
        DocumentFormat::Json => {
            serde_json::from_str(content).map_err(|e| parse_err(e.to_string()))?
        }
        DocumentFormat::Toml => toml::from_str(content).map_err(|e| parse_err(e.to_string()))?,
    };

    if !root.is_object() {
        return Err(parse_err("top level of settings document must be a table".to_string()));
    }

    Ok(ConfigSnapshot::new(root, path))
}

/// Read and parse a settings document synchronously.
pub fn load_snapshot(path: &Path) -> Result<ConfigSnapshot, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_snapshot(path, &content)
}

/// Read and parse a settings document without blocking the runtime.
pub async fn read_snapshot(path: &Path) -> Result<ConfigSnapshot, ConfigError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    parse_snapshot(path, &content)
}
