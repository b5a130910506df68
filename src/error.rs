// Camsync Error Types

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CamSyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config file error: {0}")]
    ConfigFile(#[from] toml::de::Error),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid camera tag: {0:?}")]
    InvalidTag(String),

    #[error("Source directory does not exist: {0}")]
    SourceMissing(PathBuf),

    #[error("Cannot create destination directory {path}: {source}")]
    Destination {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Lock error on {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Conversion failed: {0}")]
    Conversion(String),

    #[error("Too many filename collisions for {0}")]
    CollisionsExhausted(String),

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for CamSyncError {
    fn from(err: anyhow::Error) -> Self {
        CamSyncError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CamSyncError>;
