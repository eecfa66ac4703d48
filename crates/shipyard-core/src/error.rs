use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found: {0}\nhint: run from the directory holding shipyard.yaml or pass --config")]
    NotFound(PathBuf),

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid config: {0}")]
    Validation(String),

    #[error("missing credential: set {0}")]
    MissingCredential(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("template {template} failed to render: {message}")]
    Render { template: String, message: String },

    #[error("template registration failed: {0}")]
    Load(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
