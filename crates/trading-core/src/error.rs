//! Error types shared across the trailguard crates.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration file error: {0}")]
    ConfigFile(#[from] config::ConfigError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid instrument key: {0}")]
    InvalidInstrument(String),

    #[error("Invalid strategy: {0}")]
    InvalidStrategy(String),
}

pub type Result<T> = std::result::Result<T, Error>;
