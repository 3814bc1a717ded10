//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid configuration: {message}")]
    Configuration { message: String },

    #[error("Invalid source URL: {url} - {reason}")]
    InvalidSourceUrl { url: String, reason: String },

    #[error("Failed to parse sources file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Shorthand for a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        CoreError::Configuration {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
