//! Error types for resource discovery and transport

use std::sync::Arc;
use thiserror::Error;

use feedgate_core::CoreError;

/// Source operation errors
#[derive(Debug, Error)]
pub enum SourceError {
    // ============ Configuration Errors ============
    #[error("Invalid configuration: {message}")]
    Configuration { message: String },

    #[error(transparent)]
    Core(#[from] CoreError),

    // ============ Resolution Errors ============
    #[error("Failed to resolve {resource_type} for {source_url}")]
    ResourceResolution {
        source_url: String,
        resource_type: &'static str,
        #[source]
        cause: Arc<SourceError>,
    },

    #[error("{operation} is not supported by {source_url}")]
    Unsupported {
        operation: &'static str,
        source_url: String,
    },

    // ============ Network Errors ============
    #[error("HTTP error: {status} - {message}")]
    Http { status: u16, message: String },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Rate limited by server. Retry after {retry_after} seconds")]
    RateLimited { retry_after: u64 },

    // ============ Authentication Errors ============
    #[error("Authentication required for {url}")]
    AuthRequired { url: String },

    #[error("Proxy authentication required for {url}")]
    ProxyAuthRequired { url: String },

    // ============ Package Errors ============
    #[error("Invalid package id or version '{value}': {reason}")]
    InvalidPackage { value: String, reason: &'static str },

    // ============ Payload Errors ============
    #[error("Invalid service index at {url}: {message}")]
    InvalidServiceIndex { url: String, message: String },

    #[error("Invalid URL: {url} - {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    // ============ IO Errors ============
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ============ Other ============
    #[error("Operation cancelled")]
    Cancelled,
}

impl SourceError {
    pub fn configuration(message: impl Into<String>) -> Self {
        SourceError::Configuration {
            message: message.into(),
        }
    }

    /// Configuration problem, directly or behind resolution context
    pub fn is_configuration(&self) -> bool {
        match self {
            SourceError::Configuration { .. } | SourceError::Core(CoreError::Configuration { .. }) => {
                true
            }
            SourceError::ResourceResolution { cause, .. } => cause.is_configuration(),
            _ => false,
        }
    }

    /// Cancellation, directly or behind resolution context
    pub fn is_cancelled(&self) -> bool {
        match self {
            SourceError::Cancelled => true,
            SourceError::ResourceResolution { cause, .. } => cause.is_cancelled(),
            _ => false,
        }
    }

    /// Innermost error behind any resolution context
    pub fn root_cause(&self) -> &SourceError {
        match self {
            SourceError::ResourceResolution { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

/// Result type for source operations
pub type Result<T> = std::result::Result<T, SourceError>;

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            SourceError::Network {
                message: format!("Connection failed: {}", e),
            }
        } else if let Some(status) = e.status() {
            SourceError::Http {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            SourceError::Network {
                message: e.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(e: serde_json::Error) -> Self {
        SourceError::Serialization(e.to_string())
    }
}

impl From<url::ParseError> for SourceError {
    fn from(e: url::ParseError) -> Self {
        SourceError::InvalidUrl {
            url: String::new(),
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrapped(cause: SourceError) -> SourceError {
        SourceError::ResourceResolution {
            source_url: "https://feed/index.json".to_string(),
            resource_type: "ServiceIndexResource",
            cause: Arc::new(cause),
        }
    }

    #[test]
    fn test_classification_looks_through_context() {
        assert!(wrapped(SourceError::Cancelled).is_cancelled());
        assert!(wrapped(wrapped(SourceError::configuration("cycle"))).is_configuration());
        assert!(!wrapped(SourceError::Network { message: "down".into() }).is_cancelled());
    }

    #[test]
    fn test_root_cause() {
        let err = wrapped(wrapped(SourceError::RateLimited { retry_after: 5 }));
        assert!(matches!(err.root_cause(), SourceError::RateLimited { retry_after: 5 }));
    }

    #[test]
    fn test_resolution_error_message() {
        let err = wrapped(SourceError::Http {
            status: 500,
            message: "boom".into(),
        });
        insta::assert_snapshot!(
            err.to_string(),
            @"Failed to resolve ServiceIndexResource for https://feed/index.json"
        );
    }
}
