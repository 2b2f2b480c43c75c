//! Error types for adapters

use thiserror::Error;

/// Result type for adapter operations
pub type Result<T> = std::result::Result<T, Error>;

/// Adapter errors
#[derive(Error, Debug)]
pub enum Error {
    /// External provider call failed
    #[error("Provider {provider} error: {message}")]
    Provider {
        /// Provider id
        provider: String,
        /// Error message
        message: String,
    },

    /// No provider registered under the id
    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    /// Asset is not handled
    #[error("Unsupported asset: {0}")]
    UnsupportedAsset(String),

    /// Webhook payload could not be understood
    #[error("Invalid webhook: {0}")]
    InvalidWebhook(String),

    /// Field-level validation failed
    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Provider failure helper
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }
}
