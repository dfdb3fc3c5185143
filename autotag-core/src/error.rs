//! Error types for autotag-core.

use thiserror::Error;

/// Result type alias using autotag-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while tagging a catalog.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (fatal for the run)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A single backend call produced no usable text
    #[error("Provider unavailable: {provider} - {message}")]
    ProviderUnavailable { provider: String, message: String },

    /// Every configured provider was exhausted for a record
    #[error("No tags produced for record {record_id}")]
    NoTagsProduced { record_id: i64 },

    /// The catalog tool could not be found or started
    #[error("Catalog unavailable: {0}")]
    CatalogUnavailable(String),

    /// The catalog tool ran but reported an error
    #[error("Catalog query failed: {0}")]
    CatalogQueryFailed(String),

    /// The catalog tool output was not well-formed
    #[error("Catalog output could not be parsed: {0}")]
    CatalogParseFailed(String),

    /// Writing metadata back to the catalog failed
    #[error("Failed to write tags for record {record_id}: {message}")]
    CatalogWriteFailed { record_id: i64, message: String },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a provider-unavailable error.
    pub fn provider_unavailable(provider: impl ToString, message: impl Into<String>) -> Self {
        Self::ProviderUnavailable {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    /// Create a catalog write error.
    pub fn catalog_write(record_id: i64, message: impl Into<String>) -> Self {
        Self::CatalogWriteFailed {
            record_id,
            message: message.into(),
        }
    }

    /// Whether this error must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Whether this error came from reading the catalog.
    pub fn is_catalog_read(&self) -> bool {
        matches!(
            self,
            Self::CatalogUnavailable(_) | Self::CatalogQueryFailed(_) | Self::CatalogParseFailed(_)
        )
    }
}
