//! Error types shared across Atlas crates.

use thiserror::Error;

/// Errors raised while loading packaged application metadata.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// The metadata resource could not be parsed
    #[error("Malformed metadata resource: {0}")]
    Malformed(#[from] toml::de::Error),

    /// A required field is present but empty
    #[error("Metadata field '{0}' is empty")]
    EmptyField(&'static str),

    /// The bundled icon could not be decoded
    #[error("Failed to decode application icon: {0}")]
    Icon(#[from] image::ImageError),
}

/// Result type alias for metadata operations.
pub type MetadataResult<T> = Result<T, MetadataError>;
