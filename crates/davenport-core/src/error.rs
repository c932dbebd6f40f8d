use thiserror::Error;

/// Top-level error type for the gateway.
///
/// Subsystem crates keep their own error enums and convert into this one at
/// crate boundaries so that `?` works across the composition root.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DavenportError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<toml::de::Error> for DavenportError {
    fn from(err: toml::de::Error) -> Self {
        DavenportError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for DavenportError {
    fn from(err: toml::ser::Error) -> Self {
        DavenportError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for DavenportError {
    fn from(err: serde_json::Error) -> Self {
        DavenportError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for gateway operations.
pub type Result<T> = std::result::Result<T, DavenportError>;
