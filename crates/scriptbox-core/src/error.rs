use thiserror::Error;

/// Canonical result for core.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Schema(String),

    #[error("column '{column}' row {row}: cannot convert {value} to {target}")]
    Coercion {
        column: String,
        row: usize,
        value: String,
        target: &'static str,
    },

    #[error("serialization failed: {0}")]
    Serde(String),
}

impl Error {
    /// Short kind name used when the error is reported across the run boundary.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Error::Config(_) => "ConfigError",
            Error::Schema(_) => "SchemaError",
            Error::Coercion { .. } => "ValueError",
            Error::Serde(_) => "SerializationError",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serde(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Config(e.to_string())
    }
}
