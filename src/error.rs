use thiserror::Error;

use crate::store::StoreError;

/// Errors raised by the writer
#[derive(Debug, Error)]
pub enum LogError {
    /// Resolved configuration is malformed or unreadable
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Store setup failed (connectivity or rejected command)
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(#[source] StoreError),

    /// Metadata used a field name the writer owns
    #[error(":{0} is a reserved key for the capped logger. Please choose a different key")]
    ReservedKey(String),

    /// Record write rejected by the store
    #[error("Persist failure: {0}")]
    Persist(#[source] StoreError),

    /// Operation needs the store but the writer runs in file-only mode
    #[error("Writer is in degraded mode, backend operations are unavailable")]
    Degraded,

    /// Fallback sink could not be opened or written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LogError {
    /// Short machine-friendly name of the error kind, used as a log field
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration_error",
            Self::BackendUnavailable(_) => "backend_unavailable",
            Self::ReservedKey(_) => "reserved_key_violation",
            Self::Persist(_) => "persist_failure",
            Self::Degraded => "degraded",
            Self::Io(_) => "io_error",
        }
    }
}

impl From<config::ConfigError> for LogError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<serde_json::Error> for LogError {
    fn from(err: serde_json::Error) -> Self {
        Self::Configuration(format!("JSON error: {}", err))
    }
}

pub type Result<T, E = LogError> = std::result::Result<T, E>;
