use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad input shape or range. Raised before any side effect.
    #[error("Invalid `{field}`: {message}")]
    Validation { field: String, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    /// Transient store failure. The engine absorbs these and falls back to its
    /// working set.
    #[error("Persistence unavailable: {0}")]
    PersistenceUnavailable(String),

    /// Market or news fetch failure for a single instrument.
    #[error("Upstream data unavailable for {code}: {reason}")]
    UpstreamDataUnavailable { code: String, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn upstream(code: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::UpstreamDataUnavailable {
            code: code.into(),
            reason: reason.into(),
        }
    }

    /// Only validation failures and explicit not-found results reach callers.
    pub fn is_caller_visible(&self) -> bool {
        matches!(self, Error::Validation { .. } | Error::NotFound(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
