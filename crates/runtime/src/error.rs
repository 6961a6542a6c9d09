//! Runtime errors
//!
//! Most failures inside a calculation cascade are absorbed where they
//! happen (missing values default, invalid numbers become zero, listener
//! failures are logged at the dispatch site). The variants here cover what
//! is left: configuration, persistence, and lookups made by callers
//! outside a cascade.

use thiserror::Error;

use tandem_foundation::{FieldId, KeyError, ModuleId};

/// Runtime result type
pub type Result<T> = std::result::Result<T, Error>;

/// Runtime errors
#[derive(Debug, Error)]
pub enum Error {
    #[error("module not found: {0}")]
    UnknownModule(ModuleId),

    #[error("module {module} does not declare field {field}")]
    UnknownField { module: ModuleId, field: FieldId },

    #[error("module already registered: {0}")]
    DuplicateModule(ModuleId),

    #[error(transparent)]
    MalformedKey(#[from] KeyError),

    #[error("listener on {key} failed: {message}")]
    Listener { key: String, message: String },

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Generic(String),
}

impl Error {
    /// Build a listener failure from anything printable.
    pub fn listener(key: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Error::Listener {
            key: key.into(),
            message: message.to_string(),
        }
    }
}
