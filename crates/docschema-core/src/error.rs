//! Core error types.

use thiserror::Error;

/// Core errors raised by the value model, schema I/O and the document store.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Filesystem error while reading or writing schema and plan files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML encoding or decoding error.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Key decoding error.
    #[error("invalid key format")]
    InvalidKey,

    /// Invalid object id text.
    #[error("invalid object id: {0}")]
    InvalidObjectId(String),

    /// Invalid data format.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// A write rejected by the collection's validation rule.
    #[error("document {id} failed validation: {}", issues.join("; "))]
    DocumentValidation { id: String, issues: Vec<String> },
}
