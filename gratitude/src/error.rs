//! Error types for the gratitude journal core
//!
//! All errors use thiserror for structured error handling.
//! These errors can be serialized to the presentation layer.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Decryption failed closed: wrong key, tampered data or malformed input.
    #[error("Cannot decrypt: {0}")]
    CannotDecrypt(String),

    #[error("Encryption is enabled but no key is unlocked")]
    KeyRequired,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// True for conditions the caller may retry or work around
    /// (store busy, disk full, cache unavailable).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, AppError::Database(_) | AppError::Io(_) | AppError::Cache(_))
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
