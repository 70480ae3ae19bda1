//! Error types for renderq.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid job status: {0}")]
    InvalidStatus(String),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// A job failed while running. The display form is what gets persisted.
    #[error("{phase}: {message}")]
    Processing {
        phase: &'static str,
        message: String,
    },

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub(crate) fn processing(phase: &'static str, message: impl std::fmt::Display) -> Self {
        Self::Processing {
            phase,
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
