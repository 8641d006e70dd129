//! Error kinds produced by the ingestion stages.
//!
//! Each stage returns its own typed error. The pipeline folds them into
//! [`IngestError`] and turns that into a single status transition on the
//! document; none of these escape to callers of `ingest`.

use thiserror::Error;

/// The source file could not be converted to text. Terminal for a run.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("DOCX extraction failed: {0}")]
    Docx(String),
}

/// Embedding computation failed for one chunk. Never terminal for a run.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    Request(String),

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("embedding has {actual} dimensions, expected {expected}")]
    Dimensions { expected: usize, actual: usize },
}

/// The store rejected a read or write. Terminal for a run.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Everything that can end an ingestion run early.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("extraction task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<sqlx::Error> for IngestError {
    fn from(err: sqlx::Error) -> Self {
        IngestError::Persistence(PersistenceError::Database(err))
    }
}

/// A bearer token or password check failed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("malformed token")]
    Malformed,

    #[error("invalid token signature")]
    BadSignature,

    #[error("token expired")]
    Expired,

    #[error("malformed password hash")]
    BadHash,
}
