//! Core data models used throughout docvault.
//!
//! These types mirror the rows stored in SQLite: uploaded documents (the
//! `files` table), their chunks, one optional embedding per chunk, and the
//! users who own them.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a document.
///
/// The ingestion pipeline drives `Pending → Processing → {Embedded | Error}`.
/// `Stored` is a valid persisted value that the pipeline never produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DocumentStatus {
    Pending,
    Processing,
    Embedded,
    Stored,
    Error,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "Pending",
            DocumentStatus::Processing => "Processing",
            DocumentStatus::Embedded => "Embedded",
            DocumentStatus::Stored => "Stored",
            DocumentStatus::Error => "Error",
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(DocumentStatus::Pending),
            "Processing" => Ok(DocumentStatus::Processing),
            "Embedded" => Ok(DocumentStatus::Embedded),
            "Stored" => Ok(DocumentStatus::Stored),
            "Error" => Ok(DocumentStatus::Error),
            other => Err(format!("unknown document status: {}", other)),
        }
    }
}

/// An uploaded document.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub file_path: String,
    /// Extension without the leading dot (`"pdf"`, `"txt"`, `"docx"`).
    pub file_type: String,
    pub file_size: i64,
    pub status: DocumentStatus,
    /// Diagnostic message from the last failed run, if any.
    pub status_message: Option<String>,
    pub user_id: Option<String>,
    pub upload_date: i64,
}

/// A bounded-length segment of a document's text.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub file_id: String,
    /// 1-based, contiguous within a document.
    pub chunk_number: i64,
    pub text: String,
    pub token_count: i64,
    pub created_at: i64,
}

/// Embedding metadata for a chunk. The vector itself is only loaded on demand.
#[derive(Debug, Clone)]
pub struct EmbeddingInfo {
    pub id: String,
    pub chunk_id: String,
    pub embedding_model: String,
    pub dims: i64,
    pub created_at: i64,
}

/// An account that can upload and manage documents.
#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub email: String,
    pub hashed_password: String,
    pub full_name: Option<String>,
    pub is_active: bool,
    pub is_admin: bool,
    pub created_at: i64,
}

/// Formats a unix timestamp as ISO-8601 UTC.
pub fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
