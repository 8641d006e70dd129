//! Documents: upload, listing, processing, and chunk inspection.

use axum::{
    extract::{Multipart, Path, Query, State},
    Json,
};
use serde::Serialize;
use std::path::PathBuf;

use super::error::{bad_request, forbidden, internal, not_found, ApiError};
use super::users::{AdminUser, CurrentUser, MessageResponse, Paging};
use super::AppState;
use crate::extract::{file_type_of, FileKind};
use crate::models::{format_ts_iso, Document, DocumentStatus, User};
use crate::store::{self, StoredChunk};

#[derive(Debug, Serialize)]
pub struct FileResponse {
    pub id: String,
    pub filename: String,
    pub file_type: String,
    pub file_size: i64,
    pub status: DocumentStatus,
    pub status_message: Option<String>,
    pub upload_date: String,
    pub total_chunks: i64,
}

impl FileResponse {
    fn new(doc: &Document, total_chunks: i64) -> Self {
        Self {
            id: doc.id.clone(),
            filename: doc.filename.clone(),
            file_type: doc.file_type.clone(),
            file_size: doc.file_size,
            status: doc.status,
            status_message: doc.status_message.clone(),
            upload_date: format_ts_iso(doc.upload_date),
            total_chunks,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChunkResponse {
    pub id: String,
    pub file_id: String,
    pub chunk_number: i64,
    pub text: String,
    pub token_count: i64,
    pub created_at: String,
}

impl From<&StoredChunk> for ChunkResponse {
    fn from(stored: &StoredChunk) -> Self {
        let c = &stored.chunk;
        Self {
            id: c.id.clone(),
            file_id: c.file_id.clone(),
            chunk_number: c.chunk_number,
            text: c.text.clone(),
            token_count: c.token_count,
            created_at: format_ts_iso(c.created_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChunkWithEmbedding {
    #[serde(flatten)]
    pub chunk: ChunkResponse,
    pub embedding_id: Option<String>,
    pub embedding_model: Option<String>,
}

impl From<&StoredChunk> for ChunkWithEmbedding {
    fn from(stored: &StoredChunk) -> Self {
        Self {
            chunk: ChunkResponse::from(stored),
            embedding_id: stored.embedding.as_ref().map(|e| e.id.clone()),
            embedding_model: stored.embedding.as_ref().map(|e| e.embedding_model.clone()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FileDetailResponse {
    #[serde(flatten)]
    pub file: FileResponse,
    pub chunks: Vec<ChunkResponse>,
}

#[derive(Debug, Serialize)]
pub struct ProcessingResponse {
    pub id: String,
    pub filename: String,
    pub status: DocumentStatus,
    pub message: String,
}

/// Loads a document owned by `user`. Other users' documents are reported as
/// missing.
async fn owned_document(state: &AppState, id: &str, user: &User) -> Result<Document, ApiError> {
    match store::get_document(&state.pool, id).await? {
        Some(doc) if doc.user_id.as_deref() == Some(user.id.as_str()) => Ok(doc),
        _ => Err(not_found("File not found")),
    }
}

/// Loads a document readable by `user`: its owner or any admin.
async fn readable_document(state: &AppState, id: &str, user: &User) -> Result<Document, ApiError> {
    let doc = store::get_document(&state.pool, id)
        .await?
        .ok_or_else(|| not_found("File not found"))?;
    if !user.is_admin && doc.user_id.as_deref() != Some(user.id.as_str()) {
        return Err(forbidden("Not authorized to access this file"));
    }
    Ok(doc)
}

async fn require_on_disk(doc: &Document) -> Result<(), ApiError> {
    match tokio::fs::try_exists(&doc.file_path).await {
        Ok(true) => Ok(()),
        _ => Err(not_found("File not found on disk")),
    }
}

/// Keeps only the final path component of a client-supplied file name.
fn sanitize_filename(raw: &str) -> Option<String> {
    let name = raw.rsplit(['/', '\\']).next()?.trim();
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(name.to_string())
}

/// Writes `data` to `{timestamp}_{filename}` under `dir`, never replacing an
/// existing file. On a name collision an 8-character random suffix is
/// inserted after the timestamp and the write is retried.
async fn store_upload(dir: &std::path::Path, filename: &str, data: &[u8]) -> std::io::Result<PathBuf> {
    use tokio::io::AsyncWriteExt;

    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
    let mut candidate = dir.join(format!("{}_{}", timestamp, filename));
    let mut attempts = 0;
    loop {
        let opened = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await;
        match opened {
            Ok(mut file) => {
                file.write_all(data).await?;
                file.flush().await?;
                return Ok(candidate);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && attempts < 8 => {
                attempts += 1;
                let suffix = &uuid::Uuid::new_v4().simple().to_string()[..8];
                candidate = dir.join(format!("{}_{}_{}", timestamp, suffix, filename));
            }
            Err(e) => return Err(e),
        }
    }
}

// ============ /upload ============

/// `POST /upload`: stores the multipart `file` field, registers it as
/// `Pending` and starts ingestion in the background.
pub async fn upload(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    mut multipart: Multipart,
) -> Result<Json<FileResponse>, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| bad_request(format!("failed to read upload: {}", e)))?;
        upload = Some((name, data));
        break;
    }

    let (raw_name, data) = upload.ok_or_else(|| bad_request("missing multipart field 'file'"))?;
    let filename = sanitize_filename(&raw_name).ok_or_else(|| bad_request("missing file name"))?;
    let file_type = file_type_of(std::path::Path::new(&filename));
    if FileKind::from_extension(&file_type).is_none() {
        return Err(bad_request(
            "File type not allowed. Allowed types: PDF, TXT, DOCX",
        ));
    }

    let upload_dir = &state.config.storage.upload_dir;
    tokio::fs::create_dir_all(upload_dir)
        .await
        .map_err(|e| internal(format!("failed to create upload directory: {}", e)))?;

    let stored_path = store_upload(upload_dir, &filename, &data)
        .await
        .map_err(|e| internal(format!("failed to store upload: {}", e)))?;

    let doc = store::create_document(
        &state.pool,
        &filename,
        &stored_path.to_string_lossy(),
        &file_type,
        data.len() as i64,
        Some(&user.id),
    )
    .await?;
    tracing::info!(document_id = %doc.id, filename = %doc.filename, size = doc.file_size, "file uploaded");

    state
        .pipeline
        .spawn_ingest(doc.id.clone(), stored_path);

    Ok(Json(FileResponse::new(&doc, 0)))
}

/// `GET /upload/{id}/status`.
pub async fn upload_status(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<FileResponse>, ApiError> {
    let doc = owned_document(&state, &id, &user).await?;
    let total = store::count_chunks(&state.pool, &doc.id).await?;
    Ok(Json(FileResponse::new(&doc, total)))
}

// ============ /files ============

pub async fn list_files(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<FileResponse>>, ApiError> {
    let docs = store::list_documents(&state.pool, Some(&user.id)).await?;
    let mut out = Vec::with_capacity(docs.len());
    for doc in &docs {
        let total = store::count_chunks(&state.pool, &doc.id).await?;
        out.push(FileResponse::new(doc, total));
    }
    Ok(Json(out))
}

pub async fn file_detail(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<FileDetailResponse>, ApiError> {
    let doc = owned_document(&state, &id, &user).await?;
    let chunks = store::list_chunks_for_file(&state.pool, &doc.id).await?;
    Ok(Json(FileDetailResponse {
        file: FileResponse::new(&doc, chunks.len() as i64),
        chunks: chunks.iter().map(ChunkResponse::from).collect(),
    }))
}

/// `DELETE /files/{id}`: removes embeddings, chunks and the record, then the
/// stored file. A file already gone from disk is not an error.
pub async fn delete_file(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let doc = owned_document(&state, &id, &user).await?;
    store::delete_document(&state.pool, &doc.id).await?;

    if let Err(e) = tokio::fs::remove_file(&doc.file_path).await {
        tracing::warn!(document_id = %doc.id, path = %doc.file_path, error = %e, "could not remove stored file");
    }
    tracing::info!(document_id = %doc.id, "file deleted");

    Ok(Json(MessageResponse {
        message: "File deleted successfully".to_string(),
    }))
}

/// `POST /files/{id}/reprocess`: resets the status to `Pending` and
/// reprocesses in the background.
pub async fn reprocess_file(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<FileResponse>, ApiError> {
    let mut doc = owned_document(&state, &id, &user).await?;
    store::set_status(&state.pool, &doc.id, DocumentStatus::Pending, None).await?;
    doc.status = DocumentStatus::Pending;
    doc.status_message = None;

    let total = store::count_chunks(&state.pool, &doc.id).await?;
    state
        .pipeline
        .spawn_reprocess(doc.id.clone(), PathBuf::from(&doc.file_path));

    Ok(Json(FileResponse::new(&doc, total)))
}

// ============ /process ============

pub async fn process_file(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<ProcessingResponse>, ApiError> {
    let doc = owned_document(&state, &id, &user).await?;
    require_on_disk(&doc).await?;

    store::set_status(&state.pool, &doc.id, DocumentStatus::Processing, None).await?;
    state
        .pipeline
        .spawn_ingest(doc.id.clone(), PathBuf::from(&doc.file_path));

    Ok(Json(ProcessingResponse {
        id: doc.id,
        filename: doc.filename,
        status: DocumentStatus::Processing,
        message: "File processing started in the background".to_string(),
    }))
}

/// `POST /process/{id}/sync`: runs ingestion inline and reports the outcome.
pub async fn process_file_sync(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<ProcessingResponse>, ApiError> {
    let doc = owned_document(&state, &id, &user).await?;
    require_on_disk(&doc).await?;

    let report = state
        .pipeline
        .ingest(&doc.id, std::path::Path::new(&doc.file_path))
        .await;

    let message = match report.status {
        DocumentStatus::Embedded => format!(
            "File processed successfully: {} chunks created, {} with embeddings",
            report.chunks, report.embedded
        ),
        _ => report
            .message
            .clone()
            .unwrap_or_else(|| "File processing failed".to_string()),
    };

    Ok(Json(ProcessingResponse {
        id: doc.id,
        filename: doc.filename,
        status: report.status,
        message,
    }))
}

// ============ /chunks ============

/// `GET /chunks?skip=&limit=` (admin).
pub async fn list_all_chunks(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Query(paging): Query<Paging>,
) -> Result<Json<Vec<ChunkWithEmbedding>>, ApiError> {
    let (skip, limit) = paging.resolve();
    let chunks = store::list_chunks(&state.pool, skip, limit).await?;
    Ok(Json(chunks.iter().map(ChunkWithEmbedding::from).collect()))
}

pub async fn get_chunk(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<ChunkWithEmbedding>, ApiError> {
    let stored = store::get_chunk(&state.pool, &id)
        .await?
        .ok_or_else(|| not_found("Chunk not found"))?;

    if !user.is_admin {
        let doc = store::get_document(&state.pool, &stored.chunk.file_id).await?;
        let owns = doc.and_then(|d| d.user_id).as_deref() == Some(user.id.as_str());
        if !owns {
            return Err(forbidden("Not authorized to access this chunk"));
        }
    }

    Ok(Json(ChunkWithEmbedding::from(&stored)))
}

pub async fn file_chunks(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(file_id): Path<String>,
) -> Result<Json<Vec<ChunkResponse>>, ApiError> {
    let doc = readable_document(&state, &file_id, &user).await?;
    let chunks = store::list_chunks_for_file(&state.pool, &doc.id).await?;
    Ok(Json(chunks.iter().map(ChunkResponse::from).collect()))
}
