//! Ingestion pipeline orchestration.
//!
//! Drives one document through extract → chunk → count tokens → embed →
//! persist and owns the document's status for the duration of the run:
//!
//! ```text
//! Pending ──▶ Processing ──▶ Embedded
//!                  │
//!                  └───────▶ Error
//! ```
//!
//! Reprocessing re-enters at `Processing` from any state. Prior chunks and
//! their embeddings are always deleted before new ones are written, so a
//! document never carries chunks from two different runs.
//!
//! Embedding failures are per chunk and never end the run; the chunk is
//! stored without a vector. Extraction and persistence failures end the run
//! with status `Error` and a diagnostic `status_message`. Chunk rows are
//! committed every `commit_every` chunks; the last batch is committed together
//! with the `Embedded` transition. Embedding calls happen while no write
//! transaction is open. Extraction and chunking run on tokio's blocking pool.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::chunk::Chunker;
use crate::config::Config;
use crate::db;
use crate::embedding::{resolve_strategy, Embedder, EmbeddingStrategy};
use crate::error::{ExtractionError, IngestError};
use crate::extract::{extract_file, file_type_of};
use crate::models::{Chunk, DocumentStatus};
use crate::store::{self, NewChunk};
use crate::tokens::TokenCounter;

/// Outcome of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub document_id: String,
    /// Chunks committed to the store.
    pub chunks: usize,
    /// Committed chunks that have an embedding.
    pub embedded: usize,
    /// Committed chunks stored without an embedding.
    pub failed: usize,
    pub status: DocumentStatus,
    pub message: Option<String>,
}

impl IngestReport {
    fn new(document_id: &str) -> Self {
        Self {
            document_id: document_id.to_string(),
            chunks: 0,
            embedded: 0,
            failed: 0,
            status: DocumentStatus::Processing,
            message: None,
        }
    }
}

/// The ingestion orchestrator. Cheap to clone; all collaborators are shared.
#[derive(Clone)]
pub struct Pipeline {
    pool: SqlitePool,
    chunker: Chunker,
    embedder: Embedder,
    commit_every: usize,
}

impl Pipeline {
    pub fn new(pool: SqlitePool, chunker: Chunker, embedder: Embedder, commit_every: usize) -> Self {
        Self {
            pool,
            chunker,
            embedder,
            commit_every: commit_every.max(1),
        }
    }

    /// Builds a pipeline from configuration and an already resolved
    /// embedding strategy.
    pub fn from_config(
        config: &Config,
        pool: SqlitePool,
        strategy: &EmbeddingStrategy,
    ) -> Result<Self> {
        let chunker = Chunker::from_config(TokenCounter::new()?, &config.chunking)?;
        let embedder = Embedder::from_config(&config.embedding, strategy)?;
        tracing::info!(
            max_tokens = chunker.max_tokens(),
            overlap_tokens = chunker.overlap_tokens(),
            model = embedder.provider().model_name(),
            dims = embedder.provider().dims(),
            "pipeline configured"
        );
        Ok(Self::new(pool, chunker, embedder, config.ingest.commit_every))
    }

    /// Runs the pipeline for one document. Never fails: the outcome is the
    /// document's final status, mirrored in the returned report.
    pub async fn ingest(&self, document_id: &str, file_path: &Path) -> IngestReport {
        let mut report = IngestReport::new(document_id);
        tracing::info!(document_id, path = %file_path.display(), "ingestion started");

        match self.run(document_id, file_path, &mut report).await {
            Ok(()) => {
                report.status = DocumentStatus::Embedded;
                tracing::info!(
                    document_id,
                    chunks = report.chunks,
                    embedded = report.embedded,
                    failed = report.failed,
                    "ingestion finished"
                );
            }
            Err(e) => {
                let message = e.to_string();
                tracing::error!(document_id, error = %message, "ingestion failed");
                if let Err(status_err) =
                    store::set_status(&self.pool, document_id, DocumentStatus::Error, Some(&message))
                        .await
                {
                    tracing::error!(
                        document_id,
                        error = %status_err,
                        "could not record failed ingestion"
                    );
                }
                report.status = DocumentStatus::Error;
                report.message = Some(message);
            }
        }

        report
    }

    /// Deletes the document's existing chunks and embeddings, then ingests
    /// it again from `file_path`.
    pub async fn reprocess(&self, document_id: &str, file_path: &Path) -> IngestReport {
        match store::clear_chunks(&self.pool, document_id).await {
            Ok(removed) => tracing::info!(document_id, removed, "cleared previous chunks"),
            Err(e) => {
                // ingest() retries the deletion and records the failure.
                tracing::warn!(document_id, error = %e, "could not clear previous chunks");
            }
        }
        self.ingest(document_id, file_path).await
    }

    /// Runs [`Pipeline::ingest`] on a background task.
    pub fn spawn_ingest(&self, document_id: String, file_path: PathBuf) -> JoinHandle<IngestReport> {
        let pipeline = self.clone();
        tokio::spawn(async move { pipeline.ingest(&document_id, &file_path).await })
    }

    /// Runs [`Pipeline::reprocess`] on a background task.
    pub fn spawn_reprocess(
        &self,
        document_id: String,
        file_path: PathBuf,
    ) -> JoinHandle<IngestReport> {
        let pipeline = self.clone();
        tokio::spawn(async move { pipeline.reprocess(&document_id, &file_path).await })
    }

    async fn run(
        &self,
        document_id: &str,
        file_path: &Path,
        report: &mut IngestReport,
    ) -> Result<(), IngestError> {
        let document = store::require_document(&self.pool, document_id).await?;
        store::set_status(&self.pool, document_id, DocumentStatus::Processing, None).await?;
        store::clear_chunks(&self.pool, document_id).await?;

        let segments = self.extract_and_split(file_path, &document.file_type).await?;
        tracing::debug!(document_id, segments = segments.len(), "text chunked");

        let mut batch: Vec<NewChunk> = Vec::with_capacity(self.commit_every);
        for (index, (text, token_count)) in segments.into_iter().enumerate() {
            let chunk_number = index as i64 + 1;
            let token_count = token_count as i64;

            let embedding = match self.embedder.embed(&text).await {
                Ok(Some(embedding)) => Some(embedding),
                Ok(None) => {
                    tracing::warn!(document_id, chunk_number, "chunk produced no embedding");
                    None
                }
                Err(e) => {
                    tracing::warn!(document_id, chunk_number, error = %e, "embedding failed; storing chunk without vector");
                    None
                }
            };

            batch.push(NewChunk {
                chunk: Chunk {
                    id: Uuid::new_v4().to_string(),
                    file_id: document_id.to_string(),
                    chunk_number,
                    text,
                    token_count,
                    created_at: store::now_ts(),
                },
                embedding,
            });

            if batch.len() >= self.commit_every {
                store::insert_chunks(&self.pool, &batch).await?;
                tally(report, &batch);
                tracing::debug!(document_id, committed = report.chunks, "chunk batch committed");
                batch.clear();
            }
        }

        store::insert_chunks_and_finish(&self.pool, document_id, &batch).await?;
        tally(report, &batch);
        Ok(())
    }

    /// Runs extraction, chunking and token counting on the blocking pool.
    /// Returns each segment with its token count.
    async fn extract_and_split(
        &self,
        file_path: &Path,
        file_type: &str,
    ) -> Result<Vec<(String, usize)>, IngestError> {
        let path = file_path.to_path_buf();
        let declared = Some(file_type.to_string()).filter(|t| !t.is_empty());
        let chunker = self.chunker.clone();

        let segments = tokio::task::spawn_blocking(move || -> Result<_, ExtractionError> {
            let text = extract_file(&path, declared.as_deref())?;
            tracing::debug!(chars = text.chars().count(), "text extracted");
            Ok(chunker
                .split(&text)
                .into_iter()
                .map(|segment| {
                    let tokens = chunker.counter().count(&segment);
                    (segment, tokens)
                })
                .collect::<Vec<_>>())
        })
        .await??;
        Ok(segments)
    }
}

/// `docvault ingest <path>`: registers a local file as a new document and
/// ingests it synchronously.
pub async fn run_ingest(config: &Config, path: &Path) -> Result<()> {
    let path = path
        .canonicalize()
        .with_context(|| format!("File not found: {}", path.display()))?;
    let metadata = std::fs::metadata(&path)?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let pool = db::connect(config).await?;
    let strategy = resolve_strategy(&config.embedding)?;
    let pipeline = Pipeline::from_config(config, pool.clone(), &strategy)?;

    let doc = store::create_document(
        &pool,
        &filename,
        &path.to_string_lossy(),
        &file_type_of(&path),
        metadata.len() as i64,
        None,
    )
    .await?;

    let report = pipeline.ingest(&doc.id, &path).await;
    println!("ingest {}", path.display());
    print_report(&report);
    pool.close().await;

    finish(report)
}

/// `docvault reprocess <id>`: re-runs the pipeline for a stored document.
pub async fn run_reprocess(config: &Config, document_id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let doc = store::get_document(&pool, document_id)
        .await?
        .with_context(|| format!("document not found: {}", document_id))?;

    let strategy = resolve_strategy(&config.embedding)?;
    let pipeline = Pipeline::from_config(config, pool.clone(), &strategy)?;

    let report = pipeline
        .reprocess(&doc.id, Path::new(&doc.file_path))
        .await;
    println!("reprocess {}", doc.filename);
    print_report(&report);
    pool.close().await;

    finish(report)
}

fn print_report(report: &IngestReport) {
    println!("  document: {}", report.document_id);
    println!("  status: {}", report.status);
    println!("  chunks: {}", report.chunks);
    println!("  embedded: {}", report.embedded);
    println!("  without embedding: {}", report.failed);
    if let Some(message) = &report.message {
        println!("  message: {}", message);
    }
}

fn finish(report: IngestReport) -> Result<()> {
    if report.status == DocumentStatus::Error {
        bail!(
            "ingestion failed: {}",
            report.message.unwrap_or_else(|| "unknown error".to_string())
        );
    }
    println!("ok");
    Ok(())
}

fn tally(report: &mut IngestReport, batch: &[NewChunk]) {
    let embedded = batch.iter().filter(|row| row.embedding.is_some()).count();
    report.chunks += batch.len();
    report.embedded += embedded;
    report.failed += batch.len() - embedded;
}
