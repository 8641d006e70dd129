//! End-to-end pipeline runs against a real SQLite file.

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use docvault::chunk::Chunker;
use docvault::config::Config;
use docvault::db;
use docvault::embedding::{
    deterministic_vector, DeterministicProvider, Embedder, EmbeddingProvider, EmbeddingVector,
    DETERMINISTIC_MODEL,
};
use docvault::error::EmbeddingError;
use docvault::extract::extract_file;
use docvault::ingest::Pipeline;
use docvault::migrate::apply_schema;
use docvault::models::DocumentStatus;
use docvault::store;
use docvault::tokens::TokenCounter;

async fn setup() -> (TempDir, SqlitePool) {
    let tmp = TempDir::new().unwrap();
    let config = Config::default_for(tmp.path());
    let pool = db::connect(&config).await.unwrap();
    apply_schema(&pool).await.unwrap();
    (tmp, pool)
}

fn pipeline_with(
    pool: &SqlitePool,
    provider: Arc<dyn EmbeddingProvider>,
    max_tokens: usize,
    overlap_tokens: usize,
    commit_every: usize,
) -> Pipeline {
    let chunker = Chunker::new(TokenCounter::new().unwrap(), max_tokens, overlap_tokens).unwrap();
    let embedder = Embedder::new(provider, 8000);
    Pipeline::new(pool.clone(), chunker, embedder, commit_every)
}

fn mock_pipeline(pool: &SqlitePool) -> Pipeline {
    pipeline_with(pool, Arc::new(DeterministicProvider::new(1536)), 512, 50, 10)
}

async fn register(pool: &SqlitePool, path: &Path) -> String {
    let file_type = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let size = std::fs::metadata(path).map(|m| m.len() as i64).unwrap_or(0);
    let name = path.file_name().unwrap().to_string_lossy().to_string();
    store::create_document(pool, &name, &path.to_string_lossy(), &file_type, size, None)
        .await
        .unwrap()
        .id
}

fn write_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

/// Fails for any text containing `needle`; deterministic otherwise.
struct FailOn {
    needle: &'static str,
    calls: AtomicUsize,
}

#[async_trait]
impl EmbeddingProvider for FailOn {
    fn model_name(&self) -> &str {
        DETERMINISTIC_MODEL
    }
    fn dims(&self) -> usize {
        1536
    }
    async fn embed(&self, text: &str) -> Result<EmbeddingVector, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text.contains(self.needle) {
            return Err(EmbeddingError::Request("simulated outage".to_string()));
        }
        Ok(EmbeddingVector {
            vector: deterministic_vector(text, 1536),
            model: DETERMINISTIC_MODEL.to_string(),
        })
    }
}

fn paragraph(word: &str, n: usize) -> String {
    vec![word; n].join(" ")
}

/// Rebuilds a word sequence from overlapping chunks.
fn reconstruct(chunks: &[String]) -> Vec<String> {
    let mut words: Vec<String> = Vec::new();
    for chunk in chunks {
        let next: Vec<String> = chunk.split_whitespace().map(str::to_string).collect();
        let max_k = next.len().min(words.len());
        let k = (0..=max_k)
            .rev()
            .find(|&k| words[words.len() - k..] == next[..k])
            .unwrap_or(0);
        words.extend(next.into_iter().skip(k));
    }
    words
}

#[tokio::test]
async fn test_hello_world_is_embedded() {
    let (tmp, pool) = setup().await;
    let path = write_file(tmp.path(), "a.txt", b"hello world");
    let id = register(&pool, &path).await;

    let report = mock_pipeline(&pool).ingest(&id, &path).await;
    assert_eq!(report.status, DocumentStatus::Embedded);
    assert_eq!(report.chunks, 1);
    assert_eq!(report.embedded, 1);
    assert_eq!(report.failed, 0);

    let doc = store::require_document(&pool, &id).await.unwrap();
    assert_eq!(doc.status, DocumentStatus::Embedded);
    assert!(doc.status_message.is_none());

    let chunks = store::list_chunks_for_file(&pool, &id).await.unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].chunk.chunk_number, 1);
    assert_eq!(chunks[0].chunk.text, "hello world");
    assert_eq!(chunks[0].chunk.token_count, 2);

    let info = chunks[0].embedding.as_ref().unwrap();
    assert_eq!(info.dims, 1536);
    assert_eq!(info.embedding_model, DETERMINISTIC_MODEL);

    let vector = store::get_embedding_vector(&pool, &chunks[0].chunk.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(vector.len(), 1536);
    let norm: f64 = vector.iter().map(|&x| (x as f64).powi(2)).sum::<f64>().sqrt();
    assert!((norm - 1.0).abs() < 1e-5);
}

#[tokio::test]
async fn test_unsupported_type_ends_in_error_without_chunks() {
    let (tmp, pool) = setup().await;
    let path = write_file(tmp.path(), "b.xyz", b"some content");
    let id = register(&pool, &path).await;

    let report = mock_pipeline(&pool).ingest(&id, &path).await;
    assert_eq!(report.status, DocumentStatus::Error);
    assert_eq!(report.chunks, 0);

    let doc = store::require_document(&pool, &id).await.unwrap();
    assert_eq!(doc.status, DocumentStatus::Error);
    assert!(doc
        .status_message
        .unwrap()
        .contains("unsupported file type"));
    assert_eq!(store::count_chunks(&pool, &id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_missing_file_ends_in_error() {
    let (tmp, pool) = setup().await;
    let path = tmp.path().join("gone.txt");
    let id = store::create_document(&pool, "gone.txt", &path.to_string_lossy(), "txt", 0, None)
        .await
        .unwrap()
        .id;

    let report = mock_pipeline(&pool).ingest(&id, &path).await;
    assert_eq!(report.status, DocumentStatus::Error);
    assert!(report.message.unwrap().contains("failed to read"));
}

#[tokio::test]
async fn test_empty_file_is_embedded_with_no_chunks() {
    let (tmp, pool) = setup().await;
    let path = write_file(tmp.path(), "empty.txt", b"  \n\n ");
    let id = register(&pool, &path).await;

    let report = mock_pipeline(&pool).ingest(&id, &path).await;
    assert_eq!(report.status, DocumentStatus::Embedded);
    assert_eq!(report.chunks, 0);
}

#[tokio::test]
async fn test_embedding_failure_on_one_chunk_is_not_fatal() {
    let (tmp, pool) = setup().await;
    let text = format!(
        "{}\n\n{}\n\n{}",
        paragraph("red", 15),
        paragraph("green", 15),
        paragraph("blue", 15)
    );
    let path = write_file(tmp.path(), "colors.txt", text.as_bytes());
    let id = register(&pool, &path).await;

    let provider = Arc::new(FailOn {
        needle: "green",
        calls: AtomicUsize::new(0),
    });
    let pipeline = pipeline_with(&pool, provider.clone(), 20, 0, 10);

    let report = pipeline.ingest(&id, &path).await;
    assert_eq!(report.status, DocumentStatus::Embedded);
    assert_eq!(report.chunks, 3);
    assert_eq!(report.embedded, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 3);

    let chunks = store::list_chunks_for_file(&pool, &id).await.unwrap();
    let numbers: Vec<i64> = chunks.iter().map(|c| c.chunk.chunk_number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert!(chunks[0].embedding.is_some());
    assert!(chunks[1].embedding.is_none());
    assert!(chunks[1].chunk.text.contains("green"));
    assert!(chunks[2].embedding.is_some());
}

#[tokio::test]
async fn test_numbering_is_contiguous_across_batches() {
    let (tmp, pool) = setup().await;
    let text = (1..=400)
        .map(|i| format!("word{}", i))
        .collect::<Vec<_>>()
        .join(" ");
    let path = write_file(tmp.path(), "long.txt", text.as_bytes());
    let id = register(&pool, &path).await;

    // Small budget and commit_every = 3 force several intermediate commits.
    let pipeline = pipeline_with(&pool, Arc::new(DeterministicProvider::new(1536)), 30, 5, 3);
    let report = pipeline.ingest(&id, &path).await;
    assert_eq!(report.status, DocumentStatus::Embedded);
    assert!(report.chunks > 6);

    let chunks = store::list_chunks_for_file(&pool, &id).await.unwrap();
    assert_eq!(chunks.len(), report.chunks);
    for (i, c) in chunks.iter().enumerate() {
        assert_eq!(c.chunk.chunk_number, i as i64 + 1);
        assert!(c.chunk.token_count <= 30);
        assert!(c.embedding.is_some());
    }
}

#[tokio::test]
async fn test_reprocess_replaces_chunks_and_leaves_no_orphans() {
    let (tmp, pool) = setup().await;
    let first = (1..=300)
        .map(|i| format!("first{}", i))
        .collect::<Vec<_>>()
        .join(" ");
    let path = write_file(tmp.path(), "doc.txt", first.as_bytes());
    let id = register(&pool, &path).await;

    let pipeline = pipeline_with(&pool, Arc::new(DeterministicProvider::new(1536)), 40, 5, 10);
    let report = pipeline.ingest(&id, &path).await;
    assert_eq!(report.status, DocumentStatus::Embedded);
    let old_ids: Vec<String> = store::list_chunks_for_file(&pool, &id)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.chunk.id)
        .collect();
    assert!(old_ids.len() > 1);

    std::fs::write(&path, "a much shorter second version").unwrap();
    let report = pipeline.reprocess(&id, &path).await;
    assert_eq!(report.status, DocumentStatus::Embedded);
    assert_eq!(report.chunks, 1);

    let chunks = store::list_chunks_for_file(&pool, &id).await.unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].chunk.chunk_number, 1);
    assert!(!old_ids.contains(&chunks[0].chunk.id));

    let orphans: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM embeddings WHERE chunk_id NOT IN (SELECT id FROM chunks)",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(orphans, 0);
    assert_eq!(store::count_embeddings(&pool, &id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_reprocess_after_error_recovers() {
    let (tmp, pool) = setup().await;
    let path = tmp.path().join("late.txt");
    let id = store::create_document(&pool, "late.txt", &path.to_string_lossy(), "txt", 0, None)
        .await
        .unwrap()
        .id;
    let pipeline = mock_pipeline(&pool);

    assert_eq!(
        pipeline.ingest(&id, &path).await.status,
        DocumentStatus::Error
    );

    std::fs::write(&path, "now it exists").unwrap();
    let report = pipeline.reprocess(&id, &path).await;
    assert_eq!(report.status, DocumentStatus::Embedded);
    let doc = store::require_document(&pool, &id).await.unwrap();
    assert_eq!(doc.status, DocumentStatus::Embedded);
    assert!(doc.status_message.is_none());
}

#[tokio::test]
async fn test_unknown_document_reports_error() {
    let (tmp, pool) = setup().await;
    let path = write_file(tmp.path(), "a.txt", b"hello world");
    let report = mock_pipeline(&pool).ingest("no-such-id", &path).await;
    assert_eq!(report.status, DocumentStatus::Error);
    assert!(report.message.unwrap().contains("document not found"));
}

#[tokio::test]
async fn test_spawned_ingest_completes() {
    let (tmp, pool) = setup().await;
    let path = write_file(tmp.path(), "bg.txt", b"background work");
    let id = register(&pool, &path).await;

    let report = mock_pipeline(&pool)
        .spawn_ingest(id.clone(), path)
        .await
        .unwrap();
    assert_eq!(report.status, DocumentStatus::Embedded);
    assert_eq!(
        store::require_document(&pool, &id).await.unwrap().status,
        DocumentStatus::Embedded
    );
}

fn docx_with_paragraphs(paragraphs: &[String]) -> Vec<u8> {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
        .collect();
    let xml = format!(
        "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
        body
    );
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

#[tokio::test]
async fn test_docx_extract_chunk_reconstruct() {
    let (tmp, pool) = setup().await;
    let mut n = 0;
    let paragraphs: Vec<String> = (0..12)
        .map(|_| {
            (0..25)
                .map(|_| {
                    n += 1;
                    format!("p{}", n)
                })
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect();
    let path = write_file(tmp.path(), "report.docx", &docx_with_paragraphs(&paragraphs));

    let text = extract_file(&path, None).unwrap();
    assert_eq!(text, paragraphs.join("\n"));

    let chunker = Chunker::new(TokenCounter::new().unwrap(), 60, 10).unwrap();
    let chunks = chunker.split(&text);
    assert!(chunks.len() > 1);
    let original: Vec<String> = text.split_whitespace().map(str::to_string).collect();
    assert_eq!(reconstruct(&chunks), original);

    let id = register(&pool, &path).await;
    let pipeline = pipeline_with(&pool, Arc::new(DeterministicProvider::new(1536)), 60, 10, 10);
    let report = pipeline.ingest(&id, &path).await;
    assert_eq!(report.status, DocumentStatus::Embedded);
    assert_eq!(report.chunks, chunks.len());

    let stored: Vec<String> = store::list_chunks_for_file(&pool, &id)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.chunk.text)
        .collect();
    assert_eq!(stored, chunks);
}

/// Hand-built PDF, one page per entry; an empty entry is a page with no text.
fn pdf_with_pages(pages: &[String]) -> Vec<u8> {
    let mut objects: Vec<String> = vec![
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            (0..pages.len())
                .map(|i| format!("{} 0 R", 4 + 2 * i))
                .collect::<Vec<_>>()
                .join(" "),
            pages.len()
        ),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
    ];
    for (i, text) in pages.iter().enumerate() {
        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents {} 0 R /Resources << /Font << /F1 3 0 R >> >> >>",
            5 + 2 * i
        ));
        let content = if text.is_empty() {
            "q Q".to_string()
        } else {
            format!("BT /F1 12 Tf 50 700 Td ({}) Tj ET", text)
        };
        objects.push(format!(
            "<< /Length {} >>\nstream\n{}\nendstream",
            content.len(),
            content
        ));
    }

    let mut out = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::new();
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj {} endobj\n", i + 1, body).as_bytes());
    }
    let xref_start = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n{:010} 65535 f \n", objects.len() + 1, 0).as_bytes());
    for offset in offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer << /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref_start
        )
        .as_bytes(),
    );
    out
}

#[tokio::test]
async fn test_pdf_extract_chunk_reconstruct() {
    let (tmp, pool) = setup().await;
    let mut n = 0;
    let mut pages: Vec<String> = (0..4)
        .map(|_| {
            (0..20)
                .map(|_| {
                    n += 1;
                    format!("w{}", n)
                })
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect();
    pages.insert(2, String::new());
    let path = write_file(tmp.path(), "scan.pdf", &pdf_with_pages(&pages));

    let expected: Vec<String> = (1..=80).map(|i| format!("w{}", i)).collect();
    let text = extract_file(&path, None).unwrap();
    let extracted: Vec<String> = text.split_whitespace().map(str::to_string).collect();
    assert_eq!(extracted, expected);

    let id = register(&pool, &path).await;
    let pipeline = pipeline_with(&pool, Arc::new(DeterministicProvider::new(1536)), 30, 5, 2);
    let report = pipeline.ingest(&id, &path).await;
    assert_eq!(report.status, DocumentStatus::Embedded);
    assert!(report.chunks > 1);

    let stored: Vec<String> = store::list_chunks_for_file(&pool, &id)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.chunk.text)
        .collect();
    assert_eq!(reconstruct(&stored), expected);
}

#[tokio::test]
async fn test_database_failure_mid_run_keeps_committed_batches() {
    let (tmp, pool) = setup().await;
    let text = (1..=400)
        .map(|i| format!("word{}", i))
        .collect::<Vec<_>>()
        .join(" ");
    let path = write_file(tmp.path(), "long.txt", text.as_bytes());
    let id = register(&pool, &path).await;

    sqlx::query(
        "CREATE TRIGGER fail_fifth_chunk BEFORE INSERT ON chunks \
         WHEN NEW.chunk_number = 5 \
         BEGIN SELECT RAISE(ABORT, 'disk says no'); END",
    )
    .execute(&pool)
    .await
    .unwrap();

    let pipeline = pipeline_with(&pool, Arc::new(DeterministicProvider::new(1536)), 30, 5, 2);
    let report = pipeline.ingest(&id, &path).await;
    assert_eq!(report.status, DocumentStatus::Error);
    assert_eq!(report.chunks, 4);

    let doc = store::require_document(&pool, &id).await.unwrap();
    assert_eq!(doc.status, DocumentStatus::Error);
    let message = doc.status_message.unwrap();
    assert!(message.contains("database error"), "{}", message);
    assert!(message.contains("disk says no"), "{}", message);

    let chunks = store::list_chunks_for_file(&pool, &id).await.unwrap();
    let numbers: Vec<i64> = chunks.iter().map(|c| c.chunk.chunk_number).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4]);
    assert!(chunks.iter().all(|c| c.embedding.is_some()));
}

#[tokio::test]
async fn test_pipeline_from_config() {
    let (tmp, pool) = setup().await;
    let mut config = Config::default_for(tmp.path());
    config.chunking.max_tokens = 64;
    config.chunking.overlap_tokens = 8;

    let pipeline = Pipeline::from_config(
        &config,
        pool.clone(),
        &docvault::embedding::EmbeddingStrategy::Deterministic,
    )
    .unwrap();

    let path = write_file(tmp.path(), "cfg.txt", b"configured from toml");
    let id = register(&pool, &path).await;
    let report = pipeline.ingest(&id, &path).await;
    assert_eq!(report.status, DocumentStatus::Embedded);
    let chunks = store::list_chunks_for_file(&pool, &id).await.unwrap();
    assert_eq!(
        chunks[0].embedding.as_ref().unwrap().embedding_model,
        DETERMINISTIC_MODEL
    );
}
