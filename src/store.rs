//! SQLite persistence for documents, chunks, embeddings, and users.
//!
//! Every function takes the pool explicitly and maps driver failures into
//! [`PersistenceError`]. Multi-table writes (chunk replacement, document
//! deletion, batch inserts) run inside a single `sqlx` transaction that rolls
//! back when dropped without a commit.

use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::embedding::{blob_to_vec, vec_to_blob, EmbeddingVector};
use crate::error::PersistenceError;
use crate::models::{Chunk, Document, DocumentStatus, EmbeddingInfo, User};

type Result<T> = std::result::Result<T, PersistenceError>;

pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

/// A chunk waiting to be written, with its embedding when one was computed.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub chunk: Chunk,
    pub embedding: Option<EmbeddingVector>,
}

/// A stored chunk joined with the metadata of its embedding, if any.
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub chunk: Chunk,
    pub embedding: Option<EmbeddingInfo>,
}

// ============ Documents ============

const DOCUMENT_COLUMNS: &str =
    "id, filename, file_path, file_type, file_size, status, status_message, user_id, upload_date";

fn document_from_row(row: &SqliteRow) -> Result<Document> {
    let status: String = row.get("status");
    let status = status
        .parse::<DocumentStatus>()
        .map_err(PersistenceError::Corrupt)?;
    Ok(Document {
        id: row.get("id"),
        filename: row.get("filename"),
        file_path: row.get("file_path"),
        file_type: row.get("file_type"),
        file_size: row.get("file_size"),
        status,
        status_message: row.get("status_message"),
        user_id: row.get("user_id"),
        upload_date: row.get("upload_date"),
    })
}

/// Registers a new document in `Pending` state.
pub async fn create_document(
    pool: &SqlitePool,
    filename: &str,
    file_path: &str,
    file_type: &str,
    file_size: i64,
    user_id: Option<&str>,
) -> Result<Document> {
    let doc = Document {
        id: Uuid::new_v4().to_string(),
        filename: filename.to_string(),
        file_path: file_path.to_string(),
        file_type: file_type.to_string(),
        file_size,
        status: DocumentStatus::Pending,
        status_message: None,
        user_id: user_id.map(str::to_string),
        upload_date: now_ts(),
    };

    sqlx::query(
        r#"
        INSERT INTO files (id, filename, file_path, file_type, file_size, status, status_message, user_id, upload_date)
        VALUES (?, ?, ?, ?, ?, ?, NULL, ?, ?)
        "#,
    )
    .bind(&doc.id)
    .bind(&doc.filename)
    .bind(&doc.file_path)
    .bind(&doc.file_type)
    .bind(doc.file_size)
    .bind(doc.status.as_str())
    .bind(&doc.user_id)
    .bind(doc.upload_date)
    .execute(pool)
    .await?;

    Ok(doc)
}

pub async fn get_document(pool: &SqlitePool, id: &str) -> Result<Option<Document>> {
    let row = sqlx::query(&format!("SELECT {} FROM files WHERE id = ?", DOCUMENT_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(document_from_row).transpose()
}

/// Like [`get_document`], but a missing row is an error.
pub async fn require_document(pool: &SqlitePool, id: &str) -> Result<Document> {
    get_document(pool, id)
        .await?
        .ok_or_else(|| PersistenceError::DocumentNotFound(id.to_string()))
}

/// Lists documents newest first, restricted to one owner when given.
pub async fn list_documents(pool: &SqlitePool, user_id: Option<&str>) -> Result<Vec<Document>> {
    let rows = match user_id {
        Some(user_id) => {
            sqlx::query(&format!(
                "SELECT {} FROM files WHERE user_id = ? ORDER BY upload_date DESC, id ASC",
                DOCUMENT_COLUMNS
            ))
            .bind(user_id)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(&format!(
                "SELECT {} FROM files ORDER BY upload_date DESC, id ASC",
                DOCUMENT_COLUMNS
            ))
            .fetch_all(pool)
            .await?
        }
    };
    rows.iter().map(document_from_row).collect()
}

async fn update_status(
    conn: &mut SqliteConnection,
    id: &str,
    status: DocumentStatus,
    message: Option<&str>,
) -> Result<()> {
    let result = sqlx::query("UPDATE files SET status = ?, status_message = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(message)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(PersistenceError::DocumentNotFound(id.to_string()));
    }
    Ok(())
}

/// Sets a document's status and diagnostic message in one statement.
pub async fn set_status(
    pool: &SqlitePool,
    id: &str,
    status: DocumentStatus,
    message: Option<&str>,
) -> Result<()> {
    let mut conn = pool.acquire().await?;
    update_status(&mut *conn, id, status, message).await
}

/// Deletes a document's embeddings and then its chunks, atomically.
///
/// Returns the number of chunks removed.
pub async fn clear_chunks(pool: &SqlitePool, file_id: &str) -> Result<u64> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "DELETE FROM embeddings WHERE chunk_id IN (SELECT id FROM chunks WHERE file_id = ?)",
    )
    .bind(file_id)
    .execute(&mut *tx)
    .await?;

    let deleted = sqlx::query("DELETE FROM chunks WHERE file_id = ?")
        .bind(file_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    tx.commit().await?;
    Ok(deleted)
}

/// Deletes a document with all of its chunks and embeddings.
///
/// Returns `false` when no such document existed.
pub async fn delete_document(pool: &SqlitePool, id: &str) -> Result<bool> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "DELETE FROM embeddings WHERE chunk_id IN (SELECT id FROM chunks WHERE file_id = ?)",
    )
    .bind(id)
    .execute(&mut *tx)
    .await?;
    sqlx::query("DELETE FROM chunks WHERE file_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    let deleted = sqlx::query("DELETE FROM files WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    tx.commit().await?;
    Ok(deleted > 0)
}

// ============ Chunks & embeddings ============

async fn write_rows(conn: &mut SqliteConnection, rows: &[NewChunk]) -> Result<()> {
    for row in rows {
        let chunk = &row.chunk;
        sqlx::query(
            "INSERT INTO chunks (id, file_id, chunk_number, text, token_count, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.file_id)
        .bind(chunk.chunk_number)
        .bind(&chunk.text)
        .bind(chunk.token_count)
        .bind(chunk.created_at)
        .execute(&mut *conn)
        .await?;

        if let Some(embedding) = &row.embedding {
            sqlx::query(
                "INSERT INTO embeddings (id, chunk_id, embedding_vector, dims, embedding_model, created_at) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&chunk.id)
            .bind(vec_to_blob(&embedding.vector))
            .bind(embedding.vector.len() as i64)
            .bind(&embedding.model)
            .bind(chunk.created_at)
            .execute(&mut *conn)
            .await?;
        }
    }
    Ok(())
}

/// Writes a batch of chunks and their embeddings in one transaction.
pub async fn insert_chunks(pool: &SqlitePool, rows: &[NewChunk]) -> Result<()> {
    let mut tx = pool.begin().await?;
    write_rows(&mut *tx, rows).await?;
    tx.commit().await?;
    Ok(())
}

/// Writes the last batch and marks the document `Embedded` in the same
/// transaction.
pub async fn insert_chunks_and_finish(
    pool: &SqlitePool,
    document_id: &str,
    rows: &[NewChunk],
) -> Result<()> {
    let mut tx = pool.begin().await?;
    write_rows(&mut *tx, rows).await?;
    update_status(&mut *tx, document_id, DocumentStatus::Embedded, None).await?;
    tx.commit().await?;
    Ok(())
}

const CHUNK_SELECT: &str = r#"
    SELECT c.id, c.file_id, c.chunk_number, c.text, c.token_count, c.created_at,
           e.id AS embedding_id, e.embedding_model, e.dims, e.created_at AS embedding_created_at
    FROM chunks c
    LEFT JOIN embeddings e ON e.chunk_id = c.id
"#;

fn stored_chunk_from_row(row: &SqliteRow) -> StoredChunk {
    let chunk = Chunk {
        id: row.get("id"),
        file_id: row.get("file_id"),
        chunk_number: row.get("chunk_number"),
        text: row.get("text"),
        token_count: row.get("token_count"),
        created_at: row.get("created_at"),
    };
    let embedding_id: Option<String> = row.get("embedding_id");
    let embedding = embedding_id.map(|id| EmbeddingInfo {
        id,
        chunk_id: chunk.id.clone(),
        embedding_model: row.get("embedding_model"),
        dims: row.get("dims"),
        created_at: row.get("embedding_created_at"),
    });
    StoredChunk { chunk, embedding }
}

/// All chunks of a document ordered by `chunk_number`.
pub async fn list_chunks_for_file(pool: &SqlitePool, file_id: &str) -> Result<Vec<StoredChunk>> {
    let rows = sqlx::query(&format!(
        "{} WHERE c.file_id = ? ORDER BY c.chunk_number ASC",
        CHUNK_SELECT
    ))
    .bind(file_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(stored_chunk_from_row).collect())
}

/// Chunks across all documents, paged.
pub async fn list_chunks(pool: &SqlitePool, skip: i64, limit: i64) -> Result<Vec<StoredChunk>> {
    let rows = sqlx::query(&format!(
        "{} ORDER BY c.file_id ASC, c.chunk_number ASC LIMIT ? OFFSET ?",
        CHUNK_SELECT
    ))
    .bind(limit)
    .bind(skip)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(stored_chunk_from_row).collect())
}

pub async fn get_chunk(pool: &SqlitePool, id: &str) -> Result<Option<StoredChunk>> {
    let row = sqlx::query(&format!("{} WHERE c.id = ?", CHUNK_SELECT))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(stored_chunk_from_row))
}

pub async fn count_chunks(pool: &SqlitePool, file_id: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE file_id = ?")
        .bind(file_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

pub async fn count_embeddings(pool: &SqlitePool, file_id: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM embeddings WHERE chunk_id IN (SELECT id FROM chunks WHERE file_id = ?)",
    )
    .bind(file_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Loads the stored vector of a chunk's embedding.
pub async fn get_embedding_vector(pool: &SqlitePool, chunk_id: &str) -> Result<Option<Vec<f32>>> {
    let blob: Option<Vec<u8>> =
        sqlx::query_scalar("SELECT embedding_vector FROM embeddings WHERE chunk_id = ?")
            .bind(chunk_id)
            .fetch_optional(pool)
            .await?;
    Ok(blob.map(|b| blob_to_vec(&b)))
}

// ============ Users ============

const USER_COLUMNS: &str =
    "id, email, hashed_password, full_name, is_active, is_admin, created_at";

fn user_from_row(row: &SqliteRow) -> User {
    User {
        id: row.get("id"),
        email: row.get("email"),
        hashed_password: row.get("hashed_password"),
        full_name: row.get("full_name"),
        is_active: row.get::<i64, _>("is_active") != 0,
        is_admin: row.get::<i64, _>("is_admin") != 0,
        created_at: row.get("created_at"),
    }
}

pub async fn create_user(
    pool: &SqlitePool,
    email: &str,
    hashed_password: &str,
    full_name: Option<&str>,
    is_admin: bool,
) -> Result<User> {
    let user = User {
        id: Uuid::new_v4().to_string(),
        email: email.to_string(),
        hashed_password: hashed_password.to_string(),
        full_name: full_name.map(str::to_string),
        is_active: true,
        is_admin,
        created_at: now_ts(),
    };

    sqlx::query(
        "INSERT INTO users (id, email, hashed_password, full_name, is_active, is_admin, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&user.id)
    .bind(&user.email)
    .bind(&user.hashed_password)
    .bind(&user.full_name)
    .bind(user.is_active as i64)
    .bind(user.is_admin as i64)
    .bind(user.created_at)
    .execute(pool)
    .await?;

    Ok(user)
}

pub async fn get_user(pool: &SqlitePool, id: &str) -> Result<Option<User>> {
    let row = sqlx::query(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(user_from_row))
}

pub async fn get_user_by_email(pool: &SqlitePool, email: &str) -> Result<Option<User>> {
    let row = sqlx::query(&format!("SELECT {} FROM users WHERE email = ?", USER_COLUMNS))
        .bind(email)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(user_from_row))
}

pub async fn list_users(pool: &SqlitePool, skip: i64, limit: i64) -> Result<Vec<User>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM users ORDER BY created_at ASC, email ASC LIMIT ? OFFSET ?",
        USER_COLUMNS
    ))
    .bind(limit)
    .bind(skip)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(user_from_row).collect())
}

/// Writes back every mutable field of `user`.
pub async fn update_user(pool: &SqlitePool, user: &User) -> Result<()> {
    sqlx::query(
        "UPDATE users SET hashed_password = ?, full_name = ?, is_active = ?, is_admin = ? WHERE id = ?",
    )
    .bind(&user.hashed_password)
    .bind(&user.full_name)
    .bind(user.is_active as i64)
    .bind(user.is_admin as i64)
    .bind(&user.id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Deletes a user. Their documents stay, detached from any owner.
pub async fn delete_user(pool: &SqlitePool, id: &str) -> Result<bool> {
    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE files SET user_id = NULL WHERE user_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    let deleted = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    tx.commit().await?;
    Ok(deleted > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::apply_schema;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        apply_schema(&pool).await.unwrap();
        pool
    }

    fn new_chunk(file_id: &str, n: i64, embedded: bool) -> NewChunk {
        NewChunk {
            chunk: Chunk {
                id: Uuid::new_v4().to_string(),
                file_id: file_id.to_string(),
                chunk_number: n,
                text: format!("chunk {}", n),
                token_count: 2,
                created_at: now_ts(),
            },
            embedding: embedded.then(|| EmbeddingVector {
                vector: vec![0.6, 0.8],
                model: "test-model".to_string(),
            }),
        }
    }

    #[tokio::test]
    async fn test_document_lifecycle() {
        let pool = memory_pool().await;
        let doc = create_document(&pool, "a.txt", "/tmp/a.txt", "txt", 11, None)
            .await
            .unwrap();
        assert_eq!(doc.status, DocumentStatus::Pending);

        set_status(&pool, &doc.id, DocumentStatus::Error, Some("boom"))
            .await
            .unwrap();
        let loaded = require_document(&pool, &doc.id).await.unwrap();
        assert_eq!(loaded.status, DocumentStatus::Error);
        assert_eq!(loaded.status_message.as_deref(), Some("boom"));

        assert!(matches!(
            set_status(&pool, "missing", DocumentStatus::Pending, None).await,
            Err(PersistenceError::DocumentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_finish_batch_and_clear() {
        let pool = memory_pool().await;
        let doc = create_document(&pool, "a.txt", "/tmp/a.txt", "txt", 11, None)
            .await
            .unwrap();

        insert_chunks(&pool, &[new_chunk(&doc.id, 1, true)])
            .await
            .unwrap();
        insert_chunks_and_finish(&pool, &doc.id, &[new_chunk(&doc.id, 2, false)])
            .await
            .unwrap();

        let chunks = list_chunks_for_file(&pool, &doc.id).await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chunk.chunk_number, 1);
        assert_eq!(chunks[0].embedding.as_ref().unwrap().dims, 2);
        assert!(chunks[1].embedding.is_none());
        assert_eq!(
            get_embedding_vector(&pool, &chunks[0].chunk.id).await.unwrap(),
            Some(vec![0.6, 0.8])
        );
        assert_eq!(
            require_document(&pool, &doc.id).await.unwrap().status,
            DocumentStatus::Embedded
        );

        assert_eq!(clear_chunks(&pool, &doc.id).await.unwrap(), 2);
        assert_eq!(count_chunks(&pool, &doc.id).await.unwrap(), 0);
        assert_eq!(count_embeddings(&pool, &doc.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_chunk_number_rolls_back_batch() {
        let pool = memory_pool().await;
        let doc = create_document(&pool, "a.txt", "/tmp/a.txt", "txt", 11, None)
            .await
            .unwrap();

        let result = insert_chunks(
            &pool,
            &[new_chunk(&doc.id, 1, true), new_chunk(&doc.id, 1, true)],
        )
        .await;
        assert!(result.is_err());
        assert_eq!(count_chunks(&pool, &doc.id).await.unwrap(), 0);
        assert_eq!(count_embeddings(&pool, &doc.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_user_detaches_files() {
        let pool = memory_pool().await;
        let user = create_user(&pool, "u@example.com", "hash", None, false)
            .await
            .unwrap();
        let doc = create_document(&pool, "a.txt", "/tmp/a.txt", "txt", 1, Some(&user.id))
            .await
            .unwrap();

        assert!(delete_user(&pool, &user.id).await.unwrap());
        assert!(get_user(&pool, &user.id).await.unwrap().is_none());
        let doc = require_document(&pool, &doc.id).await.unwrap();
        assert!(doc.user_id.is_none());
    }
}
