//! Document inventory for the `docvault files` command.
//!
//! Prints totals (documents, chunks, embedding coverage), a per-status
//! breakdown, and one line per document, newest first.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;

/// One row of the per-document listing.
struct FileRow {
    id: String,
    filename: String,
    status: String,
    file_size: i64,
    chunk_count: i64,
    embedded_count: i64,
    upload_date: i64,
}

/// Query the database and print the inventory.
pub async fn run_list_files(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let total_chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(&pool)
        .await?;
    let total_embedded: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embeddings")
        .fetch_one(&pool)
        .await?;

    let status_rows = sqlx::query(
        "SELECT status, COUNT(*) AS n FROM files GROUP BY status ORDER BY status ASC",
    )
    .fetch_all(&pool)
    .await?;

    let file_rows = sqlx::query(
        r#"
        SELECT
            f.id, f.filename, f.status, f.file_size, f.upload_date,
            COUNT(DISTINCT c.id) AS chunk_count,
            COUNT(DISTINCT e.chunk_id) AS embedded_count
        FROM files f
        LEFT JOIN chunks c ON c.file_id = f.id
        LEFT JOIN embeddings e ON e.chunk_id = c.id
        GROUP BY f.id
        ORDER BY f.upload_date DESC, f.id ASC
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let files: Vec<FileRow> = file_rows
        .iter()
        .map(|row| FileRow {
            id: row.get("id"),
            filename: row.get("filename"),
            status: row.get("status"),
            file_size: row.get("file_size"),
            chunk_count: row.get("chunk_count"),
            embedded_count: row.get("embedded_count"),
            upload_date: row.get("upload_date"),
        })
        .collect();

    println!("docvault documents");
    println!("==================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Documents:   {}", files.len());
    println!("  Chunks:      {}", total_chunks);
    println!(
        "  Embedded:    {} / {} ({}%)",
        total_embedded,
        total_chunks,
        if total_chunks > 0 {
            (total_embedded * 100) / total_chunks
        } else {
            0
        }
    );

    if !status_rows.is_empty() {
        println!();
        println!("  By status:");
        for row in &status_rows {
            let status: String = row.get("status");
            let n: i64 = row.get("n");
            println!("    {:<12} {}", status, n);
        }
    }

    if !files.is_empty() {
        println!();
        println!(
            "  {:<36}  {:<10} {:>6} {:>8} {:>9}  {:<16}  {}",
            "ID", "STATUS", "CHUNKS", "EMBEDDED", "SIZE", "UPLOADED", "FILENAME"
        );
        println!("  {}", "-".repeat(110));
        for f in &files {
            println!(
                "  {:<36}  {:<10} {:>6} {:>8} {:>9}  {:<16}  {}",
                f.id,
                f.status,
                f.chunk_count,
                f.embedded_count,
                format_bytes(f.file_size.max(0) as u64),
                format_ts_short(f.upload_date),
                f.filename
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

fn format_ts_short(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
