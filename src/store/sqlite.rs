//! SQLite-backed vector index.
//!
//! Vectors are little-endian f32 BLOBs; metadata is stored as JSON. Queries
//! load candidate rows and rank them by cosine distance in Rust.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::time::Duration;

use super::{
    check_upsert_lengths, rank_entries, ChunkMetadata, IndexedChunk, MetadataFilter, QueryResult,
    VectorIndex,
};
use crate::embedding::{blob_to_vec, vec_to_blob};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS chunk_vectors (
        chunk_id TEXT PRIMARY KEY,
        doc_id TEXT NOT NULL,
        document TEXT NOT NULL,
        dims INTEGER NOT NULL,
        embedding BLOB NOT NULL,
        metadata_json TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_chunk_vectors_doc_id ON chunk_vectors(doc_id)",
];

pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    /// Open (creating if needed) the index at `path` in WAL mode and ensure
    /// the schema exists.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open vector index {}", path.display()))?;

        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&pool).await?;
        }
        Ok(Self { pool })
    }

    pub async fn close(self) {
        self.pool.close().await;
    }

    fn row_to_entry(row: &SqliteRow) -> Result<IndexedChunk> {
        let id: String = row.try_get("chunk_id")?;
        let blob: Vec<u8> = row.try_get("embedding")?;
        let metadata_json: String = row.try_get("metadata_json")?;
        let metadata: ChunkMetadata = serde_json::from_str(&metadata_json)
            .with_context(|| format!("Malformed metadata for chunk {}", id))?;
        Ok(IndexedChunk {
            document: row.try_get("document")?,
            embedding: blob_to_vec(&blob),
            metadata,
            id,
        })
    }

    async fn load_rows(&self, doc_id: Option<&str>) -> Result<Vec<IndexedChunk>> {
        let rows = match doc_id {
            Some(doc_id) => {
                sqlx::query(
                    "SELECT chunk_id, document, embedding, metadata_json FROM chunk_vectors \
                     WHERE doc_id = ? ORDER BY chunk_id",
                )
                .bind(doc_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT chunk_id, document, embedding, metadata_json FROM chunk_vectors \
                     ORDER BY chunk_id",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(Self::row_to_entry).collect()
    }
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn upsert(
        &self,
        ids: &[String],
        documents: &[String],
        embeddings: &[Vec<f32>],
        metadatas: &[ChunkMetadata],
    ) -> Result<()> {
        check_upsert_lengths(ids, documents, embeddings, metadatas)?;

        let mut tx = self.pool.begin().await?;
        for i in 0..ids.len() {
            let metadata_json = serde_json::to_string(&metadatas[i])?;
            sqlx::query(
                r#"
                INSERT INTO chunk_vectors (chunk_id, doc_id, document, dims, embedding, metadata_json)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(chunk_id) DO UPDATE SET
                    doc_id = excluded.doc_id,
                    document = excluded.document,
                    dims = excluded.dims,
                    embedding = excluded.embedding,
                    metadata_json = excluded.metadata_json
                "#,
            )
            .bind(&ids[i])
            .bind(&metadatas[i].doc_id)
            .bind(&documents[i])
            .bind(embeddings[i].len() as i64)
            .bind(vec_to_blob(&embeddings[i]))
            .bind(metadata_json)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<QueryResult> {
        // A doc_id filter narrows the scan in SQL; the rest is applied in Rust.
        let doc_id = filter
            .and_then(|f| f.get("doc_id"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let entries = self.load_rows(doc_id.as_deref()).await?;
        Ok(rank_entries(entries.iter(), embedding, k, filter))
    }

    async fn get(&self, ids: &[String]) -> Result<Vec<IndexedChunk>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let row = sqlx::query(
                "SELECT chunk_id, document, embedding, metadata_json FROM chunk_vectors \
                 WHERE chunk_id = ?",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
            if let Some(row) = row {
                out.push(Self::row_to_entry(&row)?);
            }
        }
        Ok(out)
    }

    async fn all(&self) -> Result<Vec<IndexedChunk>> {
        self.load_rows(None).await
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::meta;
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn sqlite_round_trips_entries() {
        let tmp = TempDir::new().unwrap();
        let index = SqliteIndex::open(&tmp.path().join("vectors.sqlite"))
            .await
            .unwrap();

        index
            .upsert(
                &["d:00000".to_string(), "d:00001".to_string()],
                &["alpha".to_string(), "beta".to_string()],
                &[vec![1.0, 0.0, 0.5], vec![0.0, 1.0, 0.5]],
                &[meta("d", 0, Some((1, 1))), meta("d", 1, Some((1, 2)))],
            )
            .await
            .unwrap();

        assert_eq!(index.count().await.unwrap(), 2);
        let got = index.get(&["d:00001".to_string(), "missing".to_string()]).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].metadata.page_end, Some(2));
        assert_eq!(got[0].embedding, vec![0.0, 1.0, 0.5]);

        let res = index.query(&[0.0, 1.0, 0.5], 1, None).await.unwrap();
        assert_eq!(res.ids, vec!["d:00001"]);
        assert!(res.distances[0].abs() < 1e-6);

        index.close().await;
    }
}
