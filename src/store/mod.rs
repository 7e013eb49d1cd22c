//! Vector index abstraction.
//!
//! The pipeline only needs `upsert` and `query` from a vector index, plus
//! `get`/`all`/`count` for provenance and duplicate checks. Two backends
//! implement [`VectorIndex`]: [`SqliteIndex`] for real runs and
//! [`MemoryIndex`] for tests.
//!
//! Query distances are cosine distances (`1 - cosine_similarity`), ascending.

pub mod memory;
pub mod sqlite;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::embedding::cosine_similarity;
use crate::models::{Chunk, Document};

pub use memory::MemoryIndex;
pub use sqlite::SqliteIndex;

/// Equality filter over metadata fields, e.g. `{"doc_id": "..."}`.
pub type MetadataFilter = BTreeMap<String, serde_json::Value>;

/// Metadata stored alongside each chunk vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub doc_id: String,
    pub path: String,
    pub chunk_index: usize,
    pub page_start: Option<u32>,
    pub page_end: Option<u32>,
    pub token_estimate: usize,
    pub author: Option<String>,
    pub title: String,
    pub year: Option<u16>,
}

impl ChunkMetadata {
    pub fn for_chunk(doc: &Document, chunk: &Chunk) -> Self {
        Self {
            doc_id: doc.doc_id.clone(),
            path: doc.path_rel.clone(),
            chunk_index: chunk.index,
            page_start: chunk.page_start,
            page_end: chunk.page_end,
            token_estimate: chunk.token_estimate,
            author: doc.meta.author.clone(),
            title: doc.meta.title.clone(),
            year: doc.meta.year,
        }
    }

    /// True when every filter key equals the metadata field of that name.
    pub fn matches(&self, filter: &MetadataFilter) -> bool {
        let value = match serde_json::to_value(self) {
            Ok(v) => v,
            Err(_) => return false,
        };
        filter
            .iter()
            .all(|(k, expected)| value.get(k).map(|v| v == expected).unwrap_or(false))
    }
}

/// One stored entry.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedChunk {
    pub id: String,
    pub document: String,
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub ids: Vec<String>,
    pub distances: Vec<f32>,
    pub metadatas: Vec<ChunkMetadata>,
    pub documents: Vec<String>,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace entries. All slices must have the same length.
    async fn upsert(
        &self,
        ids: &[String],
        documents: &[String],
        embeddings: &[Vec<f32>],
        metadatas: &[ChunkMetadata],
    ) -> Result<()>;

    /// The `k` nearest entries to `embedding` that pass `filter`.
    async fn query(
        &self,
        embedding: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<QueryResult>;

    /// Entries for the given ids; unknown ids are omitted.
    async fn get(&self, ids: &[String]) -> Result<Vec<IndexedChunk>>;

    /// Every entry, sorted by id.
    async fn all(&self) -> Result<Vec<IndexedChunk>>;

    async fn count(&self) -> Result<usize>;
}

pub(crate) fn check_upsert_lengths(
    ids: &[String],
    documents: &[String],
    embeddings: &[Vec<f32>],
    metadatas: &[ChunkMetadata],
) -> Result<()> {
    let n = ids.len();
    if documents.len() != n || embeddings.len() != n || metadatas.len() != n {
        bail!(
            "upsert length mismatch: {} ids, {} documents, {} embeddings, {} metadatas",
            n,
            documents.len(),
            embeddings.len(),
            metadatas.len()
        );
    }
    Ok(())
}

/// Brute-force nearest neighbours over `entries`; ties break by id.
pub(crate) fn rank_entries<'a, I>(
    entries: I,
    embedding: &[f32],
    k: usize,
    filter: Option<&MetadataFilter>,
) -> QueryResult
where
    I: IntoIterator<Item = &'a IndexedChunk>,
{
    let mut scored: Vec<(f32, &IndexedChunk)> = entries
        .into_iter()
        .filter(|e| filter.map(|f| e.metadata.matches(f)).unwrap_or(true))
        .map(|e| (1.0 - cosine_similarity(embedding, &e.embedding), e))
        .collect();
    scored.sort_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.id.cmp(&b.1.id))
    });
    scored.truncate(k);

    let mut out = QueryResult::default();
    for (distance, e) in scored {
        out.ids.push(e.id.clone());
        out.distances.push(distance);
        out.metadatas.push(e.metadata.clone());
        out.documents.push(e.document.clone());
    }
    out
}
