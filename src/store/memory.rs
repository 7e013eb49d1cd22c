use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{
    check_upsert_lengths, rank_entries, ChunkMetadata, IndexedChunk, MetadataFilter, QueryResult,
    VectorIndex,
};

/// In-process index used by tests and dry runs.
#[derive(Default)]
pub struct MemoryIndex {
    entries: Mutex<BTreeMap<String, IndexedChunk>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, IndexedChunk>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory index lock poisoned"))
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn upsert(
        &self,
        ids: &[String],
        documents: &[String],
        embeddings: &[Vec<f32>],
        metadatas: &[ChunkMetadata],
    ) -> Result<()> {
        check_upsert_lengths(ids, documents, embeddings, metadatas)?;
        let mut entries = self.lock()?;
        for i in 0..ids.len() {
            entries.insert(
                ids[i].clone(),
                IndexedChunk {
                    id: ids[i].clone(),
                    document: documents[i].clone(),
                    embedding: embeddings[i].clone(),
                    metadata: metadatas[i].clone(),
                },
            );
        }
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<QueryResult> {
        let entries = self.lock()?;
        Ok(rank_entries(entries.values(), embedding, k, filter))
    }

    async fn get(&self, ids: &[String]) -> Result<Vec<IndexedChunk>> {
        let entries = self.lock()?;
        Ok(ids.iter().filter_map(|id| entries.get(id).cloned()).collect())
    }

    async fn all(&self) -> Result<Vec<IndexedChunk>> {
        Ok(self.lock()?.values().cloned().collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::meta;
    use super::*;

    #[tokio::test]
    async fn query_orders_by_distance_and_filters() {
        let index = MemoryIndex::new();
        index
            .upsert(
                &["a:00000".to_string(), "b:00000".to_string(), "b:00001".to_string()],
                &["one".to_string(), "two".to_string(), "three".to_string()],
                &[vec![1.0, 0.0], vec![0.9, 0.1], vec![0.0, 1.0]],
                &[meta("a", 0, None), meta("b", 0, None), meta("b", 1, None)],
            )
            .await
            .unwrap();

        let res = index.query(&[1.0, 0.0], 2, None).await.unwrap();
        assert_eq!(res.ids, vec!["a:00000", "b:00000"]);
        assert!(res.distances[0] <= res.distances[1]);

        let mut f = MetadataFilter::new();
        f.insert("doc_id".to_string(), serde_json::json!("b"));
        let res = index.query(&[1.0, 0.0], 5, Some(&f)).await.unwrap();
        assert_eq!(res.ids, vec!["b:00000", "b:00001"]);
        assert_eq!(res.documents[1], "three");
    }

    #[tokio::test]
    async fn upsert_rejects_mismatched_lengths() {
        let index = MemoryIndex::new();
        let err = index
            .upsert(&["a".to_string()], &[], &[vec![1.0]], &[meta("a", 0, None)])
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn upsert_replaces_existing_entries() {
        let index = MemoryIndex::new();
        for text in ["first", "second"] {
            index
                .upsert(&["a".to_string()], &[text.to_string()], &[vec![1.0]], &[meta("a", 0, None)])
                .await
                .unwrap();
        }
        assert_eq!(index.count().await.unwrap(), 1);
        assert_eq!(index.get(&["a".to_string()]).await.unwrap()[0].document, "second");
    }
}
