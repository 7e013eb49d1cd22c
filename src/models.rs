//! Core data models used throughout the pipeline.
//!
//! These types represent the documents, manifest records, chunks, knowledge
//! units, and reasoning units that flow from ingestion through reasoning and
//! verification. Every identifier is content-derived: the same inputs always
//! produce the same ids.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;

use crate::error::StoreError;

/// Length (hex chars) of document ids.
pub const DOC_ID_LEN: usize = 16;

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// `hash(path_rel || ":" || content_hash)[:16]`.
pub fn doc_id_for(path_rel: &str, content_hash: &str) -> String {
    let mut id = sha256_hex(format!("{}:{}", path_rel, content_hash).as_bytes());
    id.truncate(DOC_ID_LEN);
    id
}

fn is_hex(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Metadata parsed from a corpus filename.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilenameMeta {
    pub author: Option<String>,
    pub title: String,
    pub year: Option<u16>,
    pub qualifier: Option<String>,
}

/// A corpus document identified by path and content.
#[derive(Debug, Clone)]
pub struct Document {
    /// Absolute path on disk.
    pub path: PathBuf,
    /// Path relative to the corpus root, `/`-separated.
    pub path_rel: String,
    pub content_hash: String,
    pub doc_id: String,
    pub meta: FilenameMeta,
    pub modified: DateTime<Utc>,
}

/// Outcome of one ingestion attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    Ok,
    Failed,
}

/// Pipeline phase reached by an ingestion attempt. Ordered: `Chunk < Embed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Text extracted and chunked; nothing written to the vector index.
    Chunk,
    /// Chunks embedded and upserted into the vector index.
    Embed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Chunk => write!(f, "chunk"),
            Phase::Embed => write!(f, "embed"),
        }
    }
}

/// One line of the append-only manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestRecord {
    pub path: String,
    pub doc_id: String,
    pub content_hash: String,
    pub status: IngestStatus,
    pub chunk_count: usize,
    #[serde(default)]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub phase: Phase,
}

impl ManifestRecord {
    pub fn validate(&self) -> Result<(), StoreError> {
        let invalid = |message: &str| StoreError::Invalid {
            id: self.path.clone(),
            message: message.to_string(),
        };
        if self.path.is_empty() {
            return Err(invalid("empty path"));
        }
        if !is_hex(&self.content_hash, 64) {
            return Err(invalid("content_hash is not a sha256 hex digest"));
        }
        if !is_hex(&self.doc_id, DOC_ID_LEN) {
            return Err(invalid("doc_id is not a 16-char hex id"));
        }
        if self.status == IngestStatus::Failed && self.error.is_none() {
            return Err(invalid("failed record without error"));
        }
        Ok(())
    }
}

/// A content-addressed span of a document's text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// `"{doc_id}:{index:05}"`.
    pub chunk_id: String,
    pub doc_id: String,
    pub index: usize,
    pub text: String,
    pub page_start: Option<u32>,
    pub page_end: Option<u32>,
    pub token_estimate: usize,
}

impl Chunk {
    pub fn make_id(doc_id: &str, index: usize) -> String {
        format!("{}:{:05}", doc_id, index)
    }
}

/// The document id prefix of a chunk id.
pub fn doc_id_of_chunk(chunk_id: &str) -> &str {
    chunk_id.split(':').next().unwrap_or(chunk_id)
}

/// Inclusive page range `[start, end]`, serialized as a two-element array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange(pub u32, pub u32);

impl PageRange {
    pub fn start(&self) -> u32 {
        self.0
    }
    pub fn end(&self) -> u32 {
        self.1
    }

    /// True when `self` lies within `[start, end]`.
    pub fn within(&self, start: u32, end: u32) -> bool {
        self.0 >= start && self.1 <= end
    }
}

/// A KU's citation of a chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceRef {
    pub chunk_id: String,
    #[serde(default)]
    pub page_range: Option<PageRange>,
}

/// An atomic, sourced claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KnowledgeUnit {
    pub id: String,
    pub claim: String,
    pub sources: Vec<SourceRef>,
    pub confidence: f64,
    pub methodology: String,
}

impl KnowledgeUnit {
    pub fn validate(&self) -> Result<(), StoreError> {
        let invalid = |message: String| StoreError::Invalid {
            id: self.id.clone(),
            message,
        };
        if self.id.trim().is_empty() {
            return Err(invalid("empty id".to_string()));
        }
        if self.claim.trim().is_empty() {
            return Err(invalid("empty claim".to_string()));
        }
        if self.sources.is_empty() {
            return Err(invalid("claim has no sources".to_string()));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(invalid(format!(
                "confidence {} outside [0, 1]",
                self.confidence
            )));
        }
        for src in &self.sources {
            if src.chunk_id.is_empty() {
                return Err(invalid("source with empty chunk_id".to_string()));
            }
            if let Some(range) = src.page_range {
                if range.start() > range.end() {
                    return Err(invalid(format!(
                        "inverted page range [{}, {}] for {}",
                        range.start(),
                        range.end(),
                        src.chunk_id
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Classified relation between two KUs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Relation {
    Support,
    Contrast,
    Elaboration,
    Inheritance,
}

impl Relation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::Support => "support",
            Relation::Contrast => "contrast",
            Relation::Elaboration => "elaboration",
            Relation::Inheritance => "inheritance",
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the evidence behind a reasoning edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Evidence {
    pub ngram_size: usize,
    pub shared_ngrams: usize,
    pub shared_ngram_sample: Vec<String>,
    pub markers: Vec<String>,
}

/// A derived edge linking two or more KUs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReasoningUnit {
    pub reason_id: String,
    pub relation: Relation,
    pub topic: String,
    pub knowledge_ids: Vec<String>,
    pub score: f64,
    pub evidence: Evidence,
    pub hash: String,
}

impl ReasoningUnit {
    pub fn validate(&self) -> Result<(), StoreError> {
        let invalid = |message: String| StoreError::Invalid {
            id: self.reason_id.clone(),
            message,
        };
        if self.reason_id.is_empty() {
            return Err(invalid("empty reason_id".to_string()));
        }
        if self.knowledge_ids.len() < 2 {
            return Err(invalid(format!(
                "links {} knowledge ids, need at least 2",
                self.knowledge_ids.len()
            )));
        }
        if !(0.0..=1.0).contains(&self.score) {
            return Err(invalid(format!("score {} outside [0, 1]", self.score)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doc_id_is_pure_function_of_path_and_hash() {
        let h = sha256_hex(b"hello");
        let a = doc_id_for("papers/a.pdf", &h);
        let b = doc_id_for("papers/a.pdf", &h);
        let c = doc_id_for("papers/b.pdf", &h);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), DOC_ID_LEN);
    }

    #[test]
    fn chunk_id_format() {
        assert_eq!(Chunk::make_id("abcdef0123456789", 7), "abcdef0123456789:00007");
        assert_eq!(doc_id_of_chunk("abcdef0123456789:00007"), "abcdef0123456789");
    }

    #[test]
    fn page_range_serializes_as_array() {
        let src = SourceRef {
            chunk_id: "d:00000".to_string(),
            page_range: Some(PageRange(3, 4)),
        };
        let json = serde_json::to_string(&src).unwrap();
        assert_eq!(json, r#"{"chunk_id":"d:00000","page_range":[3,4]}"#);
    }

    #[test]
    fn ku_without_sources_is_rejected() {
        let ku = KnowledgeUnit {
            id: "ku1".to_string(),
            claim: "A claim.".to_string(),
            sources: vec![],
            confidence: 0.8,
            methodology: "manual".to_string(),
        };
        assert!(ku.validate().is_err());
    }

    #[test]
    fn manifest_record_rejects_unknown_fields() {
        let line = r#"{"path":"a.txt","doc_id":"0123456789abcdef","content_hash":"x","status":"ok","chunk_count":1,"timestamp":"2024-01-01T00:00:00Z","phase":"chunk","extra":1}"#;
        assert!(serde_json::from_str::<ManifestRecord>(line).is_err());
    }

    #[test]
    fn phase_ordering() {
        assert!(Phase::Embed > Phase::Chunk);
    }
}
