//! Append-only ingestion ledger.
//!
//! One [`ManifestRecord`] is appended per ingestion attempt. The latest
//! record for a path decides whether the next run may skip it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::StoreError;
use crate::jsonl;
use crate::models::{Document, IngestStatus, ManifestRecord, Phase};

/// Error strings stored in the manifest are cut to this many chars.
pub const MAX_ERROR_CHARS: usize = 500;

#[derive(Debug)]
pub struct ManifestStore {
    path: PathBuf,
    latest: HashMap<String, ManifestRecord>,
    total_records: usize,
}

impl ManifestStore {
    /// Load every record, validating each one.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let mut latest = HashMap::new();
        let lines = jsonl::read_records::<ManifestRecord>(path)?;
        let total_records = lines.len();
        for line in lines {
            line.value.validate().map_err(|e| StoreError::Malformed {
                path: path.to_path_buf(),
                line: line.line,
                message: e.to_string(),
            })?;
            latest.insert(line.value.path.clone(), line.value);
        }
        Ok(Self {
            path: path.to_path_buf(),
            latest,
            total_records,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn latest(&self, path_rel: &str) -> Option<&ManifestRecord> {
        self.latest.get(path_rel)
    }

    /// Latest record per path, sorted by path.
    pub fn latest_records(&self) -> Vec<&ManifestRecord> {
        let mut records: Vec<&ManifestRecord> = self.latest.values().collect();
        records.sort_by(|a, b| a.path.cmp(&b.path));
        records
    }

    pub fn total_records(&self) -> usize {
        self.total_records
    }

    /// Skip iff the latest record has the same hash, succeeded, and reached
    /// at least `phase`.
    pub fn should_skip(&self, path_rel: &str, content_hash: &str, phase: Phase) -> bool {
        match self.latest.get(path_rel) {
            Some(rec) => {
                rec.content_hash == content_hash
                    && rec.status == IngestStatus::Ok
                    && rec.phase >= phase
            }
            None => false,
        }
    }

    pub fn append(&mut self, record: ManifestRecord) -> Result<(), StoreError> {
        record.validate()?;
        jsonl::append_record(&self.path, &record)?;
        self.total_records += 1;
        self.latest.insert(record.path.clone(), record);
        Ok(())
    }
}

pub fn ok_record(doc: &Document, chunk_count: usize, phase: Phase) -> ManifestRecord {
    ManifestRecord {
        path: doc.path_rel.clone(),
        doc_id: doc.doc_id.clone(),
        content_hash: doc.content_hash.clone(),
        status: IngestStatus::Ok,
        chunk_count,
        error: None,
        timestamp: Utc::now(),
        phase,
    }
}

pub fn failed_record(doc: &Document, error: &str, phase: Phase) -> ManifestRecord {
    ManifestRecord {
        path: doc.path_rel.clone(),
        doc_id: doc.doc_id.clone(),
        content_hash: doc.content_hash.clone(),
        status: IngestStatus::Failed,
        chunk_count: 0,
        error: Some(truncate_error(error)),
        timestamp: Utc::now(),
        phase,
    }
}

fn truncate_error(error: &str) -> String {
    if error.chars().count() <= MAX_ERROR_CHARS {
        error.to_string()
    } else {
        let mut s: String = error.chars().take(MAX_ERROR_CHARS).collect();
        s.push('…');
        s
    }
}
