//! Append-only Knowledge Unit store.
//!
//! Records live in `knowledge_units.jsonl`, one KU per line, strictly
//! ordered by id. `index.json` maps each id to the byte offset of its line
//! so `get` is a single seek.
//!
//! The only in-place rewrite is [`KnowledgeStore::normalize`], which
//! re-sorts the records and rebuilds the index. It runs when
//! [`KnowledgeStore::verify_or_repair`] finds an ordering or index failure,
//! at most once per call.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::StoreError;
use crate::jsonl;
use crate::models::KnowledgeUnit;

pub const RECORDS_FILE: &str = "knowledge_units.jsonl";
pub const INDEX_FILE: &str = "index.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OffsetIndex {
    pub count: usize,
    pub offsets: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairOutcome {
    Clean(usize),
    Repaired(usize),
}

#[derive(Debug, Clone)]
pub struct KnowledgeStore {
    records: PathBuf,
    index: PathBuf,
}

impl KnowledgeStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            records: dir.join(RECORDS_FILE),
            index: dir.join(INDEX_FILE),
        }
    }

    pub fn records_path(&self) -> &Path {
        &self.records
    }

    pub fn index_path(&self) -> &Path {
        &self.index
    }

    fn read_validated(&self) -> Result<Vec<jsonl::Line<KnowledgeUnit>>, StoreError> {
        let lines = jsonl::read_records::<KnowledgeUnit>(&self.records)?;
        for line in &lines {
            line.value.validate().map_err(|e| StoreError::Malformed {
                path: self.records.clone(),
                line: line.line,
                message: e.to_string(),
            })?;
        }
        Ok(lines)
    }

    fn read_index(&self) -> Result<Option<OffsetIndex>, StoreError> {
        jsonl::read_json(&self.index)
    }

    /// Every KU, sorted by id.
    pub fn load_all(&self) -> Result<Vec<KnowledgeUnit>, StoreError> {
        let mut kus: Vec<KnowledgeUnit> =
            self.read_validated()?.into_iter().map(|l| l.value).collect();
        kus.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(kus)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        Ok(self.read_validated()?.len())
    }

    pub fn get(&self, id: &str) -> Result<Option<KnowledgeUnit>, StoreError> {
        let index = match self.read_index()? {
            Some(index) => index,
            None => return Ok(self.load_all()?.into_iter().find(|k| k.id == id)),
        };
        let offset = match index.offsets.get(id) {
            Some(o) => *o,
            None => return Ok(None),
        };

        let mut file = File::open(&self.records).map_err(|e| StoreError::io(&self.records, e))?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| StoreError::io(&self.records, e))?;
        let mut line = String::new();
        BufReader::new(file)
            .read_line(&mut line)
            .map_err(|e| StoreError::io(&self.records, e))?;

        let ku: KnowledgeUnit =
            serde_json::from_str(line.trim_end()).map_err(|_| StoreError::IndexMismatch {
                id: id.to_string(),
            })?;
        if ku.id != id {
            return Err(StoreError::IndexMismatch { id: id.to_string() });
        }
        Ok(Some(ku))
    }

    /// Validate and append one KU, updating the offset index.
    pub fn append(&self, ku: &KnowledgeUnit) -> Result<(), StoreError> {
        ku.validate()?;
        let mut index = match self.read_index()? {
            Some(index) => index,
            None => build_index(&self.read_validated()?),
        };
        if index.offsets.contains_key(&ku.id) {
            return Err(StoreError::DuplicateId(ku.id.clone()));
        }
        let offset = jsonl::append_record(&self.records, ku)?;
        index.offsets.insert(ku.id.clone(), offset);
        index.count += 1;
        jsonl::write_json_atomic(&self.index, &index)
    }

    /// Check strict id order and that the index matches the records.
    /// Returns the record count.
    pub fn verify_order(&self) -> Result<usize, StoreError> {
        let lines = self.read_validated()?;
        for pair in lines.windows(2) {
            if pair[0].value.id >= pair[1].value.id {
                return Err(StoreError::OutOfOrder {
                    line: pair[1].line,
                    prev: pair[0].value.id.clone(),
                    next: pair[1].value.id.clone(),
                });
            }
        }

        let expected = build_index(&lines);
        match self.read_index()? {
            Some(index) if index == expected => Ok(lines.len()),
            None if lines.is_empty() => Ok(0),
            Some(index) => {
                let id = expected
                    .offsets
                    .iter()
                    .find(|(id, off)| index.offsets.get(*id) != Some(*off))
                    .map(|(id, _)| id.clone())
                    .or_else(|| index.offsets.keys().find(|k| !expected.offsets.contains_key(*k)).cloned())
                    .unwrap_or_else(|| "<count>".to_string());
                Err(StoreError::IndexMismatch { id })
            }
            None => Err(StoreError::IndexMismatch {
                id: "<missing index>".to_string(),
            }),
        }
    }

    /// Re-sort records by id and rebuild the offset index. Duplicate ids are
    /// not repairable and fail without writing.
    pub fn normalize(&self) -> Result<usize, StoreError> {
        let mut kus: Vec<KnowledgeUnit> =
            self.read_validated()?.into_iter().map(|l| l.value).collect();
        kus.sort_by(|a, b| a.id.cmp(&b.id));
        if let Some(pair) = kus.windows(2).find(|p| p[0].id == p[1].id) {
            return Err(StoreError::DuplicateId(pair[0].id.clone()));
        }

        let mut content = String::new();
        let mut index = OffsetIndex::default();
        for ku in &kus {
            index
                .offsets
                .insert(ku.id.clone(), content.len() as u64);
            let line = serde_json::to_string(ku).map_err(|e| StoreError::Invalid {
                id: ku.id.clone(),
                message: e.to_string(),
            })?;
            content.push_str(&line);
            content.push('\n');
        }
        index.count = kus.len();

        jsonl::write_atomic(&self.records, content.as_bytes())?;
        jsonl::write_json_atomic(&self.index, &index)?;
        Ok(kus.len())
    }

    /// Verify; on an ordering or index failure, normalize once and verify again.
    pub fn verify_or_repair(&self) -> Result<RepairOutcome, StoreError> {
        match self.verify_order() {
            Ok(n) => Ok(RepairOutcome::Clean(n)),
            Err(e) if e.is_ordering() => {
                warn!(error = %e, store = %self.records.display(), "knowledge store failed strict-order check, normalizing");
                let n = self.normalize()?;
                self.verify_order()?;
                info!(records = n, "knowledge store normalized and re-verified");
                Ok(RepairOutcome::Repaired(n))
            }
            Err(e) => Err(e),
        }
    }
}

fn build_index(lines: &[jsonl::Line<KnowledgeUnit>]) -> OffsetIndex {
    OffsetIndex {
        count: lines.len(),
        offsets: lines
            .iter()
            .map(|l| (l.value.id.clone(), l.offset))
            .collect(),
    }
}
