use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::builder::{BuildOutput, BuildParams};
use crate::error::StoreError;
use crate::jsonl;
use crate::models::{sha256_hex, KnowledgeUnit, ReasoningUnit};

pub const RECORDS_FILE: &str = "reasoning_units.jsonl";
pub const INDEX_FILE: &str = "index.json";

/// Run statistics written next to the reasoning records. Carries no
/// timestamp, so an unchanged KU set reproduces the file exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningIndex {
    pub ku_count: usize,
    pub ru_count: usize,
    pub pairs_considered: usize,
    pub pair_cap_hit: bool,
    pub edges_pre_prune: usize,
    pub edges_post_prune: usize,
    pub relation_counts: BTreeMap<String, usize>,
    pub params: serde_json::Value,
    pub query: Option<String>,
    /// SHA-256 over the sorted KU ids, newline-joined.
    pub ku_set_hash: String,
}

impl ReasoningIndex {
    pub fn new(
        kus: &[KnowledgeUnit],
        output: &BuildOutput,
        params: &BuildParams,
        query: Option<&str>,
    ) -> Self {
        Self {
            ku_count: kus.len(),
            ru_count: output.units.len(),
            pairs_considered: output.stats.pairs_considered,
            pair_cap_hit: output.stats.pair_cap_hit,
            edges_pre_prune: output.stats.edges_pre_prune,
            edges_post_prune: output.stats.edges_post_prune,
            relation_counts: output.stats.relation_counts.clone(),
            params: serde_json::to_value(params).unwrap_or(serde_json::Value::Null),
            query: query.map(|q| q.to_string()),
            ku_set_hash: ku_set_hash(kus),
        }
    }
}

pub fn ku_set_hash(kus: &[KnowledgeUnit]) -> String {
    let mut ids: Vec<&str> = kus.iter().map(|k| k.id.as_str()).collect();
    ids.sort_unstable();
    sha256_hex(ids.join("\n").as_bytes())
}

#[derive(Debug, Clone)]
pub struct ReasoningStore {
    records: PathBuf,
    index: PathBuf,
}

impl ReasoningStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            records: dir.join(RECORDS_FILE),
            index: dir.join(INDEX_FILE),
        }
    }

    pub fn records_path(&self) -> &Path {
        &self.records
    }

    /// All units, validated, in file order.
    pub fn load(&self) -> Result<Vec<ReasoningUnit>, StoreError> {
        let lines = jsonl::read_records::<ReasoningUnit>(&self.records)?;
        lines
            .into_iter()
            .map(|l| {
                l.value.validate().map_err(|e| StoreError::Malformed {
                    path: self.records.clone(),
                    line: l.line,
                    message: e.to_string(),
                })?;
                Ok(l.value)
            })
            .collect()
    }

    /// Units as stored, without per-record validation. Verification loads
    /// through here so degenerate units surface as issues.
    pub fn load_raw(&self) -> Result<Vec<ReasoningUnit>, StoreError> {
        Ok(jsonl::read_records::<ReasoningUnit>(&self.records)?
            .into_iter()
            .map(|l| l.value)
            .collect())
    }

    pub fn load_index(&self) -> Result<Option<ReasoningIndex>, StoreError> {
        jsonl::read_json(&self.index)
    }

    /// Atomically replace records and index.
    pub fn replace(&self, units: &[ReasoningUnit], index: &ReasoningIndex) -> Result<(), StoreError> {
        for u in units {
            u.validate()?;
        }
        let content = jsonl::to_lines(units).map_err(|e| StoreError::Invalid {
            id: self.records.display().to_string(),
            message: e.to_string(),
        })?;
        jsonl::write_atomic(&self.records, content.as_bytes())?;
        jsonl::write_json_atomic(&self.index, index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::test_support::ku;
    use crate::reasoning::build_graph;
    use tempfile::TempDir;

    #[test]
    fn replace_then_load_round_trips_and_is_stable() {
        let tmp = TempDir::new().unwrap();
        let store = ReasoningStore::new(tmp.path());
        let kus = vec![
            ku("a", "The mind is the idea of the body.", "d:00000", None),
            ku("b", "The mind is the idea of the body itself.", "d:00001", None),
        ];
        let params = BuildParams::default();
        let out = build_graph(&kus, None, &params);
        let index = ReasoningIndex::new(&kus, &out, &params, None);

        store.replace(&out.units, &index).unwrap();
        let first = std::fs::read(store.records_path()).unwrap();
        let first_index = std::fs::read(tmp.path().join(INDEX_FILE)).unwrap();

        store.replace(&out.units, &index).unwrap();
        assert_eq!(std::fs::read(store.records_path()).unwrap(), first);
        assert_eq!(std::fs::read(tmp.path().join(INDEX_FILE)).unwrap(), first_index);

        assert_eq!(store.load().unwrap(), out.units);
        assert_eq!(store.load_index().unwrap().unwrap().ru_count, out.units.len());
    }

    #[test]
    fn degenerate_unit_is_rejected_on_load() {
        let tmp = TempDir::new().unwrap();
        let store = ReasoningStore::new(tmp.path());
        let line = r#"{"reason_id":"r1","relation":"support","topic":"all","knowledge_ids":["a"],"score":0.5,"evidence":{"ngram_size":4,"shared_ngrams":1,"shared_ngram_sample":[],"markers":[]},"hash":"h"}"#;
        std::fs::write(store.records_path(), format!("{}\n", line)).unwrap();
        assert!(matches!(store.load(), Err(StoreError::Malformed { line: 1, .. })));

        let raw = store.load_raw().unwrap();
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].knowledge_ids, vec!["a".to_string()]);
    }

    #[test]
    fn ku_set_hash_ignores_order() {
        let a = vec![ku("x", "c", "d:0", None), ku("y", "c", "d:0", None)];
        let b = vec![ku("y", "c", "d:0", None), ku("x", "c", "d:0", None)];
        assert_eq!(ku_set_hash(&a), ku_set_hash(&b));
    }
}
