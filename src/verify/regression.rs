//! Baseline regression detection.
//!
//! Three baselines are kept under `baselines/`:
//!
//! - **coverage**: per query, the KUs whose claim mentions it, the documents
//!   and authors they come from, and the minimum acceptable KU count;
//! - **reasoning**: per RU, its relation, topic, knowledge ids, and score;
//! - **metrics**: corpus-wide counts.
//!
//! Baselines are written only by `god baseline create` and are replaced
//! whole, with a version one higher than the previous file.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use super::{ConsistencyIssue, IssueType, Severity};
use crate::config::Config;
use crate::corpus::parse_filename;
use crate::jsonl;
use crate::knowledge::KnowledgeStore;
use crate::lock::RunLock;
use crate::manifest::ManifestStore;
use crate::models::{doc_id_of_chunk, KnowledgeUnit, ReasoningUnit, Relation};
use crate::reasoning::{normalize_claim, ReasoningStore};
use crate::stats::CorpusMetrics;

/// Score changes larger than this are reported as `score_drift`.
pub const SCORE_DRIFT_THRESHOLD: f64 = 0.05;

pub const COVERAGE_FILE: &str = "coverage.json";
pub const REASONING_FILE: &str = "reasoning.json";
pub const METRICS_FILE: &str = "metrics.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryBaseline {
    pub expected_ku_count: usize,
    pub expected_min_ku_count: usize,
    pub expected_documents: Vec<String>,
    pub expected_authors: Vec<String>,
    pub ku_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageBaseline {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub queries: BTreeMap<String, QueryBaseline>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuBaseline {
    pub relation: Relation,
    pub topic: String,
    pub knowledge_ids: Vec<String>,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningBaseline {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub units: BTreeMap<String, RuBaseline>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsBaseline {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub metrics: CorpusMetrics,
}

/// Resolves document ids to their path and filename author.
#[derive(Debug, Clone, Default)]
pub struct DocIndex {
    docs: HashMap<String, (String, Option<String>)>,
}

impl DocIndex {
    pub fn from_manifest(manifest: &ManifestStore) -> Self {
        let docs = manifest
            .latest_records()
            .into_iter()
            .map(|r| {
                let stem = Path::new(&r.path)
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default();
                (r.doc_id.clone(), (r.path.clone(), parse_filename(&stem).author))
            })
            .collect();
        Self { docs }
    }

    pub fn insert(&mut self, doc_id: &str, path: &str, author: Option<&str>) {
        self.docs.insert(
            doc_id.to_string(),
            (path.to_string(), author.map(|a| a.to_string())),
        );
    }

    pub fn path(&self, doc_id: &str) -> Option<&str> {
        self.docs.get(doc_id).map(|(p, _)| p.as_str())
    }

    pub fn author(&self, doc_id: &str) -> Option<&str> {
        self.docs.get(doc_id).and_then(|(_, a)| a.as_deref())
    }
}

/// Live coverage of one query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryCoverage {
    pub ku_ids: BTreeSet<String>,
    pub documents: BTreeSet<String>,
    pub authors: BTreeSet<String>,
}

/// KUs whose normalised claim contains the normalised query.
pub fn coverage_for(query: &str, kus: &[KnowledgeUnit], docs: &DocIndex) -> QueryCoverage {
    let needle = normalize_claim(query);
    let mut cov = QueryCoverage::default();
    for ku in kus {
        if needle.is_empty() || !normalize_claim(&ku.claim).contains(&needle) {
            continue;
        }
        cov.ku_ids.insert(ku.id.clone());
        for src in &ku.sources {
            let doc_id = doc_id_of_chunk(&src.chunk_id);
            if let Some(path) = docs.path(doc_id) {
                cov.documents.insert(path.to_string());
            }
            if let Some(author) = docs.author(doc_id) {
                cov.authors.insert(author.to_string());
            }
        }
    }
    cov
}

pub fn check_coverage(
    baseline: &CoverageBaseline,
    kus: &[KnowledgeUnit],
    docs: &DocIndex,
) -> Vec<ConsistencyIssue> {
    let mut issues = Vec::new();
    for (query, expected) in &baseline.queries {
        let live = coverage_for(query, kus, docs);
        let live_count = live.ku_ids.len();

        if live_count < expected.expected_min_ku_count {
            let drop = (expected.expected_min_ku_count - live_count) as f64
                / expected.expected_min_ku_count as f64;
            issues.push(ConsistencyIssue::new(
                IssueType::KuCountDrop,
                Severity::for_drop(drop),
                query,
                json!({
                    "expected_min": expected.expected_min_ku_count,
                    "live": live_count,
                    "drop_pct": (drop * 1000.0).round() / 10.0,
                }),
            ));
        }

        for doc in &expected.expected_documents {
            if !live.documents.contains(doc) {
                issues.push(ConsistencyIssue::new(
                    IssueType::MissingDocument,
                    Severity::High,
                    query,
                    json!({ "document": doc }),
                ));
            }
        }

        for author in &expected.expected_authors {
            if !live.authors.contains(author) {
                issues.push(ConsistencyIssue::new(
                    IssueType::MissingAuthor,
                    Severity::Medium,
                    query,
                    json!({ "author": author }),
                ));
            }
        }

        let snapshot: BTreeSet<String> = expected.ku_ids.iter().cloned().collect();
        if snapshot != live.ku_ids {
            let added: Vec<&String> = live.ku_ids.difference(&snapshot).collect();
            let removed: Vec<&String> = snapshot.difference(&live.ku_ids).collect();
            issues.push(ConsistencyIssue::new(
                IssueType::KuSetChanged,
                Severity::Low,
                query,
                json!({ "added": added, "removed": removed }),
            ));
        }
    }
    issues
}

pub fn check_reasoning(baseline: &ReasoningBaseline, live: &[ReasoningUnit]) -> Vec<ConsistencyIssue> {
    let by_id: HashMap<&str, &ReasoningUnit> =
        live.iter().map(|u| (u.reason_id.as_str(), u)).collect();
    let mut issues = Vec::new();

    for (id, expected) in &baseline.units {
        let ru = match by_id.get(id.as_str()) {
            Some(ru) => ru,
            None => {
                issues.push(ConsistencyIssue::new(
                    IssueType::DeletedRu,
                    Severity::Critical,
                    id,
                    json!({
                        "relation": expected.relation,
                        "knowledge_ids": expected.knowledge_ids,
                    }),
                ));
                continue;
            }
        };

        if ru.relation != expected.relation {
            issues.push(ConsistencyIssue::new(
                IssueType::RelationChanged,
                Severity::High,
                id,
                json!({ "expected": expected.relation, "live": ru.relation }),
            ));
        }
        if (ru.score - expected.score).abs() > SCORE_DRIFT_THRESHOLD {
            issues.push(ConsistencyIssue::new(
                IssueType::ScoreDrift,
                Severity::Medium,
                id,
                json!({ "expected": expected.score, "live": ru.score }),
            ));
        }
        let a: BTreeSet<&String> = expected.knowledge_ids.iter().collect();
        let b: BTreeSet<&String> = ru.knowledge_ids.iter().collect();
        if a != b {
            issues.push(ConsistencyIssue::new(
                IssueType::KnowledgeIdsChanged,
                Severity::Medium,
                id,
                json!({ "expected": expected.knowledge_ids, "live": ru.knowledge_ids }),
            ));
        }
    }
    issues
}

pub fn check_metrics(baseline: &MetricsBaseline, live: &CorpusMetrics) -> Vec<ConsistencyIssue> {
    let live_counts = live.named_counts();
    baseline
        .metrics
        .named_counts()
        .into_iter()
        .filter_map(|(name, expected)| {
            let now = live_counts.get(&name).copied().unwrap_or(0);
            if expected == 0 || now >= expected {
                return None;
            }
            let drop = (expected - now) as f64 / expected as f64;
            Some(ConsistencyIssue::new(
                IssueType::MetricDrop,
                Severity::for_drop(drop),
                name,
                json!({ "expected": expected, "live": now }),
            ))
        })
        .collect()
}

pub struct BaselinePaths {
    pub coverage: PathBuf,
    pub reasoning: PathBuf,
    pub metrics: PathBuf,
}

impl BaselinePaths {
    pub fn new(dir: &Path) -> Self {
        Self {
            coverage: dir.join(COVERAGE_FILE),
            reasoning: dir.join(REASONING_FILE),
            metrics: dir.join(METRICS_FILE),
        }
    }
}

/// Live state needed by the regression checks.
pub struct LiveState {
    pub kus: Vec<KnowledgeUnit>,
    pub rus: Vec<ReasoningUnit>,
    pub docs: DocIndex,
    pub metrics: CorpusMetrics,
}

impl LiveState {
    pub fn load(config: &Config) -> Result<Self> {
        let manifest = ManifestStore::open(&config.paths.manifest())?;
        let kus = KnowledgeStore::new(&config.paths.knowledge_dir()).load_all()?;
        // degenerate units are reported by the closure check, not rejected
        let rus = ReasoningStore::new(&config.paths.reasoning_dir()).load_raw()?;
        let metrics = CorpusMetrics::collect(&manifest, &kus, &rus);
        Ok(Self {
            docs: DocIndex::from_manifest(&manifest),
            kus,
            rus,
            metrics,
        })
    }
}

/// Run every regression check for which a baseline exists. Returns the
/// issues and the names of the baselines that were found.
pub fn run_regression_checks(config: &Config, live: &LiveState) -> Result<(Vec<ConsistencyIssue>, Vec<&'static str>)> {
    let paths = BaselinePaths::new(&config.paths.baseline_dir());
    let mut issues = Vec::new();
    let mut used = Vec::new();

    if let Some(b) = jsonl::read_json::<CoverageBaseline>(&paths.coverage)? {
        issues.extend(check_coverage(&b, &live.kus, &live.docs));
        used.push("coverage");
    }
    if let Some(b) = jsonl::read_json::<ReasoningBaseline>(&paths.reasoning)? {
        issues.extend(check_reasoning(&b, &live.rus));
        used.push("reasoning");
    }
    if let Some(b) = jsonl::read_json::<MetricsBaseline>(&paths.metrics)? {
        issues.extend(check_metrics(&b, &live.metrics));
        used.push("metrics");
    }
    Ok((issues, used))
}

fn next_version<T, F>(path: &Path, version_of: F) -> Result<u32>
where
    T: serde::de::DeserializeOwned,
    F: Fn(&T) -> u32,
{
    Ok(jsonl::read_json::<T>(path)?
        .map(|b| version_of(&b) + 1)
        .unwrap_or(1))
}

/// Snapshot current coverage for `queries`, every RU, and corpus metrics.
/// Returns the new baseline version.
pub fn create_baselines(config: &Config, queries: &[String]) -> Result<u32> {
    let _lock = RunLock::acquire(&config.paths.lock())?;
    let live = LiveState::load(config)?;
    let paths = BaselinePaths::new(&config.paths.baseline_dir());

    let version = [
        next_version::<CoverageBaseline, _>(&paths.coverage, |b| b.version)?,
        next_version::<ReasoningBaseline, _>(&paths.reasoning, |b| b.version)?,
        next_version::<MetricsBaseline, _>(&paths.metrics, |b| b.version)?,
    ]
    .into_iter()
    .max()
    .unwrap_or(1);
    let created_at = Utc::now();

    let queries = queries
        .iter()
        .map(|q| {
            let cov = coverage_for(q, &live.kus, &live.docs);
            (
                q.clone(),
                QueryBaseline {
                    expected_ku_count: cov.ku_ids.len(),
                    expected_min_ku_count: cov.ku_ids.len(),
                    expected_documents: cov.documents.into_iter().collect(),
                    expected_authors: cov.authors.into_iter().collect(),
                    ku_ids: cov.ku_ids.into_iter().collect(),
                },
            )
        })
        .collect();

    let units = live
        .rus
        .iter()
        .map(|u| {
            (
                u.reason_id.clone(),
                RuBaseline {
                    relation: u.relation,
                    topic: u.topic.clone(),
                    knowledge_ids: u.knowledge_ids.clone(),
                    score: u.score,
                },
            )
        })
        .collect();

    jsonl::write_json_atomic(
        &paths.coverage,
        &CoverageBaseline {
            version,
            created_at,
            queries,
        },
    )?;
    jsonl::write_json_atomic(
        &paths.reasoning,
        &ReasoningBaseline {
            version,
            created_at,
            units,
        },
    )?;
    jsonl::write_json_atomic(
        &paths.metrics,
        &MetricsBaseline {
            version,
            created_at,
            metrics: live.metrics,
        },
    )?;
    Ok(version)
}
