//! Corpus metrics and the `god stats` overview.
//!
//! [`CorpusMetrics`] is the single source of the counts used by `god stats`,
//! the metrics baseline, and the `metric_drop` regression check.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::Config;
use crate::knowledge::KnowledgeStore;
use crate::manifest::ManifestStore;
use crate::models::{IngestStatus, KnowledgeUnit, ReasoningUnit};
use crate::reasoning::ReasoningStore;
use crate::store::{SqliteIndex, VectorIndex};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusMetrics {
    pub documents_ok: usize,
    pub documents_failed: usize,
    pub chunks: usize,
    pub knowledge_units: usize,
    pub reasoning_units: usize,
    #[serde(default)]
    pub relations: BTreeMap<String, usize>,
}

impl CorpusMetrics {
    pub fn collect(manifest: &ManifestStore, kus: &[KnowledgeUnit], rus: &[ReasoningUnit]) -> Self {
        let mut m = CorpusMetrics {
            knowledge_units: kus.len(),
            reasoning_units: rus.len(),
            ..Default::default()
        };
        for rec in manifest.latest_records() {
            match rec.status {
                IngestStatus::Ok => {
                    m.documents_ok += 1;
                    m.chunks += rec.chunk_count;
                }
                IngestStatus::Failed => m.documents_failed += 1,
            }
        }
        for ru in rus {
            *m.relations.entry(ru.relation.to_string()).or_insert(0) += 1;
        }
        m
    }

    /// Named counts, relation counts prefixed with `relation.`.
    pub fn named_counts(&self) -> BTreeMap<String, usize> {
        let mut out = BTreeMap::new();
        out.insert("documents_ok".to_string(), self.documents_ok);
        out.insert("chunks".to_string(), self.chunks);
        out.insert("knowledge_units".to_string(), self.knowledge_units);
        out.insert("reasoning_units".to_string(), self.reasoning_units);
        for (rel, n) in &self.relations {
            out.insert(format!("relation.{}", rel), *n);
        }
        out
    }
}

/// Load the stores under `config.paths` and collect metrics.
pub fn load_metrics(config: &Config) -> Result<CorpusMetrics> {
    let manifest = ManifestStore::open(&config.paths.manifest())?;
    let kus = KnowledgeStore::new(&config.paths.knowledge_dir()).load_all()?;
    let rus = ReasoningStore::new(&config.paths.reasoning_dir()).load()?;
    Ok(CorpusMetrics::collect(&manifest, &kus, &rus))
}

pub async fn run_stats(config: &Config) -> Result<()> {
    let paths = &config.paths;
    let manifest = ManifestStore::open(&paths.manifest())?;
    let metrics = load_metrics(config)?;

    let vector_path = paths.vector_db();
    let vectors = if vector_path.exists() {
        let index = SqliteIndex::open(&vector_path).await?;
        let n = index.count().await?;
        index.close().await;
        Some(n)
    } else {
        None
    };

    let last_ingest = manifest
        .latest_records()
        .iter()
        .map(|r| r.timestamp.timestamp())
        .max();

    println!("god-learn corpus stats");
    println!("======================");
    println!();
    println!("  Data dir:    {}", paths.data_dir.display());
    println!(
        "  Manifest:    {} records ({})",
        manifest.total_records(),
        format_bytes(file_size(&paths.manifest()))
    );
    println!(
        "  Last ingest: {}",
        last_ingest
            .map(format_ts_relative)
            .unwrap_or_else(|| "never".to_string())
    );
    println!();
    println!("  Documents:   {} ok, {} failed", metrics.documents_ok, metrics.documents_failed);
    println!("  Chunks:      {}", metrics.chunks);
    match vectors {
        Some(n) => println!(
            "  Embedded:    {} ({})",
            n,
            format_bytes(file_size(&vector_path))
        ),
        None => println!("  Embedded:    0 (no vector index)"),
    }
    println!("  Knowledge:   {}", metrics.knowledge_units);
    println!("  Reasoning:   {}", metrics.reasoning_units);
    for (rel, n) in &metrics.relations {
        println!("    {:<12} {}", rel, n);
    }
    println!();
    Ok(())
}

fn file_size(path: &std::path::Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
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

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
