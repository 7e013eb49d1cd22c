//! `god dedupe`, `god provenance`, `god regress`, `god baseline`,
//! `god immutability`, `god verify`, and `god knowledge` commands.
//!
//! Report commands return the process exit code; operational failures are
//! returned as errors and exit with 1 from `main`.

use anyhow::{bail, Context, Result};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::info;

use super::closure::referential_closure;
use super::duplicates::{self, LshParams};
use super::immutability;
use super::provenance::{self, AllowedIds, GroundingInput};
use super::regression::{self, LiveState};
use super::{ConsistencyIssue, ConsistencyReport, IssueType};
use crate::config::Config;
use crate::jsonl;
use crate::knowledge::KnowledgeStore;
use crate::lock::RunLock;
use crate::models::KnowledgeUnit;
use crate::reasoning::ReasoningStore;
use crate::store::{IndexedChunk, MemoryIndex, SqliteIndex, VectorIndex};

#[derive(Debug, Clone, Copy, Default)]
pub struct ReportOptions {
    pub strict: bool,
    pub json: bool,
}

/// Print `report`, append its issues to the alert log, and return the exit code.
fn emit(config: &Config, report: &ConsistencyReport, opts: ReportOptions) -> Result<i32> {
    if opts.json {
        println!("{}", serde_json::to_string_pretty(&report.to_json())?);
    } else {
        print!("{}", report.render_human());
    }
    if !report.is_empty() {
        let n = report.append_alerts(&config.paths.alerts())?;
        info!(alerts = n, path = %config.paths.alerts().display(), "alerts appended");
    }
    Ok(report.exit_code(opts.strict))
}

/// Every chunk in the vector index; empty when no index exists yet.
async fn load_chunks(config: &Config) -> Result<Vec<IndexedChunk>> {
    let path = config.paths.vector_db();
    if !path.exists() {
        return Ok(Vec::new());
    }
    let index = SqliteIndex::open(&path).await?;
    let chunks = index.all().await?;
    index.close().await;
    Ok(chunks)
}

fn load_kus(config: &Config) -> Result<Vec<KnowledgeUnit>> {
    Ok(KnowledgeStore::new(&config.paths.knowledge_dir()).load_all()?)
}

fn chunk_duplicate_issues(
    config: &Config,
    chunks: Vec<IndexedChunk>,
    threshold: f32,
    brute_force: bool,
) -> Vec<ConsistencyIssue> {
    let items: Vec<(String, Vec<f32>)> = chunks.into_iter().map(|c| (c.id, c.embedding)).collect();
    let pairs = if brute_force {
        duplicates::find_duplicates_brute(&items, threshold)
    } else {
        duplicates::find_duplicates_lsh(&items, threshold, LshParams::from_config(&config.verify))
    };
    info!(chunks = items.len(), pairs = pairs.len(), brute_force, "chunk duplicate scan");
    duplicates::to_issues(&pairs, IssueType::DuplicateChunk)
}

fn claim_duplicate_issues(config: &Config, kus: &[KnowledgeUnit]) -> Vec<ConsistencyIssue> {
    let pairs = duplicates::find_duplicate_claims(
        kus,
        config.verify.claim_threshold,
        config.reasoning.ngram_size,
    );
    duplicates::to_issues(&pairs, IssueType::DuplicateClaim)
}

pub async fn run_dedupe(
    config: &Config,
    threshold: Option<f32>,
    brute_force: bool,
    claims: bool,
    opts: ReportOptions,
) -> Result<i32> {
    let threshold = threshold.unwrap_or(config.verify.duplicate_threshold);
    if !(0.0..=1.0).contains(&threshold) {
        bail!("--threshold must be within [0, 1], got {}", threshold);
    }

    let mut report = ConsistencyReport::new();
    let chunks = load_chunks(config).await?;
    report.add(
        "duplicate_chunks",
        chunk_duplicate_issues(config, chunks, threshold, brute_force),
    );
    if claims {
        let kus = load_kus(config)?;
        report.add("duplicate_claims", claim_duplicate_issues(config, &kus));
    }
    emit(config, &report, opts)
}

async fn provenance_issues(config: &Config, kus: &[KnowledgeUnit]) -> Result<Vec<ConsistencyIssue>> {
    let path = config.paths.vector_db();
    if !path.exists() {
        return provenance::validate_provenance(kus, &MemoryIndex::new()).await;
    }
    let index = SqliteIndex::open(&path).await?;
    let issues = provenance::validate_provenance(kus, &index).await;
    index.close().await;
    issues
}

pub async fn run_provenance(
    config: &Config,
    grounding: Option<&Path>,
    out: Option<&Path>,
    opts: ReportOptions,
) -> Result<i32> {
    if out.is_some() && grounding.is_none() {
        bail!("--out requires --grounding");
    }
    let kus = load_kus(config)?;
    let mut report = ConsistencyReport::new();
    report.add("provenance", provenance_issues(config, &kus).await?);

    if let Some(input) = grounding {
        let raw = std::fs::read_to_string(input)
            .with_context(|| format!("Failed to read grounding input: {}", input.display()))?;
        let parsed: GroundingInput = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse grounding input: {}", input.display()))?;

        let rus = ReasoningStore::new(&config.paths.reasoning_dir()).load()?;
        let chunks = load_chunks(config).await?;
        let allowed = AllowedIds::from_stores(&kus, &rus, chunks.iter().map(|c| c.id.as_str()));
        let (grounded, issues) = provenance::ground_claims(parsed.into_claims(), &allowed);
        report.add("grounding", issues);

        if let Some(out) = out {
            jsonl::write_json_atomic(out, &grounded)?;
            info!(claims = grounded.len(), path = %out.display(), "grounded claims written");
        }
    }
    emit(config, &report, opts)
}

pub fn run_regress(config: &Config, opts: ReportOptions) -> Result<i32> {
    let live = LiveState::load(config)?;
    let (issues, used) = regression::run_regression_checks(config, &live)?;
    if used.is_empty() {
        bail!(
            "no baselines found in {}; run `god baseline create` first",
            config.paths.baseline_dir().display()
        );
    }
    let mut report = ConsistencyReport::new();
    report.add(&format!("regression({})", used.join(",")), issues);
    emit(config, &report, opts)
}

pub fn run_baseline_create(config: &Config, queries: &[String]) -> Result<()> {
    let version = regression::create_baselines(config, queries)?;
    println!(
        "baselines v{} written to {} ({} queries)",
        version,
        config.paths.baseline_dir().display(),
        queries.len()
    );
    Ok(())
}

pub fn run_immutability_snapshot(config: &Config) -> Result<()> {
    let snapshot = immutability::create_snapshot(&config.paths)?;
    println!(
        "immutability snapshot v{}: {} files",
        snapshot.version,
        snapshot.files.len()
    );
    for (rel, fp) in &snapshot.files {
        println!("  {:<48} {:>10} bytes {:>8} lines", rel, fp.size, fp.line_count);
    }
    Ok(())
}

pub fn run_immutability_verify(config: &Config, opts: ReportOptions) -> Result<i32> {
    let snapshot = match immutability::load_snapshot(&config.paths)? {
        Some(s) => s,
        None => bail!("no immutability snapshot; run `god immutability snapshot` first"),
    };
    let mut report = ConsistencyReport::new();
    report.add(
        "immutability",
        immutability::verify_snapshot(&config.paths, &snapshot)?,
    );
    emit(config, &report, opts)
}

/// Every check composed into one report. Regression and immutability run
/// only when their baselines exist.
pub async fn run_verify(config: &Config, opts: ReportOptions) -> Result<i32> {
    let live = LiveState::load(config)?;
    let mut report = ConsistencyReport::new();

    let ku_ids: BTreeSet<String> = live.kus.iter().map(|k| k.id.clone()).collect();
    report.add("closure", referential_closure(&live.rus, &ku_ids));
    report.add("provenance", provenance_issues(config, &live.kus).await?);

    let chunks = load_chunks(config).await?;
    report.add(
        "duplicate_chunks",
        chunk_duplicate_issues(config, chunks, config.verify.duplicate_threshold, false),
    );
    report.add("duplicate_claims", claim_duplicate_issues(config, &live.kus));

    let (issues, used) = regression::run_regression_checks(config, &live)?;
    if !used.is_empty() {
        report.add(&format!("regression({})", used.join(",")), issues);
    }
    if let Some(snapshot) = immutability::load_snapshot(&config.paths)? {
        report.add(
            "immutability",
            immutability::verify_snapshot(&config.paths, &snapshot)?,
        );
    }
    emit(config, &report, opts)
}

pub fn run_knowledge_verify(config: &Config) -> Result<()> {
    let store = KnowledgeStore::new(&config.paths.knowledge_dir());
    let n = store
        .verify_order()
        .with_context(|| format!("{} failed verification", store.records_path().display()))?;
    println!("knowledge store ok ({} records)", n);
    Ok(())
}

pub fn run_knowledge_normalize(config: &Config) -> Result<()> {
    let _lock = RunLock::acquire(&config.paths.lock())?;
    let store = KnowledgeStore::new(&config.paths.knowledge_dir());
    let n = store.normalize()?;
    println!("knowledge store normalized ({} records)", n);
    Ok(())
}
