//! Reasoning graph: lexical relations between Knowledge Units.
//!
//! Claims are compared by character n-gram Jaccard similarity and a small
//! set of discourse markers. Every Reasoning Unit id is derived from its
//! content, so rebuilding over an unchanged KU set reproduces the same
//! files byte for byte.

pub mod builder;
pub mod store;

use anyhow::{bail, Result};
use std::collections::BTreeSet;
use tracing::info;

use crate::config::Config;
use crate::knowledge::{KnowledgeStore, RepairOutcome};
use crate::lock::RunLock;
use crate::verify::closure::referential_closure;

pub use builder::{build_graph, BuildOutput, BuildParams, BuildStats};
pub use store::{ReasoningIndex, ReasoningStore};

pub const CONTRAST_MARKERS: &[&str] = &[
    "however",
    "but",
    "whereas",
    "although",
    "yet",
    "on the other hand",
    "in contrast",
    "conversely",
    "nevertheless",
    "nonetheless",
];

/// Normalised forms: `e.g.` becomes `e g`, `i.e.` becomes `i e`.
pub const ELABORATION_MARKERS: &[&str] = &[
    "e g",
    "i e",
    "for example",
    "for instance",
    "specifically",
    "in particular",
    "therefore",
    "thus",
    "namely",
];

/// Lowercase, replace non-alphanumerics with spaces, collapse whitespace.
pub fn normalize_claim(text: &str) -> String {
    let mapped: String = text
        .chars()
        .flat_map(|c| c.to_lowercase())
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Character n-grams of already-normalised text. Text shorter than `n`
/// yields itself as the only gram; empty text yields none.
pub fn char_ngrams(normalized: &str, n: usize) -> BTreeSet<String> {
    let chars: Vec<char> = normalized.chars().collect();
    if chars.is_empty() || n == 0 {
        return BTreeSet::new();
    }
    if chars.len() < n {
        return std::iter::once(normalized.to_string()).collect();
    }
    chars.windows(n).map(|w| w.iter().collect()).collect()
}

pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let inter = a.intersection(b).count();
    let union = a.len() + b.len() - inter;
    if union == 0 {
        0.0
    } else {
        inter as f64 / union as f64
    }
}

/// Markers from `markers` that occur as whole words in normalised text.
pub fn find_markers(normalized: &str, markers: &[&str]) -> Vec<String> {
    let padded = format!(" {} ", normalized);
    markers
        .iter()
        .filter(|m| padded.contains(&format!(" {} ", m)))
        .map(|m| m.to_string())
        .collect()
}

/// Build the reasoning graph from the knowledge store and replace the
/// reasoning store with it.
pub async fn run_reason(
    config: &Config,
    query: Option<String>,
    max_pairs: Option<usize>,
    top_k: Option<usize>,
) -> Result<()> {
    let paths = &config.paths;
    let _lock = RunLock::acquire(&paths.lock())?;

    let knowledge = KnowledgeStore::new(&paths.knowledge_dir());
    if let RepairOutcome::Repaired(n) = knowledge.verify_or_repair()? {
        println!("knowledge store normalized ({} records)", n);
    }
    let kus = knowledge.load_all()?;

    let mut params = BuildParams::from_config(&config.reasoning);
    if let Some(m) = max_pairs {
        params.max_pairs = m;
    }
    if let Some(k) = top_k {
        params.top_k = k;
    }
    if params.max_pairs == 0 || params.top_k == 0 {
        bail!("--max-pairs and --top-k must be >= 1");
    }

    let output = build_graph(&kus, query.as_deref(), &params);

    let ku_ids: BTreeSet<String> = kus.iter().map(|k| k.id.clone()).collect();
    let violations = referential_closure(&output.units, &ku_ids);
    if !violations.is_empty() {
        bail!(
            "refusing to write reasoning store: {} referential-closure violation(s), first: {}",
            violations.len(),
            violations[0].details
        );
    }

    let store = ReasoningStore::new(&paths.reasoning_dir());
    let index = ReasoningIndex::new(&kus, &output, &params, query.as_deref());
    store.replace(&output.units, &index)?;

    info!(
        rus = output.units.len(),
        pairs = output.stats.pairs_considered,
        "reasoning store written"
    );

    println!("reason ok");
    println!("  knowledge units:  {}", output.stats.ku_count);
    println!("  pairs considered: {}", output.stats.pairs_considered);
    if output.stats.pair_cap_hit {
        println!("  pair cap reached: {}", params.max_pairs);
    }
    println!("  edges pre-prune:  {}", output.stats.edges_pre_prune);
    println!("  edges post-prune: {}", output.stats.edges_post_prune);
    for (relation, count) in &output.stats.relation_counts {
        println!("    {:<12} {}", relation, count);
    }
    Ok(())
}
