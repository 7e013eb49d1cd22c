//! Near-duplicate detection for chunk embeddings and KU claims.
//!
//! Chunks are bucketed with random-hyperplane LSH: `tables` independent
//! signatures of `bits` hyperplanes each. Only pairs sharing a bucket in
//! some table are compared exactly. The hyperplanes come from a ChaCha8
//! generator seeded with `seed`, so buckets are identical on every
//! platform.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeSet, HashMap};

use super::{ConsistencyIssue, IssueType, Severity};
use crate::config::VerifyConfig;
use crate::embedding::cosine_similarity;
use crate::models::KnowledgeUnit;
use crate::reasoning::{char_ngrams, jaccard, normalize_claim};

/// Similarity at or above which a duplicate is `high` rather than `medium`.
pub const HIGH_SIMILARITY: f64 = 0.99;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LshParams {
    pub bits: usize,
    pub tables: usize,
    pub seed: u64,
}

impl LshParams {
    pub fn from_config(cfg: &VerifyConfig) -> Self {
        Self {
            bits: cfg.lsh_bits,
            tables: cfg.lsh_tables,
            seed: cfg.lsh_seed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicatePair {
    pub a: String,
    pub b: String,
    pub similarity: f64,
}

/// Random hyperplanes for every table, drawn in table-major order.
pub struct Hyperplanes {
    planes: Vec<Vec<Vec<f32>>>,
}

impl Hyperplanes {
    pub fn new(params: LshParams, dims: usize) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
        let planes = (0..params.tables)
            .map(|_| {
                (0..params.bits)
                    .map(|_| (0..dims).map(|_| rng.gen_range(-1.0f32..1.0)).collect())
                    .collect()
            })
            .collect();
        Self { planes }
    }

    /// One `bits`-wide signature per table.
    pub fn signatures(&self, v: &[f32]) -> Vec<u64> {
        self.planes
            .iter()
            .map(|table| {
                table.iter().enumerate().fold(0u64, |sig, (bit, plane)| {
                    let dot: f32 = plane.iter().zip(v).map(|(p, x)| p * x).sum();
                    if dot >= 0.0 {
                        sig | (1u64 << bit)
                    } else {
                        sig
                    }
                })
            })
            .collect()
    }
}

fn sort_pairs(pairs: &mut [DuplicatePair]) {
    pairs.sort_by(|x, y| {
        y.similarity
            .partial_cmp(&x.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| x.a.cmp(&y.a))
            .then_with(|| x.b.cmp(&y.b))
    });
}

fn verify_candidates(
    items: &[(String, Vec<f32>)],
    candidates: Vec<(usize, usize)>,
    threshold: f32,
) -> Vec<DuplicatePair> {
    let mut pairs: Vec<DuplicatePair> = candidates
        .par_iter()
        .filter_map(|&(i, j)| {
            let sim = cosine_similarity(&items[i].1, &items[j].1);
            if sim >= threshold {
                let (a, b) = if items[i].0 <= items[j].0 { (i, j) } else { (j, i) };
                Some(DuplicatePair {
                    a: items[a].0.clone(),
                    b: items[b].0.clone(),
                    similarity: sim as f64,
                })
            } else {
                None
            }
        })
        .collect();
    sort_pairs(&mut pairs);
    pairs
}

/// Pairs with cosine similarity >= `threshold`, found via LSH buckets.
pub fn find_duplicates_lsh(
    items: &[(String, Vec<f32>)],
    threshold: f32,
    params: LshParams,
) -> Vec<DuplicatePair> {
    let dims = match items.first() {
        Some((_, v)) => v.len(),
        None => return Vec::new(),
    };
    let planes = Hyperplanes::new(params, dims);

    let mut buckets: HashMap<(usize, u64), Vec<usize>> = HashMap::new();
    for (i, (_, v)) in items.iter().enumerate() {
        if v.len() != dims {
            continue;
        }
        for (table, sig) in planes.signatures(v).into_iter().enumerate() {
            buckets.entry((table, sig)).or_default().push(i);
        }
    }

    let mut candidates = BTreeSet::new();
    for members in buckets.values() {
        for x in 0..members.len() {
            for y in (x + 1)..members.len() {
                candidates.insert((members[x], members[y]));
            }
        }
    }

    verify_candidates(items, candidates.into_iter().collect(), threshold)
}

/// Exhaustive O(n²) comparison, for small corpora and for checking LSH.
pub fn find_duplicates_brute(items: &[(String, Vec<f32>)], threshold: f32) -> Vec<DuplicatePair> {
    let candidates = (0..items.len())
        .flat_map(|i| ((i + 1)..items.len()).map(move |j| (i, j)))
        .collect();
    verify_candidates(items, candidates, threshold)
}

/// KU pairs whose normalised claims have n-gram Jaccard >= `threshold`.
pub fn find_duplicate_claims(
    kus: &[KnowledgeUnit],
    threshold: f64,
    ngram_size: usize,
) -> Vec<DuplicatePair> {
    let mut sorted: Vec<&KnowledgeUnit> = kus.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));
    let grams: Vec<BTreeSet<String>> = sorted
        .iter()
        .map(|k| char_ngrams(&normalize_claim(&k.claim), ngram_size))
        .collect();

    let mut pairs: Vec<DuplicatePair> = (0..sorted.len())
        .into_par_iter()
        .flat_map_iter(|i| {
            let grams = &grams;
            let sorted = &sorted;
            ((i + 1)..sorted.len()).filter_map(move |j| {
                let sim = jaccard(&grams[i], &grams[j]);
                (sim >= threshold).then(|| DuplicatePair {
                    a: sorted[i].id.clone(),
                    b: sorted[j].id.clone(),
                    similarity: sim,
                })
            })
        })
        .collect();
    sort_pairs(&mut pairs);
    pairs
}

fn severity_for(similarity: f64) -> Severity {
    if similarity >= HIGH_SIMILARITY {
        Severity::High
    } else {
        Severity::Medium
    }
}

pub fn to_issues(pairs: &[DuplicatePair], issue_type: IssueType) -> Vec<ConsistencyIssue> {
    pairs
        .iter()
        .map(|p| {
            ConsistencyIssue::new(
                issue_type,
                severity_for(p.similarity),
                format!("{}|{}", p.a, p.b),
                json!({
                    "a": p.a,
                    "b": p.b,
                    "similarity": (p.similarity * 1e6).round() / 1e6,
                }),
            )
        })
        .collect()
}
