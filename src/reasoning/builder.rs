//! Pairwise relation builder.
//!
//! KUs are sorted by id and grouped into one topic bucket. Every unordered
//! pair in the bucket (up to `max_pairs`) is scored in parallel and
//! classified, in priority order:
//!
//! 1. `contrast`: score >= `t_low` and either claim has a contrast marker
//! 2. `elaboration`: score >= `t_low` and either claim has an elaboration marker
//! 3. `inheritance`: score >= `t_high`
//! 4. `support`: score >= `t_low`
//!
//! Each KU then keeps only its `top_k` strongest incident edges. Output is
//! sorted by `(topic, relation, reason_id)`.

use rayon::prelude::*;
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::{char_ngrams, find_markers, jaccard, normalize_claim, CONTRAST_MARKERS, ELABORATION_MARKERS};
use crate::config::ReasoningConfig;
use crate::models::{sha256_hex, Evidence, KnowledgeUnit, ReasoningUnit, Relation};

pub const DEFAULT_TOPIC: &str = "all";

/// Length (hex chars) of reasoning unit ids.
pub const REASON_ID_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildParams {
    pub t_low: f64,
    pub t_high: f64,
    pub max_pairs: usize,
    pub top_k: usize,
    pub ngram_size: usize,
    pub sample_size: usize,
}

impl BuildParams {
    pub fn from_config(cfg: &ReasoningConfig) -> Self {
        Self {
            t_low: cfg.t_low,
            t_high: cfg.t_high,
            max_pairs: cfg.max_pairs,
            top_k: cfg.top_k,
            ngram_size: cfg.ngram_size,
            sample_size: cfg.sample_size,
        }
    }
}

impl Default for BuildParams {
    fn default() -> Self {
        Self::from_config(&ReasoningConfig::default())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildStats {
    pub ku_count: usize,
    pub bucket_size: usize,
    pub pairs_considered: usize,
    pub pair_cap_hit: bool,
    pub edges_pre_prune: usize,
    pub edges_post_prune: usize,
    pub relation_counts: BTreeMap<String, usize>,
}

#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub units: Vec<ReasoningUnit>,
    pub stats: BuildStats,
}

struct Prepared<'a> {
    ku: &'a KnowledgeUnit,
    grams: BTreeSet<String>,
    contrast: Vec<String>,
    elaboration: Vec<String>,
}

/// Build the graph. Pure: the same KUs and parameters give the same output.
pub fn build_graph(kus: &[KnowledgeUnit], query: Option<&str>, params: &BuildParams) -> BuildOutput {
    let mut sorted: Vec<&KnowledgeUnit> = kus.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    let (topic, bucket): (String, Vec<&KnowledgeUnit>) = match query {
        Some(q) if !q.trim().is_empty() => {
            let nq = normalize_claim(q);
            let members = sorted
                .iter()
                .copied()
                .filter(|k| normalize_claim(&k.claim).contains(&nq))
                .collect();
            (q.trim().to_string(), members)
        }
        _ => (DEFAULT_TOPIC.to_string(), sorted),
    };

    let prepared: Vec<Prepared> = bucket
        .iter()
        .map(|ku| {
            let norm = normalize_claim(&ku.claim);
            Prepared {
                ku,
                grams: char_ngrams(&norm, params.ngram_size),
                contrast: find_markers(&norm, CONTRAST_MARKERS),
                elaboration: find_markers(&norm, ELABORATION_MARKERS),
            }
        })
        .collect();

    let mut pairs = Vec::new();
    let mut cap_hit = false;
    'outer: for i in 0..prepared.len() {
        for j in (i + 1)..prepared.len() {
            if pairs.len() >= params.max_pairs {
                cap_hit = true;
                break 'outer;
            }
            pairs.push((i, j));
        }
    }

    let edges: Vec<ReasoningUnit> = pairs
        .par_iter()
        .filter_map(|&(i, j)| score_pair(&prepared[i], &prepared[j], &topic, params))
        .collect();

    let edges_pre_prune = edges.len();
    let mut units = prune_top_k(edges, params.top_k);
    units.sort_by(|a, b| {
        a.topic
            .cmp(&b.topic)
            .then_with(|| a.relation.as_str().cmp(b.relation.as_str()))
            .then_with(|| a.reason_id.cmp(&b.reason_id))
    });

    let mut relation_counts = BTreeMap::new();
    for ru in &units {
        *relation_counts.entry(ru.relation.to_string()).or_insert(0) += 1;
    }

    BuildOutput {
        stats: BuildStats {
            ku_count: kus.len(),
            bucket_size: prepared.len(),
            pairs_considered: pairs.len(),
            pair_cap_hit: cap_hit,
            edges_pre_prune,
            edges_post_prune: units.len(),
            relation_counts,
        },
        units,
    }
}

fn score_pair(a: &Prepared, b: &Prepared, topic: &str, params: &BuildParams) -> Option<ReasoningUnit> {
    let score = jaccard(&a.grams, &b.grams);

    let union = |x: &[String], y: &[String]| -> Vec<String> {
        x.iter().chain(y.iter()).cloned().collect::<BTreeSet<_>>().into_iter().collect()
    };

    let (relation, markers) = if score >= params.t_low && !(a.contrast.is_empty() && b.contrast.is_empty()) {
        (Relation::Contrast, union(&a.contrast, &b.contrast))
    } else if score >= params.t_low && !(a.elaboration.is_empty() && b.elaboration.is_empty()) {
        (Relation::Elaboration, union(&a.elaboration, &b.elaboration))
    } else if score >= params.t_high {
        (Relation::Inheritance, Vec::new())
    } else if score >= params.t_low {
        (Relation::Support, Vec::new())
    } else {
        return None;
    };

    let shared: Vec<&String> = a.grams.intersection(&b.grams).collect();
    let sample: Vec<String> = shared
        .iter()
        .take(params.sample_size)
        .map(|s| s.to_string())
        .collect();
    let knowledge_ids = vec![a.ku.id.clone(), b.ku.id.clone()];

    let canonical = json!({
        "relation": relation.as_str(),
        "topic": topic,
        "knowledge_ids": knowledge_ids,
        "shared_ngram_sample": sample,
    });
    let mut reason_id = sha256_hex(canonical.to_string().as_bytes());
    reason_id.truncate(REASON_ID_LEN);

    let score = (score * 1e6).round() / 1e6;
    let evidence = Evidence {
        ngram_size: params.ngram_size,
        shared_ngrams: shared.len(),
        shared_ngram_sample: sample,
        markers,
    };
    let hash = unit_hash(&reason_id, relation, topic, &knowledge_ids, score, &evidence);

    Some(ReasoningUnit {
        reason_id,
        relation,
        topic: topic.to_string(),
        knowledge_ids,
        score,
        evidence,
        hash,
    })
}

/// SHA-256 over every field of a unit except `hash` itself.
pub fn unit_hash(
    reason_id: &str,
    relation: Relation,
    topic: &str,
    knowledge_ids: &[String],
    score: f64,
    evidence: &Evidence,
) -> String {
    let body = json!({
        "reason_id": reason_id,
        "relation": relation.as_str(),
        "topic": topic,
        "knowledge_ids": knowledge_ids,
        "score": score,
        "evidence": evidence,
    });
    sha256_hex(body.to_string().as_bytes())
}

/// Keep the union of every KU's `k` strongest edges (ties by `reason_id`).
fn prune_top_k(edges: Vec<ReasoningUnit>, k: usize) -> Vec<ReasoningUnit> {
    let mut incident: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, e) in edges.iter().enumerate() {
        for id in &e.knowledge_ids {
            incident.entry(id.as_str()).or_default().push(i);
        }
    }

    let mut keep = BTreeSet::new();
    for list in incident.values_mut() {
        list.sort_by(|&x, &y| {
            edges[y]
                .score
                .partial_cmp(&edges[x].score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| edges[x].reason_id.cmp(&edges[y].reason_id))
        });
        keep.extend(list.iter().take(k).copied());
    }

    edges
        .into_iter()
        .enumerate()
        .filter(|(i, _)| keep.contains(i))
        .map(|(_, e)| e)
        .collect()
}
