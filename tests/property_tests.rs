//! # Property-Based Tests
//!
//! Chunking, n-gram, and reasoning-graph invariants over generated input.

use god_learn::chunk::{chunk_paragraphs, Paragraph, PARAGRAPH_SEP};
use god_learn::config::{ChunkingConfig, ReasoningConfig};
use god_learn::models::{KnowledgeUnit, SourceRef};
use god_learn::reasoning::{build_graph, char_ngrams, jaccard, normalize_claim, BuildParams};
use proptest::collection::vec;
use proptest::prelude::*;
use std::collections::BTreeSet;

fn paragraph_strategy() -> impl Strategy<Value = Vec<(String, u32)>> {
    // (text, page increment) pairs; pages never decrease
    vec(("[a-z]{1,12}( [a-z]{1,12}){0,60}", 0u32..2), 1..30)
}

fn to_paragraphs(raw: &[(String, u32)]) -> Vec<Paragraph> {
    let mut page = 1;
    raw.iter()
        .map(|(text, step)| {
            page += step;
            Paragraph {
                text: text.clone(),
                page: Some(page),
            }
        })
        .collect()
}

fn ku(i: usize, claim: &str) -> KnowledgeUnit {
    KnowledgeUnit {
        id: format!("ku-{:03}", i),
        claim: claim.to_string(),
        sources: vec![SourceRef {
            chunk_id: format!("d:{:05}", i),
            page_range: None,
        }],
        confidence: 0.5,
        methodology: "generated".to_string(),
    }
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// Chunk text concatenation reproduces the paragraphs in order; no
    /// paragraph is split.
    #[test]
    fn chunks_preserve_paragraph_sequence(
        raw in paragraph_strategy(),
        min in 5usize..60,
        span in 0usize..60,
        extra in 0usize..60,
    ) {
        let cfg = ChunkingConfig { target_min: min, target_max: min + span, hard_max: min + span + extra };
        let paras = to_paragraphs(&raw);
        let chunks = chunk_paragraphs("doc", paras.clone(), &cfg);

        let joined: Vec<&str> = paras.iter().map(|p| p.text.as_str()).collect();
        let rebuilt: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        prop_assert_eq!(rebuilt.join(PARAGRAPH_SEP), joined.join(PARAGRAPH_SEP));

        for c in &chunks {
            for part in c.text.split(PARAGRAPH_SEP) {
                prop_assert!(joined.contains(&part));
            }
        }
    }

    /// Indices are contiguous from zero and page ranges never go backwards.
    #[test]
    fn chunk_ids_and_pages_are_monotonic(raw in paragraph_strategy()) {
        let cfg = ChunkingConfig { target_min: 20, target_max: 40, hard_max: 80 };
        let chunks = chunk_paragraphs("doc", to_paragraphs(&raw), &cfg);

        for (i, c) in chunks.iter().enumerate() {
            prop_assert_eq!(c.index, i);
            prop_assert_eq!(&c.chunk_id, &format!("doc:{:05}", i));
            prop_assert!(c.page_start <= c.page_end);
        }
        for w in chunks.windows(2) {
            prop_assert!(w[0].page_end <= w[1].page_start);
        }
    }

    /// Chunking is a pure function of paragraphs and thresholds.
    #[test]
    fn chunking_is_deterministic(raw in paragraph_strategy()) {
        let cfg = ChunkingConfig { target_min: 15, target_max: 30, hard_max: 45 };
        let a = chunk_paragraphs("doc", to_paragraphs(&raw), &cfg);
        let b = chunk_paragraphs("doc", to_paragraphs(&raw), &cfg);
        prop_assert_eq!(a, b);
    }

    /// Normalisation is idempotent and n-gram Jaccard is a symmetric value in [0, 1].
    #[test]
    fn ngram_similarity_bounds(a in "[ -~]{0,80}", b in "[ -~]{0,80}", n in 1usize..6) {
        let na = normalize_claim(&a);
        prop_assert_eq!(normalize_claim(&na), na.clone());

        let ga = char_ngrams(&na, n);
        let gb = char_ngrams(&normalize_claim(&b), n);
        let s = jaccard(&ga, &gb);
        prop_assert!((0.0..=1.0).contains(&s));
        prop_assert_eq!(s, jaccard(&gb, &ga));
        if !ga.is_empty() {
            prop_assert_eq!(jaccard(&ga, &ga), 1.0);
        }
    }

    /// Every RU links two distinct, existing KUs and the build is reproducible.
    #[test]
    fn reasoning_graph_closure_and_determinism(
        claims in vec("(mind|body|idea|affect|power|however|thus|joy) (mind|body|idea|affect|power|joy)( (is|of|the|a) (mind|body|idea|joy)){0,4}", 2..14),
        top_k in 1usize..4,
    ) {
        let kus: Vec<KnowledgeUnit> = claims.iter().enumerate().map(|(i, c)| ku(i, c)).collect();
        let mut params = BuildParams::from_config(&ReasoningConfig::default());
        params.top_k = top_k;

        let first = build_graph(&kus, None, &params);
        let second = build_graph(&kus, None, &params);
        prop_assert_eq!(&first.units, &second.units);

        let ids: BTreeSet<&String> = kus.iter().map(|k| &k.id).collect();
        for ru in &first.units {
            let linked: BTreeSet<&String> = ru.knowledge_ids.iter().collect();
            prop_assert_eq!(linked.len(), 2);
            prop_assert!(linked.iter().all(|id| ids.contains(id)));
            prop_assert!((0.0..=1.0).contains(&ru.score));
        }
        prop_assert_eq!(first.stats.pairs_considered, kus.len() * (kus.len() - 1) / 2);
    }
}
