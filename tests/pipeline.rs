//! Library-level pipeline tests: ingest into an in-memory index, promote
//! claims, build the reasoning graph, and verify the result. Fully offline.

use std::collections::BTreeSet;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use god_learn::config::Config;
use god_learn::embedding::{EmbeddingGateway, HashingProvider, RetryPolicy};
use god_learn::ingest::{ingest_corpus, EmbedSink, IngestOptions};
use god_learn::knowledge::KnowledgeStore;
use god_learn::manifest::ManifestStore;
use god_learn::models::{IngestStatus, KnowledgeUnit, PageRange, Phase, SourceRef};
use god_learn::progress::NoProgress;
use god_learn::reasoning::{build_graph, BuildParams, ReasoningIndex, ReasoningStore};
use god_learn::store::{MemoryIndex, VectorIndex};
use god_learn::verify::closure::referential_closure;
use god_learn::verify::provenance::validate_provenance;
use god_learn::verify::regression::{check_reasoning, ReasoningBaseline, RuBaseline};
use god_learn::verify::{IssueType, Severity};

const ETHICS: &str = "The mind is the idea of the body.\n\nThe idea of the mind is united to the mind as the mind is united to the body.";
const AFFECTS: &str = "Joy is the passage to a greater perfection.\n\nHowever, sadness is the passage to a lesser perfection.";

fn gateway() -> EmbeddingGateway {
    EmbeddingGateway::new(
        Arc::new(HashingProvider::new(48)),
        RetryPolicy {
            batch_size: 4,
            max_retries: 1,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            max_split_depth: 4,
            max_input_chars: 32_000,
        },
    )
}

struct Fixture {
    tmp: TempDir,
    config: Config,
}

impl Fixture {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let corpus = tmp.path().join("corpus");
        fs::create_dir_all(corpus.join("spinoza")).unwrap();
        fs::write(corpus.join("spinoza/Spinoza - Ethics (1677).md"), ETHICS).unwrap();
        fs::write(corpus.join("spinoza/Spinoza_1677_Affects.txt"), AFFECTS).unwrap();
        let config = Config::with_data_dir(tmp.path().join("data"));
        Self { tmp, config }
    }

    fn root(&self) -> std::path::PathBuf {
        self.tmp.path().join("corpus")
    }

    async fn ingest(&self, index: &MemoryIndex, gw: &EmbeddingGateway) -> (ManifestStore, god_learn::ingest::IngestSummary) {
        let mut manifest = ManifestStore::open(&self.config.paths.manifest()).unwrap();
        let summary = ingest_corpus(
            &self.config,
            &self.root(),
            &mut manifest,
            Some(EmbedSink { gateway: gw, index }),
            IngestOptions::default(),
            &NoProgress,
        )
        .await
        .unwrap();
        (manifest, summary)
    }
}

fn ku(id: &str, claim: &str, chunk_id: &str, pages: Option<(u32, u32)>) -> KnowledgeUnit {
    KnowledgeUnit {
        id: id.to_string(),
        claim: claim.to_string(),
        sources: vec![SourceRef {
            chunk_id: chunk_id.to_string(),
            page_range: pages.map(|(a, b)| PageRange(a, b)),
        }],
        confidence: 0.8,
        methodology: "close-reading".to_string(),
    }
}

#[tokio::test]
async fn unchanged_files_are_skipped_not_reembedded() {
    let fx = Fixture::new();
    let index = MemoryIndex::new();
    let gw = gateway();

    let (_, first) = fx.ingest(&index, &gw).await;
    assert_eq!((first.ok, first.failed, first.skipped), (2, 0, 0));
    assert!(first.gateway.calls > 0);

    let (manifest, second) = fx.ingest(&index, &gw).await;
    assert_eq!((second.ok, second.failed, second.skipped), (0, 0, 2));
    assert_eq!(second.gateway.calls, 0);
    assert_eq!(manifest.total_records(), 2);
}

#[tokio::test]
async fn chunk_phase_success_does_not_satisfy_embed_phase() {
    let fx = Fixture::new();
    let mut manifest = ManifestStore::open(&fx.config.paths.manifest()).unwrap();
    let chunked = ingest_corpus(&fx.config, &fx.root(), &mut manifest, None, IngestOptions::default(), &NoProgress)
        .await
        .unwrap();
    assert_eq!(chunked.ok, 2);
    assert!(manifest.latest_records().iter().all(|r| r.phase == Phase::Chunk));

    let index = MemoryIndex::new();
    let (manifest, embedded) = fx.ingest(&index, &gateway()).await;
    assert_eq!(embedded.ok, 2);
    assert_eq!(embedded.skipped, 0);
    assert!(manifest
        .latest_records()
        .iter()
        .all(|r| r.phase == Phase::Embed && r.status == IngestStatus::Ok));
    assert_eq!(index.count().await.unwrap(), embedded.chunks);
}

#[tokio::test]
async fn promoted_claims_flow_through_reasoning_and_verification() {
    let fx = Fixture::new();
    let index = MemoryIndex::new();
    let (manifest, _) = fx.ingest(&index, &gateway()).await;

    let ethics = manifest.latest("spinoza/Spinoza - Ethics (1677).md").unwrap();
    let affects = manifest.latest("spinoza/Spinoza_1677_Affects.txt").unwrap();
    let ethics_chunk = format!("{}:00000", ethics.doc_id);
    let affects_chunk = format!("{}:00000", affects.doc_id);

    let stored = index.get(&[ethics_chunk.clone()]).await.unwrap();
    assert_eq!(stored[0].metadata.author.as_deref(), Some("Spinoza"));
    assert_eq!(stored[0].metadata.year, Some(1677));

    let store = KnowledgeStore::new(&fx.config.paths.knowledge_dir());
    let kus = vec![
        ku("ku-01", "The mind is the idea of the body.", &ethics_chunk, None),
        ku("ku-02", "The idea of the mind is united to the mind.", &ethics_chunk, None),
        ku("ku-03", "Joy is the passage to a greater perfection.", &affects_chunk, None),
        ku("ku-04", "However, sadness is the passage to a lesser perfection.", &affects_chunk, None),
    ];
    for k in &kus {
        store.append(k).unwrap();
    }
    let kus = store.load_all().unwrap();

    assert!(validate_provenance(&kus, &index).await.unwrap().is_empty());

    // a text source carries no page metadata, so a cited page is flagged
    let paged = vec![ku("ku-99", "Joy.", &affects_chunk, Some((1, 1)))];
    let issues = validate_provenance(&paged, &index).await.unwrap();
    assert_eq!(issues[0].issue_type, IssueType::MissingPageMetadata);

    let params = BuildParams::default();
    let output = build_graph(&kus, None, &params);
    assert!(!output.units.is_empty());
    assert!(output
        .units
        .iter()
        .any(|u| u.relation.as_str() == "contrast" && u.knowledge_ids.contains(&"ku-04".to_string())));

    let ids: BTreeSet<String> = kus.iter().map(|k| k.id.clone()).collect();
    assert!(referential_closure(&output.units, &ids).is_empty());

    let reasoning = ReasoningStore::new(&fx.config.paths.reasoning_dir());
    reasoning
        .replace(&output.units, &ReasoningIndex::new(&kus, &output, &params, None))
        .unwrap();
    let live = reasoning.load().unwrap();
    assert_eq!(live, output.units);

    // snapshot every RU, then lose one
    let baseline = ReasoningBaseline {
        version: 1,
        created_at: chrono::Utc::now(),
        units: live
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
            .collect(),
    };
    assert!(check_reasoning(&baseline, &live).is_empty());

    let issues = check_reasoning(&baseline, &live[1..]);
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].issue_type, IssueType::DeletedRu);
    assert_eq!(issues[0].severity, Severity::Critical);
    assert_eq!(issues[0].subject_id, live[0].reason_id);
}
