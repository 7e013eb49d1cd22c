//! Provenance validation and claim grounding.
//!
//! Every KU source must point at a chunk that exists in the vector index,
//! and a cited page range must lie within the chunk's recorded pages.
//!
//! Downstream synthesis output is grounded separately: each claim may only
//! cite ids from [`AllowedIds`]. Assertions citing anything else (or
//! nothing) are demoted to inferences with their supports removed.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeSet, HashMap};

use super::{ConsistencyIssue, IssueType, Severity};
use crate::models::{KnowledgeUnit, ReasoningUnit};
use crate::store::{ChunkMetadata, VectorIndex};

pub async fn validate_provenance(
    kus: &[KnowledgeUnit],
    index: &dyn VectorIndex,
) -> Result<Vec<ConsistencyIssue>> {
    let chunk_ids: Vec<String> = kus
        .iter()
        .flat_map(|k| k.sources.iter().map(|s| s.chunk_id.clone()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let found: HashMap<String, ChunkMetadata> = index
        .get(&chunk_ids)
        .await?
        .into_iter()
        .map(|e| (e.id, e.metadata))
        .collect();

    Ok(check_sources(kus, &found))
}

fn check_sources(kus: &[KnowledgeUnit], found: &HashMap<String, ChunkMetadata>) -> Vec<ConsistencyIssue> {
    let mut issues = Vec::new();
    for ku in kus {
        for src in &ku.sources {
            let meta = match found.get(&src.chunk_id) {
                Some(m) => m,
                None => {
                    issues.push(ConsistencyIssue::new(
                        IssueType::MissingChunk,
                        Severity::Critical,
                        &ku.id,
                        json!({ "chunk_id": src.chunk_id }),
                    ));
                    continue;
                }
            };
            let cited = match src.page_range {
                Some(r) => r,
                None => continue,
            };
            match (meta.page_start, meta.page_end) {
                (Some(start), Some(end)) => {
                    if !cited.within(start, end) {
                        issues.push(ConsistencyIssue::new(
                            IssueType::PageMismatch,
                            Severity::High,
                            &ku.id,
                            json!({
                                "chunk_id": src.chunk_id,
                                "cited": [cited.start(), cited.end()],
                                "chunk_pages": [start, end],
                            }),
                        ));
                    }
                }
                _ => issues.push(ConsistencyIssue::new(
                    IssueType::MissingPageMetadata,
                    Severity::High,
                    &ku.id,
                    json!({
                        "chunk_id": src.chunk_id,
                        "cited": [cited.start(), cited.end()],
                    }),
                )),
            }
        }
    }
    issues
}

/// Ids a synthesis claim may cite: KU ids, RU ids, and chunk ids.
#[derive(Debug, Clone, Default)]
pub struct AllowedIds(BTreeSet<String>);

impl AllowedIds {
    pub fn from_stores<'a>(
        kus: &[KnowledgeUnit],
        rus: &[ReasoningUnit],
        chunk_ids: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let mut ids: BTreeSet<String> = kus.iter().map(|k| k.id.clone()).collect();
        ids.extend(rus.iter().map(|r| r.reason_id.clone()));
        ids.extend(chunk_ids.into_iter().map(|c| c.to_string()));
        Self(ids)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.contains(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimKind {
    Assertion,
    Inference,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisClaim {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: ClaimKind,
    #[serde(default)]
    pub supports: Vec<String>,
}

/// A grounding input file: a bare array or `{"claims": [...]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum GroundingInput {
    List(Vec<SynthesisClaim>),
    Wrapped { claims: Vec<SynthesisClaim> },
}

impl GroundingInput {
    pub fn into_claims(self) -> Vec<SynthesisClaim> {
        match self {
            GroundingInput::List(c) => c,
            GroundingInput::Wrapped { claims } => claims,
        }
    }
}

/// Ground `claims` against `allowed`, returning the rewritten claims and
/// one issue per claim that had to change.
pub fn ground_claims(
    claims: Vec<SynthesisClaim>,
    allowed: &AllowedIds,
) -> (Vec<SynthesisClaim>, Vec<ConsistencyIssue>) {
    let mut issues = Vec::new();
    let grounded = claims
        .into_iter()
        .enumerate()
        .map(|(i, mut claim)| {
            let invalid: Vec<String> = claim
                .supports
                .iter()
                .filter(|s| !allowed.contains(s))
                .cloned()
                .collect();
            match claim.kind {
                ClaimKind::Assertion if !invalid.is_empty() || claim.supports.is_empty() => {
                    issues.push(ConsistencyIssue::new(
                        IssueType::UngroundedClaim,
                        Severity::High,
                        format!("claim[{}]", i),
                        json!({
                            "text": claim.text,
                            "invalid_supports": invalid,
                            "action": "demoted_to_inference",
                        }),
                    ));
                    claim.kind = ClaimKind::Inference;
                    claim.supports.clear();
                }
                ClaimKind::Inference if !invalid.is_empty() => {
                    issues.push(ConsistencyIssue::new(
                        IssueType::UngroundedClaim,
                        Severity::Low,
                        format!("claim[{}]", i),
                        json!({
                            "text": claim.text,
                            "invalid_supports": invalid,
                            "action": "supports_filtered",
                        }),
                    ));
                    claim.supports.retain(|s| allowed.contains(s));
                }
                _ => {}
            }
            claim
        })
        .collect();
    (grounded, issues)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::test_support::ku;
    use crate::store::test_support::meta;
    use crate::store::MemoryIndex;

    #[tokio::test]
    async fn flags_missing_chunks_and_page_problems() {
        let index = MemoryIndex::new();
        index
            .upsert(
                &["d:00000".to_string(), "t:00000".to_string()],
                &["x".to_string(), "y".to_string()],
                &[vec![1.0], vec![1.0]],
                &[meta("d", 0, Some((3, 5))), meta("t", 0, None)],
            )
            .await
            .unwrap();

        let kus = vec![
            ku("ok", "c", "d:00000", Some((3, 4))),
            ku("outside", "c", "d:00000", Some((4, 6))),
            ku("nopages", "c", "t:00000", Some((1, 1))),
            ku("gone", "c", "d:00009", None),
            ku("unpaged", "c", "t:00000", None),
            ku("whole", "c", "d:00000", None),
        ];
        let issues = validate_provenance(&kus, &index).await.unwrap();
        let find = |id: &str| issues.iter().find(|i| i.subject_id == id).map(|i| (i.issue_type, i.severity));

        assert_eq!(find("ok"), None);
        assert_eq!(find("unpaged"), None);
        assert_eq!(find("whole"), None);
        assert_eq!(find("outside"), Some((IssueType::PageMismatch, Severity::High)));
        assert_eq!(find("nopages"), Some((IssueType::MissingPageMetadata, Severity::High)));
        assert_eq!(find("gone"), Some((IssueType::MissingChunk, Severity::Critical)));
    }

    #[test]
    fn ungrounded_assertions_are_demoted() {
        let allowed = AllowedIds::from_stores(
            &[ku("ku-1", "c", "d:00000", None)],
            &[],
            ["d:00000"],
        );
        let input: GroundingInput = serde_json::from_str(
            r#"{"claims": [
                {"text": "grounded", "type": "assertion", "supports": ["ku-1"]},
                {"text": "invented", "type": "assertion", "supports": ["ku-1", "ku-404"]},
                {"text": "bare", "type": "assertion"},
                {"text": "guess", "type": "inference", "supports": ["d:00000", "nope"]}
            ]}"#,
        )
        .unwrap();

        let (claims, issues) = ground_claims(input.into_claims(), &allowed);
        assert_eq!(claims[0].kind, ClaimKind::Assertion);
        assert_eq!(claims[1].kind, ClaimKind::Inference);
        assert!(claims[1].supports.is_empty());
        assert_eq!(claims[2].kind, ClaimKind::Inference);
        assert_eq!(claims[3].supports, vec!["d:00000".to_string()]);
        assert_eq!(issues.len(), 3);
        assert!(issues.iter().all(|i| i.issue_type == IssueType::UngroundedClaim));
    }

    #[test]
    fn bare_array_input_parses() {
        let input: GroundingInput =
            serde_json::from_str(r#"[{"text": "t", "type": "inference"}]"#).unwrap();
        assert_eq!(input.into_claims().len(), 1);
    }
}
