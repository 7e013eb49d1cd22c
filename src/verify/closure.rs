use serde_json::json;
use std::collections::BTreeSet;

use super::{ConsistencyIssue, IssueType, Severity};
use crate::models::ReasoningUnit;

/// Every RU must link at least two distinct KUs, all of which exist.
pub fn referential_closure(
    units: &[ReasoningUnit],
    ku_ids: &BTreeSet<String>,
) -> Vec<ConsistencyIssue> {
    let mut issues = Vec::new();
    for ru in units {
        let distinct: BTreeSet<&String> = ru.knowledge_ids.iter().collect();
        if distinct.len() < 2 {
            issues.push(ConsistencyIssue::new(
                IssueType::DegenerateRu,
                Severity::Critical,
                &ru.reason_id,
                json!({ "knowledge_ids": ru.knowledge_ids }),
            ));
        }
        for id in distinct {
            if !ku_ids.contains(id) {
                issues.push(ConsistencyIssue::new(
                    IssueType::DanglingKnowledgeRef,
                    Severity::Critical,
                    &ru.reason_id,
                    json!({ "knowledge_id": id }),
                ));
            }
        }
    }
    issues
}
