//! Consistency and regression verification.
//!
//! Each check produces [`ConsistencyIssue`]s; a [`ConsistencyReport`]
//! composes the output of one or more checks, renders it for humans or as
//! JSON, and decides the process exit code.
//!
//! Checks never repair anything. The one sanctioned repair (knowledge
//! store normalization) lives in [`crate::knowledge`].

pub mod closure;
pub mod cmd;
pub mod duplicates;
pub mod immutability;
pub mod provenance;
pub mod regression;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::error::StoreError;
use crate::jsonl;

/// Exit code when `--strict` is set and a critical issue was found.
pub const EXIT_CRITICAL: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Severity of a count dropping by `fraction` (0.0 to 1.0):
    /// over 50% critical, over 20% high, over 10% medium, else low.
    pub fn for_drop(fraction: f64) -> Self {
        if fraction > 0.5 {
            Severity::Critical
        } else if fraction > 0.2 {
            Severity::High
        } else if fraction > 0.1 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    DuplicateChunk,
    DuplicateClaim,
    MissingChunk,
    PageMismatch,
    MissingPageMetadata,
    UngroundedClaim,
    DanglingKnowledgeRef,
    DegenerateRu,
    KuCountDrop,
    MissingDocument,
    MissingAuthor,
    KuSetChanged,
    DeletedRu,
    RelationChanged,
    ScoreDrift,
    KnowledgeIdsChanged,
    MetricDrop,
    ImmutableDeleted,
    ImmutableModified,
    ImmutableAppended,
    ImmutableNewFile,
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::String(s)) => f.write_str(&s),
            _ => write!(f, "{:?}", self),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyIssue {
    pub issue_type: IssueType,
    pub severity: Severity,
    pub subject_id: String,
    pub details: serde_json::Value,
}

impl ConsistencyIssue {
    pub fn new(
        issue_type: IssueType,
        severity: Severity,
        subject_id: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            issue_type,
            severity,
            subject_id: subject_id.into(),
            details,
        }
    }
}

/// One line of `alerts.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub timestamp: DateTime<Utc>,
    pub check: String,
    #[serde(flatten)]
    pub issue: ConsistencyIssue,
}

#[derive(Debug, Clone, Default)]
pub struct ConsistencyReport {
    checks: Vec<String>,
    issues: Vec<(String, ConsistencyIssue)>,
}

impl ConsistencyReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `check` ran and produced `issues`.
    pub fn add(&mut self, check: &str, issues: Vec<ConsistencyIssue>) {
        self.checks.push(check.to_string());
        self.issues
            .extend(issues.into_iter().map(|i| (check.to_string(), i)));
        self.issues.sort_by(|(ca, a), (cb, b)| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| a.issue_type.cmp(&b.issue_type))
                .then_with(|| a.subject_id.cmp(&b.subject_id))
                .then_with(|| ca.cmp(cb))
        });
    }

    pub fn issues(&self) -> impl Iterator<Item = &ConsistencyIssue> {
        self.issues.iter().map(|(_, i)| i)
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.issues().filter(|i| i.severity == severity).count()
    }

    pub fn has_critical(&self) -> bool {
        self.count(Severity::Critical) > 0
    }

    pub fn summary(&self) -> BTreeMap<&'static str, usize> {
        [
            Severity::Critical,
            Severity::High,
            Severity::Medium,
            Severity::Low,
        ]
        .iter()
        .map(|s| (s.as_str(), self.count(*s)))
        .collect()
    }

    /// 0 when clean or only warnings; [`EXIT_CRITICAL`] when strict and
    /// any critical issue exists.
    pub fn exit_code(&self, strict: bool) -> i32 {
        if strict && self.has_critical() {
            EXIT_CRITICAL
        } else {
            0
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "ok": !self.has_critical(),
            "checks": self.checks,
            "summary": self.summary(),
            "issues": self.issues().collect::<Vec<_>>(),
        })
    }

    pub fn render_human(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("checks: {}\n", self.checks.join(", ")));
        if self.issues.is_empty() {
            out.push_str("no issues found\n");
            return out;
        }
        for (check, issue) in &self.issues {
            out.push_str(&format!(
                "  [{:<8}] {:<24} {:<32} ({})\n",
                issue.severity,
                issue.issue_type.to_string(),
                issue.subject_id,
                check
            ));
            if !issue.details.is_null() {
                out.push_str(&format!("             {}\n", issue.details));
            }
        }
        out.push_str(&format!(
            "summary: {} critical, {} high, {} medium, {} low\n",
            self.count(Severity::Critical),
            self.count(Severity::High),
            self.count(Severity::Medium),
            self.count(Severity::Low)
        ));
        out
    }

    /// Append every issue to the alerts file. Returns the number written.
    pub fn append_alerts(&self, path: &Path) -> Result<usize, StoreError> {
        let now = Utc::now();
        for (check, issue) in &self.issues {
            jsonl::append_record(
                path,
                &AlertRecord {
                    timestamp: now,
                    check: check.clone(),
                    issue: issue.clone(),
                },
            )?;
        }
        Ok(self.issues.len())
    }
}
