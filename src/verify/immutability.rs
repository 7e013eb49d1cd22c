//! Append-only enforcement for record files.
//!
//! A snapshot fingerprints every `.jsonl` file under the designated
//! locations. Verification compares live files against it: a file may grow
//! (its old bytes intact) but must never shrink, change, or disappear.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::{ConsistencyIssue, IssueType, Severity};
use crate::config::PathsConfig;
use crate::jsonl;

pub const SNAPSHOT_FILE: &str = "immutability.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFingerprint {
    pub sha256: String,
    pub size: u64,
    pub mtime: i64,
    pub line_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImmutabilitySnapshot {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    /// Keyed by path relative to the data dir, `/`-separated.
    pub files: BTreeMap<String, FileFingerprint>,
}

pub fn snapshot_path(paths: &PathsConfig) -> PathBuf {
    paths.baseline_dir().join(SNAPSHOT_FILE)
}

/// Every `.jsonl` file at or below `roots`, keyed relative to `base`.
fn collect_artifacts(base: &Path, roots: &[PathBuf]) -> BTreeMap<String, PathBuf> {
    let mut out = BTreeMap::new();
    for root in roots {
        for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|e| e.to_str()) != Some("jsonl")
            {
                continue;
            }
            let rel = path
                .strip_prefix(base)
                .unwrap_or(path)
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.insert(rel, path.to_path_buf());
        }
    }
    out
}

/// SHA-256 of the first `limit` bytes of `path` (all of it when `None`),
/// plus the number of newlines in that prefix.
fn hash_prefix(path: &Path, limit: Option<u64>) -> Result<(String, u64, usize)> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut reader: Box<dyn Read> = match limit {
        Some(n) => Box::new(BufReader::new(file).take(n)),
        None => Box::new(BufReader::new(file)),
    };
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut total = 0u64;
    let mut lines = 0usize;
    loop {
        let n = reader
            .read(&mut buf)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
        lines += buf[..n].iter().filter(|b| **b == b'\n').count();
    }
    Ok((format!("{:x}", hasher.finalize()), total, lines))
}

pub fn fingerprint(path: &Path) -> Result<FileFingerprint> {
    let (sha256, size, line_count) = hash_prefix(path, None)?;
    let mtime = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map(|t| DateTime::<Utc>::from(t).timestamp())
        .unwrap_or(0);
    Ok(FileFingerprint {
        sha256,
        size,
        mtime,
        line_count,
    })
}

/// Fingerprint the designated artifacts and persist the snapshot.
pub fn create_snapshot(paths: &PathsConfig) -> Result<ImmutabilitySnapshot> {
    let target = snapshot_path(paths);
    let version = jsonl::read_json::<ImmutabilitySnapshot>(&target)?
        .map(|s| s.version + 1)
        .unwrap_or(1);

    let mut files = BTreeMap::new();
    for (rel, path) in collect_artifacts(&paths.data_dir, &paths.immutable_artifacts()) {
        files.insert(rel, fingerprint(&path)?);
    }
    let snapshot = ImmutabilitySnapshot {
        version,
        created_at: Utc::now(),
        files,
    };
    jsonl::write_json_atomic(&target, &snapshot)?;
    Ok(snapshot)
}

/// Compare the live artifacts against `snapshot`.
pub fn verify_snapshot(paths: &PathsConfig, snapshot: &ImmutabilitySnapshot) -> Result<Vec<ConsistencyIssue>> {
    let live = collect_artifacts(&paths.data_dir, &paths.immutable_artifacts());
    let mut issues = Vec::new();

    for (rel, expected) in &snapshot.files {
        let path = match live.get(rel) {
            Some(p) => p,
            None => {
                issues.push(ConsistencyIssue::new(
                    IssueType::ImmutableDeleted,
                    Severity::Critical,
                    rel,
                    json!({ "expected_size": expected.size }),
                ));
                continue;
            }
        };
        let now = fingerprint(path)?;
        if now.sha256 == expected.sha256 {
            continue;
        }
        if now.size > expected.size {
            let (prefix, _, _) = hash_prefix(path, Some(expected.size))?;
            if prefix == expected.sha256 {
                issues.push(ConsistencyIssue::new(
                    IssueType::ImmutableAppended,
                    Severity::Low,
                    rel,
                    json!({
                        "added_bytes": now.size - expected.size,
                        "added_lines": now.line_count.saturating_sub(expected.line_count),
                    }),
                ));
                continue;
            }
        }
        issues.push(ConsistencyIssue::new(
            IssueType::ImmutableModified,
            Severity::Critical,
            rel,
            json!({
                "expected_sha256": expected.sha256,
                "live_sha256": now.sha256,
                "expected_size": expected.size,
                "live_size": now.size,
            }),
        ));
    }

    for rel in live.keys().filter(|k| !snapshot.files.contains_key(*k)) {
        issues.push(ConsistencyIssue::new(
            IssueType::ImmutableNewFile,
            Severity::Low,
            rel,
            json!({}),
        ));
    }
    Ok(issues)
}

/// Load the persisted snapshot, if any.
pub fn load_snapshot(paths: &PathsConfig) -> Result<Option<ImmutabilitySnapshot>> {
    Ok(jsonl::read_json(&snapshot_path(paths))?)
}
