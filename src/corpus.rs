//! Corpus discovery: walk the corpus root and select matching files.
//!
//! The scan only selects paths. Content is hashed and read one document at
//! a time during ingest, so a large corpus is never held in memory and one
//! unreadable file cannot abort the run. Results are sorted by relative
//! path so a scan is deterministic.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

use crate::config::CorpusConfig;
use crate::models::{doc_id_for, sha256_hex, Document, FilenameMeta};

/// A file selected by the scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusEntry {
    pub path: PathBuf,
    /// Path relative to the corpus root, `/`-separated.
    pub path_rel: String,
}

impl CorpusEntry {
    /// Hash the file (streamed) and describe it.
    pub fn describe(&self) -> std::io::Result<Document> {
        let file = File::open(&self.path)?;
        let modified: DateTime<Utc> = file
            .metadata()?
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| DateTime::<Utc>::from(std::time::UNIX_EPOCH));

        let mut reader = BufReader::new(file);
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        let content_hash = format!("{:x}", hasher.finalize());
        Ok(self.document(content_hash, modified))
    }

    /// Describe a file that could not be read. It is keyed by the empty
    /// content hash, which never matches a readable file's `ok` record.
    pub fn unreadable(&self) -> Document {
        self.document(
            sha256_hex(b""),
            DateTime::<Utc>::from(std::time::UNIX_EPOCH),
        )
    }

    fn document(&self, content_hash: String, modified: DateTime<Utc>) -> Document {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        Document {
            path: self.path.clone(),
            path_rel: self.path_rel.clone(),
            doc_id: doc_id_for(&self.path_rel, &content_hash),
            content_hash,
            meta: parse_filename(&stem),
            modified,
        }
    }
}

/// Select every file under `root` matching the corpus globs.
///
/// Only a missing root or a bad glob is an error. A walk error on an entry
/// that matches the globs (a dangling symlink, say) still yields the entry
/// so ingest records it as failed; any other walk error is logged.
pub fn scan_corpus(root: &Path, corpus: &CorpusConfig) -> Result<Vec<CorpusEntry>> {
    if !root.exists() {
        bail!("Corpus root does not exist: {}", root.display());
    }

    let include_set = build_globset(&corpus.include_globs)?;

    let mut default_excludes = vec!["**/.git/**".to_string(), "**/.*".to_string()];
    default_excludes.extend(corpus.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;
    let selected = |rel: &str| !exclude_set.is_match(rel) && include_set.is_match(rel);

    let mut entries = Vec::new();

    let walker = WalkDir::new(root).follow_links(corpus.follow_symlinks);
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                match e.path() {
                    Some(path) if selected(&relative_path(root, path)) => {
                        entries.push(CorpusEntry {
                            path: path.to_path_buf(),
                            path_rel: relative_path(root, path),
                        });
                    }
                    _ => warn!(error = %e, "skipping corpus entry"),
                }
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let rel_str = relative_path(root, entry.path());
        if !selected(&rel_str) {
            continue;
        }

        entries.push(CorpusEntry {
            path: entry.path().to_path_buf(),
            path_rel: rel_str,
        });
    }

    entries.sort_by(|a, b| a.path_rel.cmp(&b.path_rel));
    Ok(entries)
}

fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Parse a filename stem into author/title/year/qualifier.
///
/// Recognised shapes:
/// - `Author - Title (Year) [Qualifier]` (year and qualifier optional)
/// - `Author_Year_Title` (underscores in the title become spaces)
///
/// Anything else yields `title = stem` with no other fields.
pub fn parse_filename(stem: &str) -> FilenameMeta {
    let stem = stem.trim();

    if let Some((author, rest)) = stem.split_once(" - ") {
        let mut rest = rest.trim().to_string();

        let mut qualifier = None;
        if rest.ends_with(']') {
            if let Some(open) = rest.rfind('[') {
                let q = rest[open + 1..rest.len() - 1].trim().to_string();
                if !q.is_empty() {
                    qualifier = Some(q);
                }
                rest.truncate(open);
                rest = rest.trim_end().to_string();
            }
        }

        let mut year = None;
        if rest.ends_with(')') {
            if let Some(open) = rest.rfind('(') {
                if let Some(y) = parse_year(&rest[open + 1..rest.len() - 1]) {
                    year = Some(y);
                    rest.truncate(open);
                    rest = rest.trim_end().to_string();
                }
            }
        }

        let author = author.trim();
        if !author.is_empty() && !rest.is_empty() {
            return FilenameMeta {
                author: Some(author.to_string()),
                title: rest,
                year,
                qualifier,
            };
        }
    }

    let parts: Vec<&str> = stem.splitn(3, '_').collect();
    if parts.len() == 3 && !parts[0].is_empty() && !parts[2].is_empty() {
        if let Some(year) = parse_year(parts[1]) {
            return FilenameMeta {
                author: Some(parts[0].to_string()),
                title: parts[2].replace('_', " "),
                year: Some(year),
                qualifier: None,
            };
        }
    }

    FilenameMeta {
        author: None,
        title: stem.to_string(),
        year: None,
        qualifier: None,
    }
}

fn parse_year(s: &str) -> Option<u16> {
    let s = s.trim();
    if s.len() == 4 && s.bytes().all(|b| b.is_ascii_digit()) {
        s.parse().ok()
    } else {
        None
    }
}
