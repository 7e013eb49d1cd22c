//! Ingestion pipeline orchestration.
//!
//! Coordinates the full ingest flow: scan → hash and skip decision → read →
//! extraction → chunking → embedding → vector upsert → manifest record.
//! Every document that is not skipped gets exactly one manifest record per
//! run, `ok` or `failed`, including documents that cannot be read. A document whose chunks cannot all be embedded is failed as a
//! whole and nothing of it is written to the vector index.

use anyhow::Result;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::chunk::chunk_document;
use crate::config::Config;
use crate::corpus::scan_corpus;
use crate::embedding::{create_provider, EmbeddingGateway, GatewayStats};
use crate::extract::extract_text;
use crate::lock::RunLock;
use crate::manifest::{failed_record, ok_record, ManifestStore};
use crate::models::{Chunk, Document, Phase};
use crate::progress::{DocOutcome, IngestProgressEvent, IngestProgressReporter};
use crate::store::{ChunkMetadata, SqliteIndex, VectorIndex};

#[derive(Debug, Clone, Copy, Default)]
pub struct IngestOptions {
    /// Ignore the manifest's skip decision.
    pub force: bool,
    /// Report counts without writing anything.
    pub dry_run: bool,
    /// Process at most this many (non-skipped) files.
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub ok: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total: usize,
    pub chunks: usize,
    pub gateway: GatewayStats,
}

/// Where embedded chunks go. Without a sink, ingestion stops at the chunk phase.
pub struct EmbedSink<'a> {
    pub gateway: &'a EmbeddingGateway,
    pub index: &'a dyn VectorIndex,
}

enum DocResult {
    Ok(usize),
    Failed(String),
}

/// Ingest every matching file under `root` into `manifest` (and `sink`,
/// when present).
pub async fn ingest_corpus(
    config: &Config,
    root: &Path,
    manifest: &mut ManifestStore,
    sink: Option<EmbedSink<'_>>,
    opts: IngestOptions,
    progress: &dyn IngestProgressReporter,
) -> Result<IngestSummary> {
    let phase = if sink.is_some() { Phase::Embed } else { Phase::Chunk };

    progress.report(IngestProgressEvent::Discovering {
        root: root.display().to_string(),
    });
    let entries = scan_corpus(root, &config.corpus)?;
    let total = entries.len() as u64;

    let mut summary = IngestSummary {
        total: entries.len(),
        ..Default::default()
    };
    let mut processed = 0usize;

    for (i, entry) in entries.iter().enumerate() {
        let described = entry.describe();
        let unchanged = match &described {
            Ok(doc) => !opts.force && manifest.should_skip(&doc.path_rel, &doc.content_hash, phase),
            Err(_) => false,
        };

        let outcome = if unchanged {
            debug!(path = %entry.path_rel, "unchanged, skipping");
            summary.skipped += 1;
            DocOutcome::Skipped
        } else if opts.limit.map(|l| processed >= l).unwrap_or(false) {
            summary.skipped += 1;
            DocOutcome::Skipped
        } else {
            processed += 1;
            let (doc, result) = match described {
                Ok(doc) => {
                    let result = if opts.dry_run {
                        match chunk_file(config, &doc) {
                            Ok(chunks) => DocResult::Ok(chunks.len()),
                            Err(e) => DocResult::Failed(e),
                        }
                    } else {
                        process_file(config, &doc, sink.as_ref(), &mut summary.gateway).await
                    };
                    (doc, result)
                }
                Err(e) => (entry.unreadable(), DocResult::Failed(format!("read failed: {}", e))),
            };

            match result {
                DocResult::Ok(n) => {
                    if !opts.dry_run {
                        manifest.append(ok_record(&doc, n, phase))?;
                    }
                    summary.ok += 1;
                    summary.chunks += n;
                    DocOutcome::Ok
                }
                DocResult::Failed(err) => {
                    warn!(path = %doc.path_rel, error = %err, "document failed");
                    if !opts.dry_run {
                        manifest.append(failed_record(&doc, &err, phase))?;
                    }
                    summary.failed += 1;
                    DocOutcome::Failed
                }
            }
        };

        progress.report(IngestProgressEvent::Document {
            path: entry.path_rel.clone(),
            outcome,
            n: i as u64 + 1,
            total,
        });
    }

    Ok(summary)
}

fn chunk_file(config: &Config, doc: &Document) -> Result<Vec<Chunk>, String> {
    let bytes = std::fs::read(&doc.path).map_err(|e| format!("read failed: {}", e))?;
    let extracted = extract_text(&doc.path, &bytes).map_err(|e| e.to_string())?;
    let chunks = chunk_document(&doc.doc_id, &extracted, &config.chunking);
    if chunks.is_empty() {
        return Err("no extractable text".to_string());
    }
    Ok(chunks)
}

async fn process_file(
    config: &Config,
    doc: &Document,
    sink: Option<&EmbedSink<'_>>,
    stats: &mut GatewayStats,
) -> DocResult {
    let chunks = match chunk_file(config, doc) {
        Ok(c) => c,
        Err(e) => return DocResult::Failed(e),
    };
    let sink = match sink {
        Some(s) => s,
        None => return DocResult::Ok(chunks.len()),
    };

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let partial = sink.gateway.embed_partial(&texts, false).await;
    stats.merge(&partial.stats);

    let failures: Vec<String> = partial
        .results
        .iter()
        .filter_map(|r| r.as_ref().err().map(|e| e.to_string()))
        .collect();
    if let Some(first) = failures.first() {
        return DocResult::Failed(format!(
            "embedding failed for {} of {} chunks: {}",
            failures.len(),
            chunks.len(),
            first
        ));
    }
    let embeddings: Vec<Vec<f32>> = partial.results.into_iter().filter_map(|r| r.ok()).collect();

    let ids: Vec<String> = chunks.iter().map(|c| c.chunk_id.clone()).collect();
    let metadatas: Vec<ChunkMetadata> = chunks
        .iter()
        .map(|c| ChunkMetadata::for_chunk(doc, c))
        .collect();
    if let Err(e) = sink.index.upsert(&ids, &texts, &embeddings, &metadatas).await {
        return DocResult::Failed(format!("vector upsert failed: {:#}", e));
    }
    DocResult::Ok(chunks.len())
}

/// `god ingest`: resolve the corpus root, wire up the provider and vector
/// index, ingest, and print a summary.
pub async fn run_ingest(
    config: &Config,
    root: Option<&Path>,
    opts: IngestOptions,
    progress: &dyn IngestProgressReporter,
) -> Result<()> {
    let root = match root.or(config.corpus.root.as_deref()) {
        Some(r) => r.to_path_buf(),
        None => anyhow::bail!("No corpus root: pass --root or set corpus.root in the config"),
    };

    let _lock = if opts.dry_run {
        None
    } else {
        Some(RunLock::acquire(&config.paths.lock())?)
    };
    let mut manifest = ManifestStore::open(&config.paths.manifest())?;

    let (summary, phase) = if config.embedding.is_enabled() && !opts.dry_run {
        let provider = create_provider(&config.embedding)?;
        let gateway = EmbeddingGateway::from_config(provider, &config.embedding);
        let index = SqliteIndex::open(&config.paths.vector_db()).await?;
        let sink = EmbedSink {
            gateway: &gateway,
            index: &index,
        };
        let summary = ingest_corpus(config, &root, &mut manifest, Some(sink), opts, progress).await;
        index.close().await;
        (summary?, Phase::Embed)
    } else {
        let phase = if config.embedding.is_enabled() {
            Phase::Embed
        } else {
            Phase::Chunk
        };
        let summary = ingest_corpus(config, &root, &mut manifest, None, opts, progress).await?;
        (summary, phase)
    };

    info!(
        ok = summary.ok,
        failed = summary.failed,
        skipped = summary.skipped,
        calls = summary.gateway.calls,
        splits = summary.gateway.splits,
        retries = summary.gateway.retries,
        failed_items = summary.gateway.failed_items,
        "ingest finished"
    );

    if opts.dry_run {
        println!("ingest {} (dry-run)", root.display());
    } else {
        println!("ingest {} ({} phase)", root.display(), phase);
    }
    println!("  files found: {}", summary.total);
    println!("  ok:          {}", summary.ok);
    println!("  failed:      {}", summary.failed);
    println!("  skipped:     {}", summary.skipped);
    println!("  chunks:      {}", summary.chunks);
    if phase == Phase::Embed && !opts.dry_run {
        println!(
            "  embedding:   {} calls, {} splits, {} retries, {} failed items",
            summary.gateway.calls,
            summary.gateway.splits,
            summary.gateway.retries,
            summary.gateway.failed_items
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{HashingProvider, RetryPolicy};
    use crate::models::IngestStatus;
    use crate::progress::NoProgress;
    use crate::store::MemoryIndex;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Config) {
        let tmp = TempDir::new().unwrap();
        let corpus = tmp.path().join("corpus");
        fs::create_dir_all(&corpus).unwrap();
        fs::write(corpus.join("Spinoza - Ethics (1677).md"), "The mind is the idea of the body.\n\nDesire is the essence of man.").unwrap();
        fs::write(corpus.join("empty.txt"), "   \n\n").unwrap();
        let config = Config::with_data_dir(tmp.path().join("data"));
        (tmp, config)
    }

    fn gateway() -> EmbeddingGateway {
        EmbeddingGateway::new(
            Arc::new(HashingProvider::new(32)),
            RetryPolicy {
                batch_size: 8,
                max_retries: 1,
                base_delay: std::time::Duration::from_millis(1),
                max_delay: std::time::Duration::from_millis(2),
                max_split_depth: 4,
                max_input_chars: 32_000,
            },
        )
    }

    #[tokio::test]
    async fn embeds_and_records_one_line_per_document() {
        let (tmp, config) = setup();
        let mut manifest = ManifestStore::open(&config.paths.manifest()).unwrap();
        let index = MemoryIndex::new();
        let gw = gateway();
        let sink = EmbedSink {
            gateway: &gw,
            index: &index,
        };

        let summary = ingest_corpus(
            &config,
            &tmp.path().join("corpus"),
            &mut manifest,
            Some(sink),
            IngestOptions::default(),
            &NoProgress,
        )
        .await
        .unwrap();

        assert_eq!(summary.ok, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(manifest.total_records(), 2);
        assert_eq!(index.count().await.unwrap(), summary.chunks);

        let empty = manifest.latest("empty.txt").unwrap();
        assert_eq!(empty.status, IngestStatus::Failed);
        assert_eq!(empty.error.as_deref(), Some("no extractable text"));
    }

    #[tokio::test]
    async fn second_run_skips_unchanged_documents() {
        let (tmp, config) = setup();
        let root = tmp.path().join("corpus");
        let mut manifest = ManifestStore::open(&config.paths.manifest()).unwrap();
        ingest_corpus(&config, &root, &mut manifest, None, IngestOptions::default(), &NoProgress)
            .await
            .unwrap();

        let again = ingest_corpus(&config, &root, &mut manifest, None, IngestOptions::default(), &NoProgress)
            .await
            .unwrap();
        assert_eq!(again.skipped, 1);
        // the failed document is retried
        assert_eq!(again.failed, 1);
        assert_eq!(manifest.total_records(), 3);
    }

    #[tokio::test]
    async fn dry_run_writes_nothing() {
        let (tmp, config) = setup();
        let mut manifest = ManifestStore::open(&config.paths.manifest()).unwrap();
        let opts = IngestOptions {
            dry_run: true,
            ..Default::default()
        };
        let summary = ingest_corpus(&config, &tmp.path().join("corpus"), &mut manifest, None, opts, &NoProgress)
            .await
            .unwrap();
        assert_eq!(summary.ok, 1);
        assert_eq!(manifest.total_records(), 0);
        assert!(!config.paths.manifest().exists());
    }

    #[tokio::test]
    async fn limit_caps_processed_files() {
        let (tmp, config) = setup();
        let mut manifest = ManifestStore::open(&config.paths.manifest()).unwrap();
        let opts = IngestOptions {
            limit: Some(1),
            ..Default::default()
        };
        let summary = ingest_corpus(&config, &tmp.path().join("corpus"), &mut manifest, None, opts, &NoProgress)
            .await
            .unwrap();
        assert_eq!(summary.ok + summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(manifest.total_records(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unreadable_file_is_recorded_and_run_continues() {
        let tmp = TempDir::new().unwrap();
        let corpus = tmp.path().join("corpus");
        fs::create_dir_all(&corpus).unwrap();
        fs::write(corpus.join("a.md"), "Joy is the passage to a greater perfection.").unwrap();
        std::os::unix::fs::symlink(corpus.join("missing.md"), corpus.join("broken.md")).unwrap();
        fs::write(corpus.join("z.md"), "Sadness is the passage to a lesser perfection.").unwrap();
        let mut config = Config::with_data_dir(tmp.path().join("data"));
        config.corpus.follow_symlinks = true;

        let mut manifest = ManifestStore::open(&config.paths.manifest()).unwrap();
        let summary = ingest_corpus(&config, &corpus, &mut manifest, None, IngestOptions::default(), &NoProgress)
            .await
            .unwrap();

        assert_eq!((summary.ok, summary.failed, summary.total), (2, 1, 3));
        assert_eq!(manifest.total_records(), 3);
        let broken = manifest.latest("broken.md").unwrap();
        assert_eq!(broken.status, IngestStatus::Failed);
        assert!(broken.error.as_deref().unwrap().starts_with("read failed"));
        assert_eq!(manifest.latest("z.md").unwrap().status, IngestStatus::Ok);

        // an unreadable file is retried, not skipped
        let again = ingest_corpus(&config, &corpus, &mut manifest, None, IngestOptions::default(), &NoProgress)
            .await
            .unwrap();
        assert_eq!((again.skipped, again.failed), (2, 1));
    }
}
