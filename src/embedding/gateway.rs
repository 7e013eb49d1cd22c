//! Adaptive batch-retry client in front of an [`EmbeddingProvider`].
//!
//! Inputs are sent in batches of `batch_size`. A failed batch of more than
//! one text is split in half and each half is retried independently, down
//! to `max_split_depth` halvings. A single text (or a batch past the split
//! limit) is retried up to `max_retries` times on transient errors only.
//! One bad input therefore fails only itself.
//!
//! The work is driven by an explicit worklist rather than recursion.

use rand::Rng;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{EmbedError, EmbeddingProvider};
use crate::config::EmbeddingConfig;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub batch_size: usize,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_split_depth: u32,
    /// Longer inputs are cut to this many chars before sending.
    pub max_input_chars: usize,
}

impl RetryPolicy {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_split_depth: config.max_split_depth,
            max_input_chars: config.max_input_tokens * crate::chunk::CHARS_PER_TOKEN,
        }
    }

    /// `base * 2^attempt`, capped at `max_delay`, plus up to 50% jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let exp = base_ms.saturating_mul(1u64 << attempt.min(20));
        let capped = exp.min(self.max_delay.as_millis() as u64);
        let jitter = if capped > 0 {
            rand::thread_rng().gen_range(0..=capped / 2)
        } else {
            0
        };
        Duration::from_millis(capped + jitter)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayStats {
    pub calls: usize,
    pub splits: usize,
    pub retries: usize,
    pub failed_items: usize,
}

impl GatewayStats {
    pub fn merge(&mut self, other: &GatewayStats) {
        self.calls += other.calls;
        self.splits += other.splits;
        self.retries += other.retries;
        self.failed_items += other.failed_items;
    }
}

/// Per-input outcome of [`EmbeddingGateway::embed_partial`], in input order.
#[derive(Debug)]
pub struct PartialEmbedding {
    pub results: Vec<Result<Vec<f32>, EmbedError>>,
    pub stats: GatewayStats,
}

#[derive(Debug, Clone, Copy)]
struct Work {
    start: usize,
    len: usize,
    depth: u32,
    attempt: u32,
}

pub struct EmbeddingGateway {
    provider: Arc<dyn EmbeddingProvider>,
    policy: RetryPolicy,
    query_prefix: Option<String>,
    document_prefix: Option<String>,
}

impl EmbeddingGateway {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, policy: RetryPolicy) -> Self {
        Self {
            provider,
            policy,
            query_prefix: None,
            document_prefix: None,
        }
    }

    pub fn from_config(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Self {
        Self {
            provider,
            policy: RetryPolicy::from_config(config),
            query_prefix: config.query_prefix.clone(),
            document_prefix: config.document_prefix.clone(),
        }
    }

    pub fn dims(&self) -> usize {
        self.provider.dims()
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Embed every text or fail. The result has exactly `texts.len()`
    /// vectors of the provider's dimensionality.
    pub async fn embed(&self, texts: &[String], is_query: bool) -> Result<Vec<Vec<f32>>, EmbedError> {
        let partial = self.embed_partial(texts, is_query).await;
        partial.results.into_iter().collect()
    }

    /// Embed every text, reporting failures per item.
    pub async fn embed_partial(&self, texts: &[String], is_query: bool) -> PartialEmbedding {
        let prepared: Vec<String> = texts.iter().map(|t| self.prepare(t, is_query)).collect();
        let mut results: Vec<Option<Result<Vec<f32>, EmbedError>>> = vec![None; prepared.len()];
        let mut stats = GatewayStats::default();

        let mut queue: VecDeque<Work> = (0..prepared.len())
            .step_by(self.policy.batch_size)
            .map(|start| Work {
                start,
                len: self.policy.batch_size.min(prepared.len() - start),
                depth: 0,
                attempt: 0,
            })
            .collect();

        while let Some(work) = queue.pop_front() {
            let batch = &prepared[work.start..work.start + work.len];
            stats.calls += 1;

            let outcome = self
                .provider
                .embed(batch, is_query)
                .await
                .and_then(|vectors| self.validate(vectors, work.len));

            let err = match outcome {
                Ok(vectors) => {
                    for (i, v) in vectors.into_iter().enumerate() {
                        results[work.start + i] = Some(Ok(v));
                    }
                    continue;
                }
                Err(e) => e,
            };

            if work.len > 1 && work.depth < self.policy.max_split_depth {
                stats.splits += 1;
                debug!(
                    start = work.start,
                    len = work.len,
                    depth = work.depth,
                    error = %err,
                    "splitting failed embedding batch"
                );
                if err.is_transient() {
                    tokio::time::sleep(self.policy.backoff(work.depth)).await;
                }
                let half = work.len / 2;
                queue.push_front(Work {
                    start: work.start + half,
                    len: work.len - half,
                    depth: work.depth + 1,
                    attempt: 0,
                });
                queue.push_front(Work {
                    start: work.start,
                    len: half,
                    depth: work.depth + 1,
                    attempt: 0,
                });
            } else if err.is_transient() && work.attempt < self.policy.max_retries {
                stats.retries += 1;
                debug!(
                    start = work.start,
                    len = work.len,
                    attempt = work.attempt + 1,
                    error = %err,
                    "retrying embedding batch"
                );
                tokio::time::sleep(self.policy.backoff(work.attempt)).await;
                queue.push_front(Work {
                    attempt: work.attempt + 1,
                    ..work
                });
            } else {
                warn!(
                    start = work.start,
                    len = work.len,
                    error = %err,
                    "embedding failed"
                );
                stats.failed_items += work.len;
                for slot in &mut results[work.start..work.start + work.len] {
                    *slot = Some(Err(err.clone()));
                }
            }
        }

        let results = results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Err(EmbedError::Invalid("no result produced".to_string()))))
            .collect();
        PartialEmbedding { results, stats }
    }

    fn prepare(&self, text: &str, is_query: bool) -> String {
        let prefix = if is_query {
            self.query_prefix.as_deref()
        } else {
            self.document_prefix.as_deref()
        };
        let full = match prefix {
            Some(p) => format!("{}{}", p, text),
            None => text.to_string(),
        };
        if full.chars().count() > self.policy.max_input_chars {
            full.chars().take(self.policy.max_input_chars).collect()
        } else {
            full
        }
    }

    fn validate(&self, vectors: Vec<Vec<f32>>, expected: usize) -> Result<Vec<Vec<f32>>, EmbedError> {
        if vectors.len() != expected {
            return Err(EmbedError::Invalid(format!(
                "expected {} vectors, got {}",
                expected,
                vectors.len()
            )));
        }
        let dims = self.provider.dims();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
            return Err(EmbedError::Invalid(format!(
                "expected dimension {}, got {}",
                dims,
                bad.len()
            )));
        }
        Ok(vectors)
    }
}
