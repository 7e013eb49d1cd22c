use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub paths: PathsConfig,
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub reasoning: ReasoningConfig,
    #[serde(default)]
    pub verify: VerifyConfig,
}

/// Every store location is derived from `data_dir`.
#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
}

impl PathsConfig {
    pub fn manifest(&self) -> PathBuf {
        self.data_dir.join("manifest.jsonl")
    }
    pub fn knowledge_dir(&self) -> PathBuf {
        self.data_dir.join("knowledge")
    }
    pub fn reasoning_dir(&self) -> PathBuf {
        self.data_dir.join("reasoning")
    }
    pub fn baseline_dir(&self) -> PathBuf {
        self.data_dir.join("baselines")
    }
    pub fn alerts(&self) -> PathBuf {
        self.data_dir.join("alerts.jsonl")
    }
    pub fn vector_db(&self) -> PathBuf {
        self.data_dir.join("vectors.sqlite")
    }
    pub fn lock(&self) -> PathBuf {
        self.data_dir.join(".god.lock")
    }

    /// Locations designated append-only for immutability snapshots.
    pub fn immutable_artifacts(&self) -> Vec<PathBuf> {
        vec![self.manifest(), self.knowledge_dir(), self.reasoning_dir()]
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            root: None,
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_include_globs() -> Vec<String> {
    ["pdf", "md", "txt", "docx", "pptx"]
        .iter()
        .map(|ext| format!("**/*.{}", ext))
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_target_min")]
    pub target_min: usize,
    #[serde(default = "default_target_max")]
    pub target_max: usize,
    #[serde(default = "default_hard_max")]
    pub hard_max: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_min: default_target_min(),
            target_max: default_target_max(),
            hard_max: default_hard_max(),
        }
    }
}

fn default_target_min() -> usize {
    800
}
fn default_target_max() -> usize {
    1200
}
fn default_hard_max() -> usize {
    1800
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_split_depth")]
    pub max_split_depth: u32,
    #[serde(default = "default_max_input_tokens")]
    pub max_input_tokens: usize,
    #[serde(default)]
    pub query_prefix: Option<String>,
    #[serde(default)]
    pub document_prefix: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_split_depth: default_max_split_depth(),
            max_input_tokens: default_max_input_tokens(),
            query_prefix: None,
            document_prefix: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    4
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_max_split_depth() -> u32 {
    8
}
fn default_max_input_tokens() -> usize {
    8000
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReasoningConfig {
    #[serde(default = "default_t_low")]
    pub t_low: f64,
    #[serde(default = "default_t_high")]
    pub t_high: f64,
    #[serde(default = "default_max_pairs")]
    pub max_pairs: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_ngram_size")]
    pub ngram_size: usize,
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            t_low: default_t_low(),
            t_high: default_t_high(),
            max_pairs: default_max_pairs(),
            top_k: default_top_k(),
            ngram_size: default_ngram_size(),
            sample_size: default_sample_size(),
        }
    }
}

fn default_t_low() -> f64 {
    0.12
}
fn default_t_high() -> f64 {
    0.6
}
fn default_max_pairs() -> usize {
    200_000
}
fn default_top_k() -> usize {
    5
}
fn default_ngram_size() -> usize {
    4
}
fn default_sample_size() -> usize {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct VerifyConfig {
    #[serde(default = "default_duplicate_threshold")]
    pub duplicate_threshold: f32,
    #[serde(default = "default_claim_threshold")]
    pub claim_threshold: f64,
    #[serde(default = "default_lsh_bits")]
    pub lsh_bits: usize,
    #[serde(default = "default_lsh_tables")]
    pub lsh_tables: usize,
    #[serde(default = "default_lsh_seed")]
    pub lsh_seed: u64,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            duplicate_threshold: default_duplicate_threshold(),
            claim_threshold: default_claim_threshold(),
            lsh_bits: default_lsh_bits(),
            lsh_tables: default_lsh_tables(),
            lsh_seed: default_lsh_seed(),
        }
    }
}

fn default_duplicate_threshold() -> f32 {
    0.95
}
fn default_claim_threshold() -> f64 {
    0.9
}
fn default_lsh_bits() -> usize {
    10
}
fn default_lsh_tables() -> usize {
    8
}
fn default_lsh_seed() -> u64 {
    42
}

impl Config {
    /// A config with every section defaulted, rooted at `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            paths: PathsConfig {
                data_dir: data_dir.into(),
            },
            corpus: CorpusConfig::default(),
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            reasoning: ReasoningConfig::default(),
            verify: VerifyConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let c = &self.chunking;
        if c.target_min == 0 {
            bail!("chunking.target_min must be > 0");
        }
        if c.target_min > c.target_max || c.target_max > c.hard_max {
            bail!(
                "chunking thresholds must satisfy target_min <= target_max <= hard_max (got {}, {}, {})",
                c.target_min,
                c.target_max,
                c.hard_max
            );
        }

        let r = &self.reasoning;
        if !(0.0..=1.0).contains(&r.t_low) || !(0.0..=1.0).contains(&r.t_high) {
            bail!("reasoning.t_low and reasoning.t_high must be in [0.0, 1.0]");
        }
        if r.t_low > r.t_high {
            bail!("reasoning.t_low must be <= reasoning.t_high");
        }
        if r.top_k == 0 {
            bail!("reasoning.top_k must be >= 1");
        }
        if r.max_pairs == 0 {
            bail!("reasoning.max_pairs must be >= 1");
        }
        if r.ngram_size == 0 {
            bail!("reasoning.ngram_size must be >= 1");
        }

        let v = &self.verify;
        if !(v.duplicate_threshold > 0.0 && v.duplicate_threshold <= 1.0) {
            bail!("verify.duplicate_threshold must be in (0.0, 1.0]");
        }
        if !(v.claim_threshold > 0.0 && v.claim_threshold <= 1.0) {
            bail!("verify.claim_threshold must be in (0.0, 1.0]");
        }
        if v.lsh_bits == 0 || v.lsh_bits > 64 {
            bail!("verify.lsh_bits must be in 1..=64");
        }
        if v.lsh_tables == 0 {
            bail!("verify.lsh_tables must be >= 1");
        }

        let e = &self.embedding;
        if e.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
        match e.provider.as_str() {
            "disabled" | "hashing" => {}
            "openai" | "ollama" => {
                if e.model.is_none() {
                    bail!(
                        "embedding.model must be specified when provider is '{}'",
                        e.provider
                    );
                }
            }
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or hashing.",
                other
            ),
        }
        if e.is_enabled() && (e.dims.is_none() || e.dims == Some(0)) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                e.provider
            );
        }

        Ok(())
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}
