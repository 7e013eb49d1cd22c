//! # god-learn CLI (`god`)
//!
//! The `god` binary drives the pipeline: ingesting a corpus, building the
//! reasoning graph, and running the consistency and regression checks.
//!
//! ## Usage
//!
//! ```bash
//! god --config ./config/god.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `god ingest` | Extract, chunk, embed, and record corpus documents |
//! | `god reason` | Rebuild the reasoning graph from the knowledge store |
//! | `god dedupe` | Find near-duplicate chunks (and claims) |
//! | `god provenance` | Check KU citations; ground synthesis claims |
//! | `god regress` | Compare live state against baselines |
//! | `god baseline create` | Snapshot coverage, reasoning, and metrics baselines |
//! | `god immutability snapshot\|verify` | Fingerprint or check append-only files |
//! | `god verify` | Every check in one report |
//! | `god knowledge verify\|normalize` | Check or repair knowledge store order |
//! | `god stats` | Corpus overview |
//!
//! ## Exit codes
//!
//! `0` clean or warnings only, `2` with `--strict` when a critical issue was
//! found, `1` on operational errors.
//!
//! Logs go to stderr. `RUST_LOG` overrides the default `god_learn=info`
//! filter and `GOD_LOG_FORMAT=json` switches to JSON lines.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use god_learn::config;
use god_learn::ingest::{self, IngestOptions};
use god_learn::progress::ProgressMode;
use god_learn::reasoning;
use god_learn::stats;
use god_learn::verify::cmd::{self, ReportOptions};

/// god-learn CLI: compile a document corpus into sourced knowledge and
/// keep it consistent.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/god.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "god",
    about = "god-learn: knowledge compilation, reasoning, and verification",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/god.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Report flags shared by the verification commands.
#[derive(clap::Args, Clone, Copy)]
struct ReportArgs {
    /// Exit with status 2 when any critical issue is found.
    #[arg(long)]
    strict: bool,

    /// Print the report as JSON.
    #[arg(long)]
    json: bool,
}

impl From<ReportArgs> for ReportOptions {
    fn from(a: ReportArgs) -> Self {
        ReportOptions {
            strict: a.strict,
            json: a.json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest the corpus.
    ///
    /// Scans the corpus root, skips documents whose content and phase are
    /// unchanged, and extracts, chunks, and (when a provider is configured)
    /// embeds the rest. Every processed document gets one manifest record.
    Ingest {
        /// Corpus root; overrides `corpus.root`.
        #[arg(long)]
        root: Option<PathBuf>,

        /// Reprocess documents even when the manifest says they are current.
        #[arg(long)]
        force: bool,

        /// Show counts without writing the manifest or the vector index.
        #[arg(long)]
        dry_run: bool,

        /// Maximum number of documents to process.
        #[arg(long)]
        limit: Option<usize>,

        /// Progress on stderr. Defaults to `human` on a TTY, else `off`.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Rebuild the reasoning graph.
    Reason {
        /// Restrict the topic bucket to KUs whose claim mentions this text.
        #[arg(long)]
        query: Option<String>,

        /// Cap on candidate pairs scored.
        #[arg(long)]
        max_pairs: Option<usize>,

        /// Strongest edges kept per KU; the union across KUs survives.
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Find near-duplicate chunk embeddings.
    Dedupe {
        /// Cosine similarity threshold; overrides `verify.duplicate_threshold`.
        #[arg(long)]
        threshold: Option<f32>,

        /// Compare every pair instead of using LSH buckets.
        #[arg(long)]
        brute_force: bool,

        /// Also compare KU claims.
        #[arg(long)]
        claims: bool,

        #[command(flatten)]
        report: ReportArgs,
    },

    /// Validate KU provenance and optionally ground synthesis claims.
    Provenance {
        /// JSON claims to ground against the stores.
        #[arg(long)]
        grounding: Option<PathBuf>,

        /// Where to write the grounded claims.
        #[arg(long)]
        out: Option<PathBuf>,

        #[command(flatten)]
        report: ReportArgs,
    },

    /// Compare live state against the stored baselines.
    Regress {
        #[command(flatten)]
        report: ReportArgs,
    },

    /// Manage regression baselines.
    Baseline {
        #[command(subcommand)]
        action: BaselineAction,
    },

    /// Fingerprint or verify append-only record files.
    Immutability {
        #[command(subcommand)]
        action: ImmutabilityAction,
    },

    /// Run every check and print one report.
    Verify {
        #[command(flatten)]
        report: ReportArgs,
    },

    /// Knowledge store maintenance.
    Knowledge {
        #[command(subcommand)]
        action: KnowledgeAction,
    },

    /// Show corpus statistics.
    Stats,
}

#[derive(Subcommand)]
enum BaselineAction {
    /// Write coverage, reasoning, and metrics baselines.
    Create {
        /// Query to record coverage for. Repeatable.
        #[arg(long = "query")]
        queries: Vec<String>,
    },
}

#[derive(Subcommand)]
enum ImmutabilityAction {
    /// Fingerprint the append-only files.
    Snapshot,
    /// Compare the append-only files against the snapshot.
    Verify {
        #[command(flatten)]
        report: ReportArgs,
    },
}

#[derive(Subcommand)]
enum KnowledgeAction {
    /// Check record order and the offset index.
    Verify,
    /// Re-sort the records and rebuild the offset index.
    Normalize,
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("god_learn=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if std::env::var("GOD_LOG_FORMAT").map(|v| v == "json").unwrap_or(false) {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Ingest {
            root,
            force,
            dry_run,
            limit,
            progress,
        } => {
            let reporter = progress
                .unwrap_or_else(ProgressMode::default_for_tty)
                .reporter();
            let opts = IngestOptions {
                force,
                dry_run,
                limit,
            };
            ingest::run_ingest(&cfg, root.as_deref(), opts, reporter.as_ref()).await?;
        }
        Commands::Reason {
            query,
            max_pairs,
            top_k,
        } => {
            reasoning::run_reason(&cfg, query, max_pairs, top_k).await?;
        }
        Commands::Dedupe {
            threshold,
            brute_force,
            claims,
            report,
        } => {
            return cmd::run_dedupe(&cfg, threshold, brute_force, claims, report.into()).await;
        }
        Commands::Provenance {
            grounding,
            out,
            report,
        } => {
            return cmd::run_provenance(&cfg, grounding.as_deref(), out.as_deref(), report.into())
                .await;
        }
        Commands::Regress { report } => {
            return cmd::run_regress(&cfg, report.into());
        }
        Commands::Baseline { action } => match action {
            BaselineAction::Create { queries } => {
                cmd::run_baseline_create(&cfg, &queries)?;
            }
        },
        Commands::Immutability { action } => match action {
            ImmutabilityAction::Snapshot => {
                cmd::run_immutability_snapshot(&cfg)?;
            }
            ImmutabilityAction::Verify { report } => {
                return cmd::run_immutability_verify(&cfg, report.into());
            }
        },
        Commands::Verify { report } => {
            return cmd::run_verify(&cfg, report.into()).await;
        }
        Commands::Knowledge { action } => match action {
            KnowledgeAction::Verify => {
                cmd::run_knowledge_verify(&cfg)?;
            }
            KnowledgeAction::Normalize => {
                cmd::run_knowledge_normalize(&cfg)?;
            }
        },
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(0)
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    };
    std::process::exit(code);
}
