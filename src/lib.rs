//! # god-learn
//!
//! A knowledge-compilation pipeline. A corpus of documents is turned into
//! content-addressed chunks and embeddings, curated into Knowledge Units
//! (atomic, sourced claims), linked into a Reasoning graph, and continuously
//! checked for consistency and regressions.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────┐   ┌────────────┐
//! │  Corpus  │──▶│ Extract+Chunk │──▶│ Gateway  │──▶│ VectorIndex │
//! │ pdf/md.. │   └──────┬───────┘   │ (embed)  │   └─────┬──────┘
//! └──────────┘          │           └──────────┘         │
//!                       ▼                                 │
//!                 ┌──────────┐   ┌───────────┐            │
//!                 │ Manifest │   │ Knowledge │────────────┤
//!                 │ (jsonl)  │   │  (jsonl)  │            ▼
//!                 └──────────┘   └─────┬─────┘     ┌────────────┐
//!                                      ▼           │   Verify    │
//!                                ┌───────────┐     │ dedupe/prov │
//!                                │ Reasoning │────▶│ regress/imm │
//!                                └───────────┘     └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types and content-derived ids |
//! | [`corpus`] | Corpus scanning and filename metadata |
//! | [`extract`] | PDF/OOXML/text extraction |
//! | [`chunk`] | Paragraph-aware chunking |
//! | [`manifest`] | Append-only ingest manifest |
//! | [`embedding`] | Providers and the resilient embedding gateway |
//! | [`store`] | Vector index abstraction (SQLite, in-memory) |
//! | [`knowledge`] | Knowledge Unit store |
//! | [`reasoning`] | Reasoning graph builder and store |
//! | [`verify`] | Consistency checks, baselines, immutability |
//! | [`ingest`] | Ingest orchestration |

pub mod chunk;
pub mod config;
pub mod corpus;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod jsonl;
pub mod knowledge;
pub mod lock;
pub mod manifest;
pub mod models;
pub mod progress;
pub mod reasoning;
pub mod stats;
pub mod store;
pub mod verify;
