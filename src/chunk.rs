//! Page-aware, paragraph-atomic chunker.
//!
//! Paragraphs (blank-line separated) are packed greedily into chunks using
//! three token thresholds from [`ChunkingConfig`]:
//!
//! - a non-empty buffer that already holds `target_min` tokens is flushed
//!   before a paragraph that would push it past `target_max`;
//! - the paragraph is then always appended, never split;
//! - a buffer that reaches `hard_max` is flushed immediately.
//!
//! Each chunk spans the minimum and maximum page of its paragraphs. Chunk
//! boundaries depend only on the paragraph sequence and the thresholds.

use crate::config::ChunkingConfig;
use crate::extract::{ExtractedText, PAGE_BREAK};
use crate::models::Chunk;

/// Approximate chars-per-token ratio.
pub const CHARS_PER_TOKEN: usize = 4;

/// Separator placed between paragraphs inside a chunk.
pub const PARAGRAPH_SEP: &str = "\n\n";

pub fn estimate_tokens(chars: usize) -> usize {
    chars / CHARS_PER_TOKEN
}

/// A paragraph with the (1-based) page it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Paragraph {
    pub text: String,
    pub page: Option<u32>,
}

/// Split extracted text into trimmed, non-empty paragraphs.
pub fn paragraphs(extracted: &ExtractedText) -> Vec<Paragraph> {
    let mut out = Vec::new();
    if extracted.paginated {
        for (i, page) in extracted.text.split(PAGE_BREAK).enumerate() {
            push_paragraphs(&mut out, page, Some(i as u32 + 1));
        }
    } else {
        push_paragraphs(&mut out, &extracted.text, None);
    }
    out
}

fn push_paragraphs(out: &mut Vec<Paragraph>, text: &str, page: Option<u32>) {
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            flush_lines(out, &mut current, page);
        } else {
            current.push(line.trim_end());
        }
    }
    flush_lines(out, &mut current, page);
}

fn flush_lines(out: &mut Vec<Paragraph>, lines: &mut Vec<&str>, page: Option<u32>) {
    if lines.is_empty() {
        return;
    }
    let text = lines.join("\n").trim().to_string();
    lines.clear();
    if !text.is_empty() {
        out.push(Paragraph { text, page });
    }
}

#[derive(Default)]
struct Buffer {
    parts: Vec<Paragraph>,
    chars: usize,
}

impl Buffer {
    fn tokens(&self) -> usize {
        estimate_tokens(self.chars)
    }

    /// Token estimate if `para` were appended.
    fn tokens_with(&self, para: &Paragraph) -> usize {
        let sep = if self.parts.is_empty() {
            0
        } else {
            PARAGRAPH_SEP.len()
        };
        estimate_tokens(self.chars + sep + para.text.chars().count())
    }

    fn push(&mut self, para: Paragraph) {
        if !self.parts.is_empty() {
            self.chars += PARAGRAPH_SEP.len();
        }
        self.chars += para.text.chars().count();
        self.parts.push(para);
    }

    fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

/// Chunk a document's paragraphs. Indices are contiguous from 0.
pub fn chunk_paragraphs(doc_id: &str, paras: Vec<Paragraph>, cfg: &ChunkingConfig) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut buf = Buffer::default();

    for para in paras {
        if !buf.is_empty() && buf.tokens() >= cfg.target_min && buf.tokens_with(&para) > cfg.target_max
        {
            flush(doc_id, &mut buf, &mut chunks);
        }
        buf.push(para);
        if buf.tokens() >= cfg.hard_max {
            flush(doc_id, &mut buf, &mut chunks);
        }
    }
    if !buf.is_empty() {
        flush(doc_id, &mut buf, &mut chunks);
    }

    chunks
}

/// Extract paragraphs and chunk them in one step.
pub fn chunk_document(doc_id: &str, extracted: &ExtractedText, cfg: &ChunkingConfig) -> Vec<Chunk> {
    chunk_paragraphs(doc_id, paragraphs(extracted), cfg)
}

fn flush(doc_id: &str, buf: &mut Buffer, chunks: &mut Vec<Chunk>) {
    let parts = std::mem::take(&mut buf.parts);
    buf.chars = 0;

    let page_start = parts.iter().filter_map(|p| p.page).min();
    let page_end = parts.iter().filter_map(|p| p.page).max();
    let text = parts
        .iter()
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join(PARAGRAPH_SEP);
    let index = chunks.len();

    chunks.push(Chunk {
        chunk_id: Chunk::make_id(doc_id, index),
        doc_id: doc_id.to_string(),
        index,
        token_estimate: estimate_tokens(text.chars().count()),
        text,
        page_start,
        page_end,
    });
}
