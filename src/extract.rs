//! Text extraction for corpus documents.
//!
//! Paginated formats (PDF, PPTX) return their pages joined by
//! [`PAGE_BREAK`]; the chunker numbers pages from 1 by counting markers.
//! Markdown, plain text, and DOCX are non-paginated. Paragraphs are
//! separated by a blank line in every format.

use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// Form feed, inserted between pages of paginated sources.
pub const PAGE_BREAK: char = '\u{000C}';

/// Maximum decompressed bytes to read from a single ZIP entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Every variant is a permanent input error: retrying the same bytes fails
/// the same way, so ingest records the document as failed and moves on.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    Unsupported(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("invalid UTF-8 at byte {0}")]
    Encoding(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedText {
    pub text: String,
    pub paginated: bool,
}

impl ExtractedText {
    fn flat(text: String) -> Self {
        Self {
            text,
            paginated: false,
        }
    }

    fn pages(pages: Vec<String>) -> Self {
        Self {
            text: pages.join(&PAGE_BREAK.to_string()),
            paginated: true,
        }
    }
}

/// Extract text from `bytes`, choosing the format by `path`'s extension.
pub fn extract_text(path: &Path, bytes: &[u8]) -> Result<ExtractedText, ExtractError> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => extract_pdf(bytes),
        "pptx" => extract_pptx(bytes),
        "docx" => extract_docx(bytes).map(ExtractedText::flat),
        "md" | "markdown" | "txt" | "text" => decode_utf8(bytes).map(ExtractedText::flat),
        other => Err(ExtractError::Unsupported(other.to_string())),
    }
}

fn decode_utf8(bytes: &[u8]) -> Result<String, ExtractError> {
    let text = std::str::from_utf8(bytes).map_err(|e| ExtractError::Encoding(e.valid_up_to()))?;
    Ok(text.replace("\r\n", "\n"))
}

fn extract_pdf(bytes: &[u8]) -> Result<ExtractedText, ExtractError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;
    Ok(ExtractedText::pages(
        pages.into_iter().map(|p| p.replace(PAGE_BREAK, "")).collect(),
    ))
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml")?;
    extract_paragraph_text(&xml)
}

fn extract_pptx(bytes: &[u8]) -> Result<ExtractedText, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let mut slide_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    slide_names.sort_by_key(|name| {
        name.trim_start_matches("ppt/slides/slide")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });

    let mut pages = Vec::with_capacity(slide_names.len());
    for name in slide_names {
        let xml = read_zip_entry_bounded(&mut archive, &name)?;
        pages.push(extract_paragraph_text(&xml)?);
    }
    Ok(ExtractedText::pages(pages))
}

/// Collect `<*:t>` runs, ending a paragraph at each `</*:p>`.
/// Works for both WordprocessingML (`w:`) and DrawingML (`a:`).
fn extract_paragraph_text(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_t = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_t = true,
            Ok(Event::Text(te)) if in_t => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                current.push_str(text.as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"p" => {
                    let para = current.trim();
                    if !para.is_empty() {
                        paragraphs.push(para.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    let tail = current.trim();
    if !tail.is_empty() {
        paragraphs.push(tail.to_string());
    }
    Ok(paragraphs.join("\n\n"))
}
