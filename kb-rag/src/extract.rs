//! Plain-text extraction from uploaded documents.
//!
//! Supported formats are PDF, DOCX, plain text and Markdown. Every extractor
//! feeds [`normalize`], which unifies line endings, collapses whitespace and
//! keeps paragraph breaks as a single `\n` so the chunker can split on them.

use std::io::{Cursor, Read};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RagError, Result};

/// Formats the extractor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Text,
    Markdown,
}

impl DocumentFormat {
    /// Resolve a declared type.
    ///
    /// Accepts a bare extension (`pdf`, `.PDF`), a filename (`report.docx`) or
    /// a MIME type (`application/pdf`).
    pub fn from_declared(declared: &str) -> Result<Self> {
        let normalized = declared.trim().to_ascii_lowercase();
        let unsupported = || RagError::UnsupportedFormat { declared: declared.to_string() };

        if normalized.contains('/') {
            let mime = normalized.split(';').next().unwrap_or_default().trim();
            return match mime {
                "application/pdf" => Ok(Self::Pdf),
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                    Ok(Self::Docx)
                }
                "text/plain" => Ok(Self::Text),
                "text/markdown" | "text/x-markdown" => Ok(Self::Markdown),
                _ => Err(unsupported()),
            };
        }

        let extension = normalized.rsplit('.').next().unwrap_or_default();
        match extension {
            "pdf" => Ok(Self::Pdf),
            "docx" => Ok(Self::Docx),
            "txt" | "text" => Ok(Self::Text),
            "md" | "markdown" => Ok(Self::Markdown),
            _ => Err(unsupported()),
        }
    }

    /// Canonical extension with a leading dot, as recorded in document metadata.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pdf => ".pdf",
            Self::Docx => ".docx",
            Self::Text => ".txt",
            Self::Markdown => ".md",
        }
    }
}

/// Extract normalized plain text from `bytes`.
///
/// # Errors
///
/// - [`RagError::UnsupportedFormat`] if `declared_type` is not recognized.
/// - [`RagError::Extraction`] if the bytes are corrupt for the declared format
///   or nothing but whitespace remains after normalization.
pub fn extract(bytes: &[u8], declared_type: &str, filename: &str) -> Result<String> {
    let format = DocumentFormat::from_declared(declared_type)?;
    let raw = match format {
        DocumentFormat::Pdf => extract_pdf(bytes, filename)?,
        DocumentFormat::Docx => extract_docx(bytes, filename)?,
        DocumentFormat::Text | DocumentFormat::Markdown => decode_text(bytes),
    };

    let text = normalize(&raw);
    if text.is_empty() {
        return Err(RagError::extraction(filename, "no text found after extraction"));
    }
    debug!(filename, ?format, chars = text.chars().count(), "extracted text");
    Ok(text)
}

/// Unify line endings, collapse whitespace and keep paragraph breaks.
///
/// Paragraphs are separated by one or more blank lines (form feeds count as
/// page, hence paragraph, breaks). Within a paragraph every whitespace run,
/// including single newlines, becomes one space. Paragraphs are joined with a
/// single `\n`.
pub fn normalize(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n").replace('\u{c}', "\n\n");

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in unified.split('\n') {
        if line.trim().is_empty() {
            flush_paragraph(&mut current, &mut paragraphs);
        } else {
            current.push(line);
        }
    }
    flush_paragraph(&mut current, &mut paragraphs);

    paragraphs.join("\n")
}

fn flush_paragraph(lines: &mut Vec<&str>, paragraphs: &mut Vec<String>) {
    if lines.is_empty() {
        return;
    }
    let collapsed =
        lines.iter().flat_map(|line| line.split_whitespace()).collect::<Vec<_>>().join(" ");
    if !collapsed.is_empty() {
        paragraphs.push(collapsed);
    }
    lines.clear();
}

/// UTF-8 with a Latin-1 fallback; a leading byte-order mark is dropped.
fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

fn extract_pdf(bytes: &[u8], filename: &str) -> Result<String> {
    // pdf-extract panics on some malformed inputs instead of returning an error
    match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes)) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(RagError::extraction(filename, format!("error reading PDF: {e}"))),
        Err(_) => Err(RagError::extraction(filename, "error reading PDF: malformed document")),
    }
}

static DOCX_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<w:t(?:\s[^>]*)?>([^<]*)</w:t>|<w:(?:tab|br|cr)\b[^>]*/>|</w:p>")
        .expect("unreachable error: invalid docx run pattern")
});

static XML_ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#x[0-9a-fA-F]+|#[0-9]+|amp|lt|gt|quot|apos);")
        .expect("unreachable error: invalid entity pattern")
});

fn extract_docx(bytes: &[u8], filename: &str) -> Result<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| RagError::extraction(filename, format!("error reading DOCX file: {e}")))?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| RagError::extraction(filename, format!("missing document body: {e}")))?
        .read_to_string(&mut xml)
        .map_err(|e| RagError::extraction(filename, format!("unreadable document body: {e}")))?;

    Ok(docx_xml_to_text(&xml))
}

/// Text of a WordprocessingML body: runs concatenated, paragraphs separated by blank lines.
fn docx_xml_to_text(xml: &str) -> String {
    let mut text = String::new();
    for caps in DOCX_RUN.captures_iter(xml) {
        match caps.get(1) {
            Some(run) => text.push_str(&decode_entities(run.as_str())),
            None if caps[0].starts_with("</") => text.push_str("\n\n"),
            None => text.push(' '),
        }
    }
    text
}

fn decode_entities(raw: &str) -> String {
    XML_ENTITY
        .replace_all(raw, |caps: &regex::Captures<'_>| {
            let entity = &caps[1];
            let decoded = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => {
                    let code = match entity.strip_prefix("#x") {
                        Some(hex) => u32::from_str_radix(hex, 16).ok(),
                        None => entity[1..].parse::<u32>().ok(),
                    };
                    code.and_then(char::from_u32)
                }
            };
            decoded.map(String::from).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
