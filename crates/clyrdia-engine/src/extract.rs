//! Document text extraction.
//!
//! Plain text and DOCX are always available. PDF needs the `pdf` feature and
//! a Pdfium shared library at runtime.

use std::io::{Cursor, Read};

use clyrdia_core::Fingerprint;
use thiserror::Error;
use tracing::info;

pub const MEDIA_PDF: &str = "application/pdf";
pub const MEDIA_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MEDIA_TEXT: &str = "text/plain";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported document type: {0}")]
    UnsupportedFormat(String),

    #[error("failed to extract text: {0}")]
    ExtractionFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Docx,
    PlainText,
}

impl DocumentKind {
    pub fn from_media_type(media_type: &str) -> Option<Self> {
        // Ignore parameters such as `; charset=utf-8`.
        let essence = media_type.split(';').next().unwrap_or("").trim();
        match essence.to_ascii_lowercase().as_str() {
            MEDIA_PDF => Some(Self::Pdf),
            MEDIA_DOCX => Some(Self::Docx),
            MEDIA_TEXT => Some(Self::PlainText),
            _ => None,
        }
    }

    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "txt" => Some(Self::PlainText),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::PlainText => "txt",
        }
    }

    pub fn media_type(&self) -> &'static str {
        match self {
            Self::Pdf => MEDIA_PDF,
            Self::Docx => MEDIA_DOCX,
            Self::PlainText => MEDIA_TEXT,
        }
    }
}

/// Text pulled out of a document, fingerprinted over the raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub text: String,
    pub fingerprint: Fingerprint,
}

/// Turns document bytes into text. Implementations may block.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8], media_type: &str) -> Result<Extracted, ExtractError>;
}

/// The built-in extractor for PDF, DOCX, and plain text.
#[derive(Debug, Default, Clone, Copy)]
pub struct DocumentExtractor;

impl TextExtractor for DocumentExtractor {
    fn extract(&self, bytes: &[u8], media_type: &str) -> Result<Extracted, ExtractError> {
        let kind = DocumentKind::from_media_type(media_type)
            .ok_or_else(|| ExtractError::UnsupportedFormat(media_type.to_string()))?;

        let text = match kind {
            DocumentKind::PlainText => plain_text(bytes),
            DocumentKind::Docx => docx_text(bytes)?,
            DocumentKind::Pdf => pdf_text(bytes)?,
        };
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(ExtractError::ExtractionFailed(format!(
                "no text content found in {} document",
                kind.extension()
            )));
        }

        let fingerprint = Fingerprint::of_bytes(bytes);
        info!(
            media_type = kind.media_type(),
            size = bytes.len(),
            text_length = text.chars().count(),
            fingerprint = %fingerprint,
            "document processed"
        );
        Ok(Extracted { text, fingerprint })
    }
}

// ── Plain text ──

/// UTF-8, falling back to Latin-1 which maps every byte.
fn plain_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

// ── DOCX ──

fn docx_text(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ExtractError::ExtractionFailed(format!("not a DOCX archive: {e}")))?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| ExtractError::ExtractionFailed(format!("missing document body: {e}")))?
        .read_to_string(&mut xml)
        .map_err(|e| ExtractError::ExtractionFailed(format!("unreadable document body: {e}")))?;
    Ok(document_xml_text(&xml))
}

/// Collect `<w:t>` runs, one line per non-empty paragraph. Table cells are
/// paragraphs too, so they come out in document order.
fn document_xml_text(xml: &str) -> String {
    let mut out = String::new();
    let mut paragraph = String::new();
    let mut rest = xml;

    while let Some(open) = rest.find('<') {
        let Some(close) = rest[open..].find('>') else {
            break;
        };
        let tag = &rest[open + 1..open + close];
        rest = &rest[open + close + 1..];

        let name = tag.split_whitespace().next().unwrap_or("");
        match name {
            "w:t" => {
                let end = rest.find("</w:t>").unwrap_or(rest.len());
                paragraph.push_str(&unescape_xml(&rest[..end]));
                rest = &rest[end..];
            }
            "w:tab/" => paragraph.push('\t'),
            "w:br/" => paragraph.push(' '),
            "/w:p" => {
                if !paragraph.trim().is_empty() {
                    out.push_str(&paragraph);
                    out.push('\n');
                }
                paragraph.clear();
            }
            _ => {}
        }
    }
    if !paragraph.trim().is_empty() {
        out.push_str(&paragraph);
    }
    out
}

fn unescape_xml(raw: &str) -> String {
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

// ── PDF ──

#[cfg(feature = "pdf")]
fn pdf_text(bytes: &[u8]) -> Result<String, ExtractError> {
    use pdfium_render::prelude::Pdfium;

    let bindings = match std::env::var("PDFIUM_LIBRARY_PATH") {
        Ok(path) if !path.trim().is_empty() => Pdfium::bind_to_library(path),
        _ => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| ExtractError::ExtractionFailed(format!("failed to load Pdfium: {e}")))?;
    let pdfium = Pdfium::new(bindings);

    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| ExtractError::ExtractionFailed(format!("failed to load PDF: {e}")))?;

    let mut buffer = String::new();
    for (page_index, page) in document.pages().iter().enumerate() {
        let text = page
            .text()
            .map_err(|e| {
                ExtractError::ExtractionFailed(format!("page {page_index} has no text layer: {e}"))
            })?
            .all();
        if text.trim().is_empty() {
            continue;
        }
        if !buffer.is_empty() {
            buffer.push('\n');
        }
        buffer.push_str(&text);
    }
    Ok(buffer)
}

#[cfg(not(feature = "pdf"))]
fn pdf_text(_bytes: &[u8]) -> Result<String, ExtractError> {
    Err(ExtractError::UnsupportedFormat(format!(
        "{MEDIA_PDF} (built without PDF support)"
    )))
}
