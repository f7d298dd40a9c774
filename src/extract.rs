//! Multi-format text extraction for uploaded study documents (PDF, DOCX, TXT).
//!
//! Callers supply bytes plus a declared type tag; this module returns
//! normalized UTF-8 text wrapped in an [`ExtractedText`]. PDF extraction runs a
//! primary strategy (`pdf-extract`) and falls back to a second one (`lopdf`)
//! when the primary errors, panics, or produces no text.

use std::io::Read;
use std::panic::{catch_unwind, AssertUnwindSafe};

use thiserror::Error;
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::models::{DocumentType, ExtractedText, ExtractionMethod};

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

pub const WARN_PASSWORD_PROTECTED: &str = "password-protected";
pub const WARN_NO_TEXT_LAYER: &str = "no text layer";
pub const WARN_LATIN1: &str = "decoded as latin-1";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExtractError {
    #[error("unsupported format: {0}")]
    Unsupported(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("PDF is encrypted")]
    Encrypted,
    #[error("PDF has no extractable text layer")]
    NoTextLayer,
    #[error("DOCX extraction failed: {0}")]
    Ooxml(String),
}

impl ExtractError {
    /// Warning recorded on a failed [`ExtractedText`].
    pub fn warning(&self) -> String {
        match self {
            ExtractError::Encrypted => WARN_PASSWORD_PROTECTED.to_string(),
            ExtractError::NoTextLayer => WARN_NO_TEXT_LAYER.to_string(),
            other => other.to_string(),
        }
    }
}

impl From<ExtractError> for PipelineError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::Unsupported(t) => PipelineError::UnsupportedFormat(t),
            other => PipelineError::ExtractionFailed(other.to_string()),
        }
    }
}

/// One way of getting text out of a PDF.
pub trait PdfStrategy: Send + Sync {
    fn method(&self) -> ExtractionMethod;
    fn extract(&self, bytes: &[u8]) -> Result<String, ExtractError>;
}

/// Primary strategy: `pdf-extract`, which handles font encodings well.
pub struct PdfExtractStrategy;

impl PdfStrategy for PdfExtractStrategy {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::PdfExtract
    }

    fn extract(&self, bytes: &[u8]) -> Result<String, ExtractError> {
        pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
    }
}

/// Fallback strategy: page-by-page text via `lopdf`.
pub struct LopdfStrategy;

impl PdfStrategy for LopdfStrategy {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::LopdfFallback
    }

    fn extract(&self, bytes: &[u8]) -> Result<String, ExtractError> {
        let doc = lopdf::Document::load_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;
        if doc.is_encrypted() {
            return Err(ExtractError::Encrypted);
        }

        let mut out = String::new();
        for page in doc.get_pages().keys() {
            match doc.extract_text(&[*page]) {
                Ok(text) => {
                    if !out.is_empty() {
                        out.push_str("\n\n");
                    }
                    out.push_str(&text);
                }
                Err(e) => debug!(page, error = %e, "lopdf could not read page text"),
            }
        }
        Ok(out)
    }
}

/// Dispatches to a type-specific strategy by declared type.
pub struct Extractor {
    pdf_primary: Box<dyn PdfStrategy>,
    pdf_fallback: Box<dyn PdfStrategy>,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor {
    pub fn new() -> Self {
        Self::with_pdf_strategies(Box::new(PdfExtractStrategy), Box::new(LopdfStrategy))
    }

    pub fn with_pdf_strategies(
        pdf_primary: Box<dyn PdfStrategy>,
        pdf_fallback: Box<dyn PdfStrategy>,
    ) -> Self {
        Self {
            pdf_primary,
            pdf_fallback,
        }
    }

    /// Extract text, folding every failure into an unsuccessful
    /// [`ExtractedText`] with a descriptive warning.
    pub fn extract(&self, bytes: &[u8], declared_type: &str) -> ExtractedText {
        match self.try_extract(bytes, declared_type) {
            Ok(extracted) => extracted,
            Err(e) => {
                warn!(declared_type, error = %e, "extraction failed");
                ExtractedText::failed(e.warning())
            }
        }
    }

    /// Extract text, returning the typed error on failure.
    pub fn try_extract(
        &self,
        bytes: &[u8],
        declared_type: &str,
    ) -> Result<ExtractedText, ExtractError> {
        let doc_type = DocumentType::parse(declared_type)
            .map_err(|_| ExtractError::Unsupported(declared_type.to_string()))?;
        match doc_type {
            DocumentType::Pdf => self.extract_pdf(bytes),
            DocumentType::Docx => {
                let raw = extract_docx(bytes)?;
                Ok(ExtractedText::succeeded(
                    normalize_text(&raw),
                    ExtractionMethod::DocxXml,
                    Vec::new(),
                ))
            }
            DocumentType::Txt => Ok(extract_plain(bytes)),
        }
    }

    fn extract_pdf(&self, bytes: &[u8]) -> Result<ExtractedText, ExtractError> {
        let mut warnings = Vec::new();

        match run_guarded(self.pdf_primary.as_ref(), bytes) {
            Ok(raw) => {
                let text = normalize_text(&raw);
                if !text.is_empty() {
                    return Ok(ExtractedText::succeeded(
                        text,
                        self.pdf_primary.method(),
                        warnings,
                    ));
                }
                debug!("primary PDF strategy returned no text");
                warnings.push("primary PDF strategy returned no text".to_string());
            }
            Err(e) => {
                warn!(error = %e, "primary PDF strategy failed, trying fallback");
                warnings.push(format!("primary PDF strategy failed: {}", e));
            }
        }

        match run_guarded(self.pdf_fallback.as_ref(), bytes) {
            Ok(raw) => {
                let text = normalize_text(&raw);
                if text.is_empty() {
                    return Err(if looks_encrypted(bytes) {
                        ExtractError::Encrypted
                    } else {
                        ExtractError::NoTextLayer
                    });
                }
                Ok(ExtractedText::succeeded(
                    text,
                    self.pdf_fallback.method(),
                    warnings,
                ))
            }
            Err(ExtractError::Pdf(_)) if looks_encrypted(bytes) => Err(ExtractError::Encrypted),
            Err(e) => Err(e),
        }
    }
}

/// Extract with the default strategies. See [`Extractor::extract`].
pub fn extract(bytes: &[u8], declared_type: &str) -> ExtractedText {
    Extractor::new().extract(bytes, declared_type)
}

/// Some PDF libraries panic on malformed input; treat that as a failed attempt.
fn run_guarded(strategy: &dyn PdfStrategy, bytes: &[u8]) -> Result<String, ExtractError> {
    match catch_unwind(AssertUnwindSafe(|| strategy.extract(bytes))) {
        Ok(result) => result,
        Err(panic) => {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "strategy panicked".to_string());
            Err(ExtractError::Pdf(msg))
        }
    }
}

fn looks_encrypted(bytes: &[u8]) -> bool {
    bytes.windows(b"/Encrypt".len()).any(|w| w == b"/Encrypt")
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let doc_xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    docx_body_text(&doc_xml)
}

/// Walks `word/document.xml`: `w:t` runs become text, paragraphs end with a
/// blank line, table cells are space-separated and rows newline-separated.
fn docx_body_text(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_t = false;
    let mut cell_depth = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"t" => in_t = true,
                b"tc" => cell_depth += 1,
                b"tab" => out.push('\t'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" | b"cr" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                let text = te.unescape().map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"p" if cell_depth > 0 => out.push(' '),
                b"p" => out.push_str("\n\n"),
                b"tc" => {
                    cell_depth = cell_depth.saturating_sub(1);
                    out.push(' ');
                }
                b"tr" => out.push('\n'),
                b"tbl" => out.push_str("\n\n"),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

/// UTF-8 first, then Latin-1 (every byte maps to a code point).
fn extract_plain(bytes: &[u8]) -> ExtractedText {
    match std::str::from_utf8(bytes) {
        Ok(s) => ExtractedText::succeeded(
            normalize_text(s.trim_start_matches('\u{feff}')),
            ExtractionMethod::PlainUtf8,
            Vec::new(),
        ),
        Err(_) => {
            let decoded: String = bytes.iter().map(|&b| b as char).collect();
            ExtractedText::succeeded(
                normalize_text(&decoded),
                ExtractionMethod::PlainLatin1,
                vec![WARN_LATIN1.to_string()],
            )
        }
    }
}

/// Normalize extracted text while keeping paragraph breaks.
///
/// Line endings become `\n`, control characters are dropped (form feeds become
/// line breaks), whitespace inside a line collapses to one space, lines are
/// trimmed, and runs of blank lines collapse to a single paragraph break.
pub fn normalize_text(raw: &str) -> String {
    let cleaned: String = raw
        .replace("\r\n", "\n")
        .chars()
        .filter_map(|c| match c {
            '\r' | '\u{c}' => Some('\n'),
            '\n' | '\t' => Some(c),
            '\u{feff}' => None,
            c if c.is_control() => None,
            c => Some(c),
        })
        .collect();

    let mut out = String::with_capacity(cleaned.len());
    let mut pending_break = false;
    for line in cleaned.split('\n') {
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            if !out.is_empty() {
                pending_break = true;
            }
            continue;
        }
        if !out.is_empty() {
            out.push_str(if pending_break { "\n\n" } else { "\n" });
        }
        pending_break = false;
        out.push_str(&words.join(" "));
    }
    out
}
