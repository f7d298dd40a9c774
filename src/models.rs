//! Core data models that flow through the ingestion and analysis pipeline.
//!
//! A [`Document`] is identified by the SHA-256 fingerprint of its raw bytes.
//! Extraction produces an [`ExtractedText`], the chunker slices it into
//! [`TextChunk`]s, and an analysis backend's answer is normalized into an
//! [`InsightRecord`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::PipelineError;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_TXT: &str = "text/plain";

/// Declared type of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Pdf,
    Docx,
    Txt,
}

impl DocumentType {
    /// Parse a declared type tag. Accepts the short tags (`pdf`, `docx`, `txt`),
    /// their MIME types, and a leading-dot extension.
    pub fn parse(declared: &str) -> Result<Self, PipelineError> {
        let tag = declared.trim().trim_start_matches('.').to_ascii_lowercase();
        match tag.as_str() {
            "pdf" | MIME_PDF => Ok(DocumentType::Pdf),
            "docx" | MIME_DOCX => Ok(DocumentType::Docx),
            "txt" | "text" | "md" | "markdown" | MIME_TXT => Ok(DocumentType::Txt),
            _ => Err(PipelineError::UnsupportedFormat(declared.to_string())),
        }
    }

    /// Guess the declared type from a filename's extension.
    pub fn from_filename(filename: &str) -> Result<Self, PipelineError> {
        match filename.rsplit_once('.') {
            Some((_, ext)) => Self::parse(ext),
            None => Err(PipelineError::UnsupportedFormat(filename.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Pdf => "pdf",
            DocumentType::Docx => "docx",
            DocumentType::Txt => "txt",
        }
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An uploaded file. Immutable; a re-upload produces a new `Document`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Lowercase hex SHA-256 of the raw bytes.
    pub fingerprint: String,
    pub filename: String,
    /// Tag as supplied by the uploader (may not be a supported type).
    pub declared_type: String,
    pub byte_len: u64,
    pub uploaded_at: DateTime<Utc>,
}

impl Document {
    pub fn new(filename: &str, declared_type: &str, bytes: &[u8]) -> Self {
        Self {
            fingerprint: fingerprint(bytes),
            filename: filename.to_string(),
            declared_type: declared_type.to_string(),
            byte_len: bytes.len() as u64,
            uploaded_at: Utc::now(),
        }
    }
}

/// Content fingerprint: a pure function of the bytes.
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// How text was obtained from a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractionMethod {
    PdfExtract,
    LopdfFallback,
    DocxXml,
    PlainUtf8,
    PlainLatin1,
    /// No strategy produced text.
    None,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::PdfExtract => "pdf-extract",
            ExtractionMethod::LopdfFallback => "lopdf-fallback",
            ExtractionMethod::DocxXml => "docx-xml",
            ExtractionMethod::PlainUtf8 => "plain-utf8",
            ExtractionMethod::PlainLatin1 => "plain-latin1",
            ExtractionMethod::None => "none",
        }
    }
}

/// Normalized text for one document. Created once; re-extraction replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedText {
    pub text: String,
    pub method: ExtractionMethod,
    pub success: bool,
    pub word_count: usize,
    pub char_count: usize,
    pub warnings: Vec<String>,
}

impl ExtractedText {
    pub fn succeeded(text: String, method: ExtractionMethod, warnings: Vec<String>) -> Self {
        let word_count = text.split_whitespace().count();
        let char_count = text.chars().count();
        Self {
            text,
            method,
            success: true,
            word_count,
            char_count,
            warnings,
        }
    }

    pub fn failed(warning: String) -> Self {
        Self {
            text: String::new(),
            method: ExtractionMethod::None,
            success: false,
            word_count: 0,
            char_count: 0,
            warnings: vec![warning],
        }
    }

    /// True when there is nothing a backend could analyze.
    pub fn is_empty(&self) -> bool {
        !self.success || self.word_count == 0
    }
}

/// A bounded slice of an [`ExtractedText`].
///
/// `start..end` is the byte span this chunk owns; spans of consecutive chunks
/// are adjacent and together cover the whole source. `text` additionally
/// carries `start - context_start` bytes of leading overlap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    pub index: usize,
    pub start: usize,
    pub end: usize,
    pub context_start: usize,
    pub text: String,
}

impl TextChunk {
    /// The owned span, without the overlap prefix.
    pub fn body(&self) -> &str {
        &self.text[self.start - self.context_start..]
    }
}

/// Caller-supplied knobs that change what a backend is asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisParams {
    /// Insight categories of interest (e.g. `topics`, `weightage`, `summary`).
    pub categories: Vec<String>,
    pub max_topics: usize,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            categories: vec![
                "topics".to_string(),
                "weightage".to_string(),
                "summary".to_string(),
                "question_formats".to_string(),
            ],
            max_topics: 8,
        }
    }
}

impl AnalysisParams {
    /// Canonical string form: categories lowercased, trimmed, sorted, deduplicated.
    pub fn normalized(&self) -> String {
        let mut cats: Vec<String> = self
            .categories
            .iter()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();
        cats.sort();
        cats.dedup();
        format!("categories={};max_topics={}", cats.join(","), self.max_topics)
    }
}

/// Identifies one analysis: which document, which backend, which parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    pub fingerprint: String,
    pub backend: String,
    pub params: AnalysisParams,
}

impl AnalysisRequest {
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(&self.fingerprint, &self.backend, &self.params)
    }
}

/// Deterministic cache key. The params component is a digest of
/// [`AnalysisParams::normalized`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub fingerprint: String,
    pub backend: String,
    pub params_digest: String,
}

impl CacheKey {
    pub fn new(fingerprint: &str, backend: &str, params: &AnalysisParams) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(params.normalized().as_bytes());
        let digest = hex::encode(hasher.finalize());
        Self {
            fingerprint: fingerprint.to_string(),
            backend: backend.to_string(),
            params_digest: digest[..16].to_string(),
        }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let short = &self.fingerprint[..self.fingerprint.len().min(12)];
        write!(f, "{}:{}:{}", short, self.backend, self.params_digest)
    }
}

/// One topic in an insight record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicInsight {
    pub name: String,
    /// Estimated exam weightage in `[0, 1]`.
    pub weight: f64,
    /// Backend confidence in `[0, 1]`.
    pub confidence: f64,
}

/// Canonical analysis output, independent of which backend produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightRecord {
    /// Sorted by weight, descending. Never empty.
    pub topics: Vec<TopicInsight>,
    pub summary: String,
    pub question_formats: Vec<String>,
    pub backend_used: String,
    pub backend_requested: String,
    /// True when `backend_used` differs from `backend_requested`.
    pub fallback_used: bool,
    pub generated_at: DateTime<Utc>,
}

impl InsightRecord {
    /// Status line for the presentation layer.
    pub fn status_message(&self) -> String {
        if self.fallback_used && self.backend_used == crate::backend::MOCK_BACKEND_ID {
            "AI analysis unavailable — showing offline estimate".to_string()
        } else if self.fallback_used {
            format!(
                "'{}' unavailable — analyzed with '{}' instead",
                self.backend_requested, self.backend_used
            )
        } else {
            format!("analyzed with '{}'", self.backend_used)
        }
    }
}

/// A cached insight record and when it was stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub record: InsightRecord,
    pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(record: InsightRecord) -> Self {
        Self {
            record,
            stored_at: Utc::now(),
        }
    }

    pub fn is_stale(&self, window: Option<std::time::Duration>, now: DateTime<Utc>) -> bool {
        match window.and_then(|w| chrono::Duration::from_std(w).ok()) {
            Some(w) => now.signed_duration_since(self.stored_at) > w,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_ignores_filename() {
        let a = Document::new("notes.txt", "txt", b"cell biology");
        let b = Document::new("renamed copy.txt", "txt", b"cell biology");
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_eq!(a.fingerprint.len(), 64);
        assert_ne!(a.fingerprint, fingerprint(b"cell biology!"));
    }

    #[test]
    fn document_type_accepts_tags_and_mime() {
        assert_eq!(DocumentType::parse("PDF").unwrap(), DocumentType::Pdf);
        assert_eq!(DocumentType::parse(MIME_DOCX).unwrap(), DocumentType::Docx);
        assert_eq!(DocumentType::parse(".txt").unwrap(), DocumentType::Txt);
        assert!(matches!(
            DocumentType::parse("pptx"),
            Err(PipelineError::UnsupportedFormat(_))
        ));
        assert_eq!(
            DocumentType::from_filename("Week 3.Lecture.docx").unwrap(),
            DocumentType::Docx
        );
    }

    #[test]
    fn params_normalization_is_order_insensitive() {
        let a = AnalysisParams {
            categories: vec!["Summary".into(), "topics".into(), "topics".into()],
            max_topics: 5,
        };
        let b = AnalysisParams {
            categories: vec![" topics".into(), "summary".into()],
            max_topics: 5,
        };
        assert_eq!(a.normalized(), b.normalized());
        assert_eq!(
            CacheKey::new("ab", "mock", &a),
            CacheKey::new("ab", "mock", &b)
        );
        let c = AnalysisParams {
            max_topics: 6,
            ..b.clone()
        };
        assert_ne!(CacheKey::new("ab", "mock", &b), CacheKey::new("ab", "mock", &c));
    }

    #[test]
    fn empty_extraction_counts() {
        let e = ExtractedText::succeeded(String::new(), ExtractionMethod::PlainUtf8, vec![]);
        assert!(e.success);
        assert_eq!(e.word_count, 0);
        assert!(e.is_empty());
    }

    #[test]
    fn staleness_window() {
        let record = InsightRecord {
            topics: vec![],
            summary: String::new(),
            question_formats: vec![],
            backend_used: "mock".into(),
            backend_requested: "mock".into(),
            fallback_used: false,
            generated_at: Utc::now(),
        };
        let entry = CacheEntry::new(record);
        let later = entry.stored_at + chrono::Duration::seconds(120);
        assert!(!entry.is_stale(None, later));
        assert!(!entry.is_stale(Some(std::time::Duration::from_secs(300)), later));
        assert!(entry.is_stale(Some(std::time::Duration::from_secs(60)), later));
    }
}
