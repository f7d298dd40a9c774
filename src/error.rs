//! Pipeline error taxonomy.
//!
//! Every per-document failure in the ingestion and analysis pipeline is a
//! [`PipelineError`]. Recoverable variants (`ExtractionFailed`,
//! `BackendUnavailable`, `MalformedBackendResponse`) are handled inside the
//! pipeline; the rest surface to the caller as a per-document status.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PipelineError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("text extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("document has no extractable content to analyze")]
    NoContentToAnalyze,

    #[error("backend '{backend}' unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("backend '{backend}' returned a malformed response: {reason}")]
    MalformedBackendResponse { backend: String, reason: String },

    #[error("analysis unavailable: every backend failed (last error: {0})")]
    AnalysisUnavailable(String),

    #[error("analysis cancelled before it started")]
    Cancelled,

    #[error("store error: {0}")]
    Store(String),
}

impl PipelineError {
    /// Whether the orchestrator may recover by trying the next backend.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::ExtractionFailed(_)
                | PipelineError::BackendUnavailable { .. }
                | PipelineError::MalformedBackendResponse { .. }
        )
    }

    /// Short status line suitable for showing next to a document.
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::UnsupportedFormat(t) => {
                format!("unsupported file type '{}' — upload a PDF, DOCX or TXT file", t)
            }
            PipelineError::ExtractionFailed(_) => {
                "could not extract text — file may be corrupted or password-protected".to_string()
            }
            PipelineError::NoContentToAnalyze => {
                "nothing to analyze — no text was found in this document".to_string()
            }
            PipelineError::BackendUnavailable { backend, .. } => {
                format!("AI backend '{}' is not reachable", backend)
            }
            PipelineError::MalformedBackendResponse { backend, .. } => {
                format!("AI backend '{}' returned an unreadable answer", backend)
            }
            PipelineError::AnalysisUnavailable(_) => {
                "AI analysis unavailable — no backend could analyze this document".to_string()
            }
            PipelineError::Cancelled => "skipped — the batch was cancelled".to_string(),
            PipelineError::Store(_) => "could not read or write saved results".to_string(),
        }
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        PipelineError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Store(format!("serialization: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
