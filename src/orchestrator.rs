//! Analysis orchestration: cache, chunk, dispatch with fallback, normalize.
//!
//! [`Pipeline`] is the explicit context a caller builds once (usually from a
//! [`Config`]) and shares across tasks. It owns the extractor, the immutable
//! [`BackendRegistry`], the [`ResultCache`] and the limits that apply to every
//! analysis.
//!
//! # Flow for one document
//!
//! 1. Look up `(fingerprint, preference, params)` in the cache. A fresh hit
//!    returns immediately without touching any backend.
//! 2. Refuse empty or failed extractions with
//!    [`PipelineError::NoContentToAnalyze`].
//! 3. Chunk the text.
//! 4. Walk the registry's fallback chain. Each attempt probes availability
//!    under the probe timeout, then calls `analyze` under the backend timeout,
//!    then normalizes. Any failure moves on to the next backend.
//! 5. Write the record through to the cache and return it. A record produced
//!    by a fallback is cached under the requested key too; it carries
//!    `fallback_used` so callers can still tell.
//!
//! Before analysis, [`Pipeline::process`] records the document. If an earlier
//! upload with the same filename had a different fingerprint, every cached
//! insight for that old fingerprint is invalidated.
//!
//! # Bulk runs
//!
//! [`Pipeline::analyze_many`] runs one task per document on a
//! [`JoinSet`], gated by a [`Semaphore`] of `workers` permits. Outcomes are
//! returned in request order whatever the completion order. A
//! [`CancelHandle`] stops documents that have not started yet.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::backend::{AnalysisBackend, BackendError, BackendRegistry};
use crate::cache::ResultCache;
use crate::chunk::chunk;
use crate::config::Config;
use crate::error::PipelineError;
use crate::extract::Extractor;
use crate::insight::{normalize, NormalizeOptions};
use crate::models::{
    AnalysisParams, AnalysisRequest, Document, ExtractedText, InsightRecord, TextChunk,
};
use crate::store::{InsightStore, SqliteInsightStore};

/// Limits applied to every analysis.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_chunk_chars: usize,
    pub overlap_chars: usize,
    pub backend_timeout: Duration,
    pub probe_timeout: Duration,
    pub summary_max_chars: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&Config::minimal())
    }
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_chunk_chars: config.chunking.max_chars,
            overlap_chars: config.chunking.overlap_chars,
            backend_timeout: config.analysis.backend_timeout(),
            probe_timeout: config.analysis.probe_timeout(),
            summary_max_chars: config.analysis.summary_max_chars,
        }
    }
}

/// Raw bytes of one uploaded file.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub declared_type: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(filename: impl Into<String>, declared_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            declared_type: declared_type.into(),
            bytes,
        }
    }
}

/// What happened to one document.
#[derive(Debug, Clone)]
pub struct DocumentOutcome {
    pub document: Document,
    /// `None` when the document never started (cancelled) or its task died.
    pub extraction: Option<ExtractedText>,
    pub result: Result<InsightRecord, PipelineError>,
    /// True when `result` came from the cache.
    pub cache_hit: bool,
}

impl DocumentOutcome {
    fn without_extraction(document: Document, err: PipelineError) -> Self {
        Self {
            document,
            extraction: None,
            result: Err(err),
            cache_hit: false,
        }
    }

    /// One-line status for display next to the document.
    pub fn status_line(&self) -> String {
        match &self.result {
            Ok(record) if self.cache_hit => format!("{} (cached)", record.status_message()),
            Ok(record) => record.status_message(),
            Err(e) => e.user_message(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        #[derive(Serialize)]
        struct View<'a> {
            fingerprint: &'a str,
            filename: &'a str,
            status: String,
            cache_hit: bool,
            extraction: Option<&'a ExtractedTextView<'a>>,
            insight: Option<&'a InsightRecord>,
            error: Option<String>,
        }
        #[derive(Serialize)]
        struct ExtractedTextView<'a> {
            method: &'a str,
            success: bool,
            word_count: usize,
            char_count: usize,
            warnings: &'a [String],
        }

        let extraction = self.extraction.as_ref().map(|e| ExtractedTextView {
            method: e.method.as_str(),
            success: e.success,
            word_count: e.word_count,
            char_count: e.char_count,
            warnings: &e.warnings,
        });
        let view = View {
            fingerprint: &self.document.fingerprint,
            filename: &self.document.filename,
            status: self.status_line(),
            cache_hit: self.cache_hit,
            extraction: extraction.as_ref(),
            insight: self.result.as_ref().ok(),
            error: self.result.as_ref().err().map(|e| e.to_string()),
        };
        serde_json::to_value(view).unwrap_or(serde_json::Value::Null)
    }
}

/// Outcomes of a bulk run, in request order.
#[derive(Debug, Default)]
pub struct BulkReport {
    pub outcomes: Vec<DocumentOutcome>,
}

impl BulkReport {
    pub fn by_fingerprint(&self) -> HashMap<&str, &DocumentOutcome> {
        self.outcomes
            .iter()
            .map(|o| (o.document.fingerprint.as_str(), o))
            .collect()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Cooperative cancellation for bulk runs.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Pipeline {
    extractor: Extractor,
    registry: BackendRegistry,
    cache: ResultCache,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        extractor: Extractor,
        registry: BackendRegistry,
        cache: ResultCache,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            extractor,
            registry,
            cache,
            settings,
        }
    }

    /// Build the pipeline described by `config`, opening the SQLite cache when
    /// `[cache] path` is set.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let registry = BackendRegistry::from_config(config)?;
        let store: Option<Arc<dyn InsightStore>> = match &config.cache.path {
            Some(path) => Some(Arc::new(SqliteInsightStore::open(path).await?)),
            None => None,
        };
        let cache = ResultCache::new(store, config.cache.stale_after());
        Ok(Self::new(
            Extractor::new(),
            registry,
            cache,
            PipelineSettings::from(config),
        ))
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Produce the insight record for an extracted document.
    pub async fn analyze_document(
        &self,
        document: &Document,
        extracted: &ExtractedText,
        backend_preference: &str,
        params: &AnalysisParams,
    ) -> Result<InsightRecord, PipelineError> {
        self.analyze_with_cache_flag(document, extracted, backend_preference, params)
            .await
            .map(|(record, _)| record)
    }

    async fn analyze_with_cache_flag(
        &self,
        document: &Document,
        extracted: &ExtractedText,
        backend_preference: &str,
        params: &AnalysisParams,
    ) -> Result<(InsightRecord, bool), PipelineError> {
        let request = AnalysisRequest {
            fingerprint: document.fingerprint.clone(),
            backend: backend_preference.to_string(),
            params: params.clone(),
        };
        let key = request.cache_key();

        if let Some(record) = self.cache.get(&key).await {
            debug!(fingerprint = %document.fingerprint, backend = backend_preference, "cache hit");
            return Ok((record, true));
        }

        if extracted.is_empty() {
            return Err(PipelineError::NoContentToAnalyze);
        }

        let chunks = chunk(
            extracted,
            self.settings.max_chunk_chars,
            self.settings.overlap_chars,
        );
        let options = NormalizeOptions {
            max_topics: params.max_topics,
            summary_max_chars: self.settings.summary_max_chars,
        };

        let mut last_err = None;
        for backend_id in self.registry.fallback_chain(backend_preference) {
            let started = Instant::now();
            let attempt = match self.registry.get(&backend_id) {
                Some(backend) => {
                    self.attempt(backend.as_ref(), &chunks, params, backend_preference, options)
                        .await
                }
                None => Err(PipelineError::BackendUnavailable {
                    backend: backend_id.clone(),
                    reason: "not configured".to_string(),
                }),
            };

            match attempt {
                Ok(record) => {
                    info!(
                        fingerprint = %document.fingerprint,
                        backend = %backend_id,
                        fallback = record.fallback_used,
                        topics = record.topics.len(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "analysis complete"
                    );
                    self.cache.put(key, record.clone()).await;
                    return Ok((record, false));
                }
                Err(e) if e.is_recoverable() => {
                    warn!(
                        fingerprint = %document.fingerprint,
                        backend = %backend_id,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        error = %e,
                        "backend attempt failed"
                    );
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        let reason = last_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no backend attempted".to_string());
        error!(fingerprint = %document.fingerprint, %reason, "analysis unavailable");
        Err(PipelineError::AnalysisUnavailable(reason))
    }

    async fn attempt(
        &self,
        backend: &dyn AnalysisBackend,
        chunks: &[TextChunk],
        params: &AnalysisParams,
        requested: &str,
        options: NormalizeOptions,
    ) -> Result<InsightRecord, PipelineError> {
        let id = backend.id().to_string();

        let available = tokio::time::timeout(self.settings.probe_timeout, backend.is_available())
            .await
            .unwrap_or(false);
        if !available {
            return Err(PipelineError::BackendUnavailable {
                backend: id,
                reason: "availability probe failed".to_string(),
            });
        }

        let raw = match tokio::time::timeout(
            self.settings.backend_timeout,
            backend.analyze(chunks, params),
        )
        .await
        {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => return Err(e.into_pipeline(&id)),
            Err(_) => {
                return Err(BackendError::Timeout(self.settings.backend_timeout).into_pipeline(&id))
            }
        };

        normalize(&raw, &id, requested, options)
            .map_err(|reason| PipelineError::MalformedBackendResponse { backend: id, reason })
    }

    /// Extract text from an upload. Never fails; problems are reported in the
    /// returned record and as the error that analysis would hit.
    pub fn extract(&self, upload: &Upload) -> (ExtractedText, Option<PipelineError>) {
        match self.extractor.try_extract(&upload.bytes, &upload.declared_type) {
            Ok(extracted) => (extracted, None),
            Err(e) => {
                warn!(filename = %upload.filename, error = %e, "extraction failed");
                let extracted = ExtractedText::failed(e.warning());
                (extracted, Some(e.into()))
            }
        }
    }

    /// Full pipeline for one upload: fingerprint, extract, record, analyze.
    pub async fn process(
        &self,
        upload: &Upload,
        backend_preference: &str,
        params: &AnalysisParams,
    ) -> DocumentOutcome {
        let document = Document::new(&upload.filename, &upload.declared_type, &upload.bytes);
        self.process_document(document, upload, backend_preference, params)
            .await
    }

    async fn process_document(
        &self,
        document: Document,
        upload: &Upload,
        backend_preference: &str,
        params: &AnalysisParams,
    ) -> DocumentOutcome {
        let (extracted, extraction_err) = self.extract(upload);
        if let Some(previous) = self.cache.previous_fingerprint(&document.filename).await {
            if previous != document.fingerprint {
                let removed = self.cache.invalidate(&previous).await;
                info!(
                    filename = %document.filename,
                    previous = %previous,
                    fingerprint = %document.fingerprint,
                    removed,
                    "content changed since last upload, dropped old insights"
                );
            }
        }
        self.cache.record_document(&document, &extracted).await;

        let (result, cache_hit) = match extraction_err {
            Some(e) => (Err(e), false),
            None => match self
                .analyze_with_cache_flag(&document, &extracted, backend_preference, params)
                .await
            {
                Ok((record, hit)) => (Ok(record), hit),
                Err(e) => (Err(e), false),
            },
        };

        DocumentOutcome {
            document,
            extraction: Some(extracted),
            result,
            cache_hit,
        }
    }

    /// Analyze many uploads with at most `workers` in flight.
    pub async fn analyze_many(
        self: &Arc<Self>,
        uploads: Vec<Upload>,
        backend_preference: &str,
        params: &AnalysisParams,
        workers: usize,
        cancel: &CancelHandle,
    ) -> BulkReport {
        let semaphore = Arc::new(Semaphore::new(workers.max(1)));
        let mut tasks = JoinSet::new();
        let mut documents = Vec::with_capacity(uploads.len());

        for (index, upload) in uploads.into_iter().enumerate() {
            let document = Document::new(&upload.filename, &upload.declared_type, &upload.bytes);
            documents.push(document.clone());

            let pipeline = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let preference = backend_preference.to_string();
            let params = params.clone();

            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            index,
                            DocumentOutcome::without_extraction(document, PipelineError::Cancelled),
                        )
                    }
                };
                if cancel.is_cancelled() {
                    debug!(fingerprint = %document.fingerprint, "skipping cancelled document");
                    return (
                        index,
                        DocumentOutcome::without_extraction(document, PipelineError::Cancelled),
                    );
                }
                let outcome = pipeline
                    .process_document(document, &upload, &preference, &params)
                    .await;
                (index, outcome)
            });
        }

        let mut slots: Vec<Option<DocumentOutcome>> = documents.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => error!(error = %e, "analysis task failed"),
            }
        }

        let outcomes: Vec<DocumentOutcome> = slots
            .into_iter()
            .zip(documents)
            .map(|(slot, document)| {
                slot.unwrap_or_else(|| {
                    DocumentOutcome::without_extraction(
                        document,
                        PipelineError::AnalysisUnavailable("analysis task aborted".to_string()),
                    )
                })
            })
            .collect();

        let report = BulkReport { outcomes };
        info!(
            documents = report.outcomes.len(),
            succeeded = report.succeeded(),
            failed = report.failed(),
            "bulk analysis finished"
        );
        report
    }
}
