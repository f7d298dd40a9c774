//! Analysis backend abstraction and registry.
//!
//! Defines the [`AnalysisBackend`] capability trait and the closed set of
//! built-in implementations:
//! - **[`RemoteBackend`]**: OpenAI-compatible chat completions API (DeepSeek by default).
//! - **[`LocalBackend`]**: a local Ollama instance's `/api/generate` endpoint.
//! - **[`MockBackend`]**: offline term-frequency estimate; always available.
//!
//! Backends return a [`RawResponse`] that is still untrusted; the
//! [`insight`](crate::insight) module turns it into an
//! [`InsightRecord`](crate::models::InsightRecord).
//!
//! # Backend Selection
//!
//! [`BackendRegistry::from_config`] builds the registry. The mock backend is
//! always registered. [`BackendRegistry::fallback_chain`] yields the order in
//! which backends are tried: the preferred one, any alternatives listed under
//! `[backends.fallbacks]`, then mock. Remote and local are never substituted
//! for each other unless listed there.

pub mod local;
pub mod mock;
pub mod prompt;
pub mod remote;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::config::Config;
use crate::error::PipelineError;
use crate::models::{AnalysisParams, TextChunk};

pub use local::LocalBackend;
pub use mock::MockBackend;
pub use remote::RemoteBackend;

pub const REMOTE_BACKEND_ID: &str = "remote";
pub const LOCAL_BACKEND_ID: &str = "local";
pub const MOCK_BACKEND_ID: &str = "mock";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Remote,
    Local,
    Mock,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Remote => "remote api",
            BackendKind::Local => "local llm",
            BackendKind::Mock => "offline mock",
        }
    }
}

/// Untrusted payload of one backend answer.
#[derive(Debug, Clone, PartialEq)]
pub enum RawBody {
    /// Structured JSON, as produced by the mock backend.
    Json(serde_json::Value),
    /// Free text from an LLM that should contain a JSON object.
    Text(String),
}

/// One answer covering part of the document.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPart {
    /// Fraction of the document's text this part covers.
    pub share: f64,
    pub body: RawBody,
}

/// Everything a backend returned for one analysis, one part per request made.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawResponse {
    pub parts: Vec<RawPart>,
}

impl RawResponse {
    pub fn single(body: RawBody) -> Self {
        Self {
            parts: vec![RawPart { share: 1.0, body }],
        }
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("not available: {0}")]
    Unavailable(String),
    #[error("authentication rejected ({0})")]
    Auth(u16),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl BackendError {
    pub fn into_pipeline(self, backend: &str) -> PipelineError {
        match self {
            BackendError::Malformed(reason) => PipelineError::MalformedBackendResponse {
                backend: backend.to_string(),
                reason,
            },
            other => PipelineError::BackendUnavailable {
                backend: backend.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BackendError::Malformed(err.to_string())
        } else {
            BackendError::Transport(err.to_string())
        }
    }
}

/// Capability interface every analysis backend implements.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// Registry identifier (e.g. `"remote"`, `"local"`, `"mock"`).
    fn id(&self) -> &str;

    fn kind(&self) -> BackendKind;

    /// Analyze the ordered chunks of one document.
    async fn analyze(
        &self,
        chunks: &[TextChunk],
        params: &AnalysisParams,
    ) -> Result<RawResponse, BackendError>;

    /// Cheap liveness probe. Callers bound it with a short timeout.
    async fn is_available(&self) -> bool;
}

/// Configured backends, immutable for the duration of a pipeline run.
pub struct BackendRegistry {
    backends: BTreeMap<String, Arc<dyn AnalysisBackend>>,
    fallbacks: HashMap<String, Vec<String>>,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendRegistry {
    /// A registry holding only the mock backend.
    pub fn new() -> Self {
        let mut registry = Self {
            backends: BTreeMap::new(),
            fallbacks: HashMap::new(),
        };
        registry.register(Arc::new(MockBackend::new()));
        registry
    }

    /// Build the registry described by `[backends]`.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be constructed.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut registry = Self::new();
        let timeout = config.analysis.backend_timeout();

        if let Some(remote) = &config.backends.remote {
            registry.register(Arc::new(RemoteBackend::from_env(
                remote,
                timeout,
                config.analysis.max_retries,
            )?));
        }
        if let Some(local) = &config.backends.local {
            registry.register(Arc::new(LocalBackend::new(
                local,
                timeout,
                config.analysis.max_retries,
            )?));
        }
        for (from, alternatives) in &config.backends.fallbacks {
            registry.set_fallbacks(from, alternatives.clone());
        }
        Ok(registry)
    }

    /// Add a backend, replacing any existing one with the same id.
    pub fn register(&mut self, backend: Arc<dyn AnalysisBackend>) {
        self.backends.insert(backend.id().to_string(), backend);
    }

    /// Declare which backends may stand in for `from` before mock is used.
    pub fn set_fallbacks(&mut self, from: &str, alternatives: Vec<String>) {
        self.fallbacks.insert(from.to_string(), alternatives);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn AnalysisBackend>> {
        self.backends.get(id).cloned()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.backends.keys().map(|k| k.as_str())
    }

    /// Order in which backends are attempted for a preference.
    /// `"mock"` means mock only.
    pub fn fallback_chain(&self, preferred: &str) -> Vec<String> {
        let mut chain = vec![preferred.to_string()];
        if preferred == MOCK_BACKEND_ID {
            return chain;
        }
        if let Some(alternatives) = self.fallbacks.get(preferred) {
            for alt in alternatives {
                if alt != MOCK_BACKEND_ID && !chain.contains(alt) {
                    chain.push(alt.clone());
                }
            }
        }
        chain.push(MOCK_BACKEND_ID.to_string());
        chain
    }
}

/// Fraction of the document each chunk's owned span covers.
pub(crate) fn chunk_shares(chunks: &[TextChunk]) -> Vec<f64> {
    let total: usize = chunks.iter().map(|c| c.end - c.start).sum();
    if total == 0 {
        return vec![1.0 / chunks.len().max(1) as f64; chunks.len()];
    }
    chunks
        .iter()
        .map(|c| (c.end - c.start) as f64 / total as f64)
        .collect()
}

const MAX_ERROR_BODY: usize = 300;

/// Send a JSON request with retry and exponential backoff.
///
/// - HTTP 429 or 5xx → retry
/// - HTTP 401/403 → [`BackendError::Auth`], no retry
/// - other HTTP 4xx → fail immediately
/// - network error → retry
pub(crate) async fn send_json_with_retry<F>(
    build: F,
    max_retries: u32,
    backend: &str,
) -> Result<serde_json::Value, BackendError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            // 1s, 2s, 4s, ... capped at 32s
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            debug!(backend, attempt, ?delay, "retrying backend request");
            tokio::time::sleep(delay).await;
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response.json().await?);
                }

                let code = status.as_u16();
                if code == 401 || code == 403 {
                    return Err(BackendError::Auth(code));
                }

                let mut body = response.text().await.unwrap_or_default();
                if body.len() > MAX_ERROR_BODY {
                    let mut cut = MAX_ERROR_BODY;
                    while !body.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    body.truncate(cut);
                }
                let err = BackendError::Http { status: code, body };
                if code == 429 || status.is_server_error() {
                    last_err = Some(err);
                    continue;
                }
                return Err(err);
            }
            Err(e) => {
                last_err = Some(e.into());
            }
        }
    }

    Err(last_err
        .unwrap_or_else(|| BackendError::Transport(format!("{} failed after retries", backend))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_is_always_registered() {
        let registry = BackendRegistry::new();
        assert!(registry.get(MOCK_BACKEND_ID).is_some());
        assert_eq!(registry.ids().collect::<Vec<_>>(), vec!["mock"]);
    }

    #[test]
    fn chain_without_alternatives_goes_straight_to_mock() {
        let registry = BackendRegistry::new();
        assert_eq!(registry.fallback_chain("remote"), vec!["remote", "mock"]);
        assert_eq!(registry.fallback_chain("local"), vec!["local", "mock"]);
    }

    #[test]
    fn mock_preference_is_mock_only() {
        let mut registry = BackendRegistry::new();
        registry.set_fallbacks("mock", vec!["remote".to_string()]);
        assert_eq!(registry.fallback_chain("mock"), vec!["mock"]);
    }

    #[test]
    fn explicit_alternatives_precede_mock() {
        let mut registry = BackendRegistry::new();
        registry.set_fallbacks(
            "remote",
            vec!["local".to_string(), "mock".to_string(), "remote".to_string()],
        );
        assert_eq!(
            registry.fallback_chain("remote"),
            vec!["remote", "local", "mock"]
        );
        // Only the listed direction is allowed
        assert_eq!(registry.fallback_chain("local"), vec!["local", "mock"]);
    }

    #[test]
    fn shares_follow_owned_span_lengths() {
        let chunk = |start, end| TextChunk {
            index: 0,
            start,
            end,
            context_start: start,
            text: String::new(),
        };
        let shares = chunk_shares(&[chunk(0, 30), chunk(30, 40)]);
        assert!((shares[0] - 0.75).abs() < 1e-9);
        assert!((shares[1] - 0.25).abs() < 1e-9);
    }

    #[test]
    fn malformed_maps_to_malformed_pipeline_error() {
        let err = BackendError::Malformed("no topics".into()).into_pipeline("local");
        assert!(matches!(err, PipelineError::MalformedBackendResponse { .. }));
        let err = BackendError::Timeout(Duration::from_secs(1)).into_pipeline("local");
        assert!(matches!(err, PipelineError::BackendUnavailable { .. }));
    }
}
