//! Local analysis through an Ollama instance.
//!
//! Calls `POST /api/generate` with `stream: false` and `format: "json"` for
//! each chunk. The model's `response` string is returned as free text; the
//! insight normalizer locates the JSON object inside it.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};

use super::prompt::{chunk_prompt, system_prompt};
use super::{
    chunk_shares, send_json_with_retry, AnalysisBackend, BackendError, BackendKind, RawBody,
    RawPart, RawResponse, LOCAL_BACKEND_ID,
};
use crate::config::LocalBackendConfig;
use crate::models::{AnalysisParams, TextChunk};

#[derive(Debug)]
pub struct LocalBackend {
    client: reqwest::Client,
    url: String,
    model: String,
    max_retries: u32,
}

impl LocalBackend {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &LocalBackendConfig, timeout: Duration, max_retries: u32) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_retries,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Names of the models pulled into the Ollama instance.
    pub async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.url))
            .send()
            .await
            .map_err(|e| {
                BackendError::Unavailable(format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url, e
                ))
            })?;
        if !response.status().is_success() {
            return Err(BackendError::Http {
                status: response.status().as_u16(),
                body: String::new(),
            });
        }
        let json: serde_json::Value = response.json().await?;
        parse_model_names(&json)
    }
}

#[async_trait]
impl AnalysisBackend for LocalBackend {
    fn id(&self) -> &str {
        LOCAL_BACKEND_ID
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn analyze(
        &self,
        chunks: &[TextChunk],
        params: &AnalysisParams,
    ) -> Result<RawResponse, BackendError> {
        let endpoint = format!("{}/api/generate", self.url);
        let shares = chunk_shares(chunks);
        let mut parts = Vec::with_capacity(chunks.len());

        for (chunk, share) in chunks.iter().zip(shares) {
            let body = serde_json::json!({
                "model": self.model,
                "system": system_prompt(),
                "prompt": chunk_prompt(chunk, chunk.index + 1, chunks.len(), params),
                "format": "json",
                "stream": false,
            });

            let json = send_json_with_retry(
                || self.client.post(&endpoint).json(&body),
                self.max_retries,
                LOCAL_BACKEND_ID,
            )
            .await
            .map_err(|e| match e {
                BackendError::Transport(reason) => BackendError::Unavailable(format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url, reason
                )),
                other => other,
            })?;

            let text = json
                .get("response")
                .and_then(|r| r.as_str())
                .ok_or_else(|| BackendError::Malformed("missing response field".into()))?;
            debug!(chunk = chunk.index, bytes = text.len(), "local chunk analyzed");
            parts.push(RawPart {
                share,
                body: RawBody::Text(text.to_string()),
            });
        }

        info!(model = %self.model, chunks = chunks.len(), "local analysis complete");
        Ok(RawResponse { parts })
    }

    async fn is_available(&self) -> bool {
        match self.client.get(format!("{}/api/tags", self.url)).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(url = %self.url, error = %e, "local probe failed");
                false
            }
        }
    }
}

fn parse_model_names(json: &serde_json::Value) -> Result<Vec<String>, BackendError> {
    let models = json
        .get("models")
        .and_then(|m| m.as_array())
        .ok_or_else(|| BackendError::Malformed("missing models array".into()))?;
    Ok(models
        .iter()
        .filter_map(|m| m.get("name").and_then(|n| n.as_str()))
        .map(str::to_string)
        .collect())
}
