//! Remote analysis through an OpenAI-compatible chat completions API.
//!
//! Defaults target DeepSeek (`https://api.deepseek.com`, model
//! `deepseek-chat`). The API key is read once from the environment variable
//! named in `[backends.remote] api_key_env`; it is held in memory only and is
//! redacted from `Debug` output and logs.

use std::fmt;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};

use super::prompt::{chunk_prompt, system_prompt};
use super::{
    chunk_shares, send_json_with_retry, AnalysisBackend, BackendError, BackendKind, RawBody,
    RawPart, RawResponse, REMOTE_BACKEND_ID,
};
use crate::config::RemoteBackendConfig;
use crate::models::{AnalysisParams, TextChunk};

pub struct RemoteBackend {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
    api_key_env: String,
    max_retries: u32,
}

impl fmt::Debug for RemoteBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteBackend")
            .field("url", &self.url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl RemoteBackend {
    /// Create a backend with a caller-supplied key. `None` leaves the backend
    /// registered but unavailable.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        config: &RemoteBackendConfig,
        api_key: Option<String>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            api_key_env: config.api_key_env.clone(),
            max_retries,
        })
    }

    /// Create a backend reading the key from `config.api_key_env`.
    pub fn from_env(
        config: &RemoteBackendConfig,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).ok();
        if api_key.is_none() {
            debug!(
                env = %config.api_key_env,
                "remote backend has no API key and will report unavailable"
            );
        }
        Self::new(config, api_key, timeout, max_retries)
    }

    fn key(&self) -> Result<&str, BackendError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| BackendError::Unavailable(format!("{} not set", self.api_key_env)))
    }
}

#[async_trait]
impl AnalysisBackend for RemoteBackend {
    fn id(&self) -> &str {
        REMOTE_BACKEND_ID
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    async fn analyze(
        &self,
        chunks: &[TextChunk],
        params: &AnalysisParams,
    ) -> Result<RawResponse, BackendError> {
        let api_key = self.key()?;
        let endpoint = format!("{}/chat/completions", self.url);
        let shares = chunk_shares(chunks);
        let mut parts = Vec::with_capacity(chunks.len());

        for (chunk, share) in chunks.iter().zip(shares) {
            let body = serde_json::json!({
                "model": self.model,
                "messages": [
                    { "role": "system", "content": system_prompt() },
                    { "role": "user", "content": chunk_prompt(chunk, chunk.index + 1, chunks.len(), params) },
                ],
                "temperature": 0.2,
                "response_format": { "type": "json_object" },
                "stream": false,
            });

            let json = send_json_with_retry(
                || {
                    self.client
                        .post(&endpoint)
                        .bearer_auth(api_key)
                        .json(&body)
                },
                self.max_retries,
                REMOTE_BACKEND_ID,
            )
            .await?;

            let content = parse_chat_content(&json)?;
            debug!(chunk = chunk.index, bytes = content.len(), "remote chunk analyzed");
            parts.push(RawPart {
                share,
                body: RawBody::Text(content),
            });
        }

        info!(model = %self.model, chunks = chunks.len(), "remote analysis complete");
        Ok(RawResponse { parts })
    }

    async fn is_available(&self) -> bool {
        let Ok(api_key) = self.key() else {
            return false;
        };
        match self
            .client
            .get(format!("{}/models", self.url))
            .bearer_auth(api_key)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "remote probe failed");
                false
            }
        }
    }
}

/// Extract `choices[0].message.content` from a chat completions response.
fn parse_chat_content(json: &serde_json::Value) -> Result<String, BackendError> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| BackendError::Malformed("missing choices[0].message.content".into()))
}
