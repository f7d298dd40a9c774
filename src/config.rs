use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub backends: BackendsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default)]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: 0,
        }
    }
}

fn default_max_chars() -> usize {
    4000
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_backend_timeout_secs")]
    pub backend_timeout_secs: u64,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_summary_max_chars")]
    pub summary_max_chars: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Backend used when a request does not name one.
    #[serde(default = "default_backend")]
    pub default_backend: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            backend_timeout_secs: default_backend_timeout_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            summary_max_chars: default_summary_max_chars(),
            max_retries: default_max_retries(),
            default_backend: default_backend(),
        }
    }
}

impl AnalysisConfig {
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

fn default_workers() -> usize {
    4
}
fn default_backend_timeout_secs() -> u64 {
    60
}
fn default_probe_timeout_secs() -> u64 {
    3
}
fn default_summary_max_chars() -> usize {
    1200
}
fn default_max_retries() -> u32 {
    2
}
fn default_backend() -> String {
    "mock".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CacheConfig {
    /// SQLite file backing the cache. Memory-only when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub stale_after_secs: Option<u64>,
}

impl CacheConfig {
    pub fn stale_after(&self) -> Option<Duration> {
        self.stale_after_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct BackendsConfig {
    #[serde(default)]
    pub remote: Option<RemoteBackendConfig>,
    #[serde(default)]
    pub local: Option<LocalBackendConfig>,
    /// Explicitly accepted substitutes per backend id, tried before mock.
    #[serde(default)]
    pub fallbacks: HashMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteBackendConfig {
    #[serde(default = "default_remote_url")]
    pub url: String,
    #[serde(default = "default_remote_model")]
    pub model: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_remote_url() -> String {
    "https://api.deepseek.com".to_string()
}
fn default_remote_model() -> String {
    "deepseek-chat".to_string()
}
fn default_api_key_env() -> String {
    "DEEPSEEK_API_KEY".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LocalBackendConfig {
    #[serde(default = "default_local_url")]
    pub url: String,
    #[serde(default = "default_local_model")]
    pub model: String,
}

fn default_local_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_local_model() -> String {
    "llama2".to_string()
}

impl Config {
    /// Mock backend only, memory cache, default limits.
    pub fn minimal() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            analysis: AnalysisConfig::default(),
            cache: CacheConfig::default(),
            backends: BackendsConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.max_chars {
        anyhow::bail!("chunking.overlap_chars must be smaller than chunking.max_chars");
    }

    if config.analysis.workers == 0 {
        anyhow::bail!("analysis.workers must be >= 1");
    }
    if config.analysis.backend_timeout_secs == 0 || config.analysis.probe_timeout_secs == 0 {
        anyhow::bail!("analysis timeouts must be > 0");
    }
    if config.analysis.summary_max_chars == 0 {
        anyhow::bail!("analysis.summary_max_chars must be > 0");
    }

    let known = |id: &str| matches!(id, "remote" | "local" | "mock");
    if !known(&config.analysis.default_backend) {
        anyhow::bail!(
            "Unknown analysis.default_backend '{}'. Must be remote, local, or mock.",
            config.analysis.default_backend
        );
    }

    for (from, alternatives) in &config.backends.fallbacks {
        for id in std::iter::once(from).chain(alternatives.iter()) {
            if !known(id) {
                anyhow::bail!(
                    "Unknown backend '{}' in backends.fallbacks. Must be remote, local, or mock.",
                    id
                );
            }
        }
    }

    Ok(())
}
