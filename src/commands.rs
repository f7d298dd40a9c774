//! Implementations of the `studyctl` subcommands.
//!
//! Each `run_*` function takes the loaded [`Config`] and prints to stdout.
//! Logs go to stderr so `--json` output stays parseable.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use walkdir::WalkDir;

use crate::backend::{BackendRegistry, LocalBackend};
use crate::config::Config;
use crate::extract::Extractor;
use crate::models::{fingerprint, AnalysisParams, DocumentType};
use crate::orchestrator::{CancelHandle, DocumentOutcome, Pipeline, Upload};
use crate::stats::text_complexity;
use crate::store::{InsightStore, SqliteInsightStore};

fn cache_path(config: &Config) -> Result<&Path> {
    config
        .cache
        .path
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("No persistent cache configured. Set [cache] path."))
}

pub async fn run_init(config: &Config) -> Result<()> {
    let path = cache_path(config)?;
    SqliteInsightStore::open(path)
        .await
        .with_context(|| format!("Failed to initialize cache at {}", path.display()))?;
    println!("Cache initialized at {}.", path.display());
    Ok(())
}

/// Declared type for a file: the override, else the extension.
fn declared_type(path: &Path, type_override: Option<&str>) -> String {
    if let Some(t) = type_override {
        return t.to_string();
    }
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

fn read_upload(path: &Path, type_override: Option<&str>) -> Result<Upload> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    Ok(Upload::new(filename, declared_type(path, type_override), bytes))
}

/// Expand directories into the supported files beneath them. Explicit file
/// arguments are kept whatever their type, so unsupported ones get a status.
pub fn collect_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut found = Vec::new();
            for entry in WalkDir::new(path) {
                let entry = entry?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let supported = entry
                    .path()
                    .extension()
                    .map(|e| DocumentType::parse(&e.to_string_lossy()).is_ok())
                    .unwrap_or(false);
                if supported {
                    found.push(entry.into_path());
                }
            }
            found.sort();
            files.extend(found);
        } else if path.exists() {
            files.push(path.clone());
        } else {
            bail!("No such file or directory: {}", path.display());
        }
    }
    Ok(files)
}

pub fn run_extract(path: &Path, type_override: Option<&str>) -> Result<()> {
    let upload = read_upload(path, type_override)?;
    let extracted = Extractor::new().extract(&upload.bytes, &upload.declared_type);

    println!("File:        {}", upload.filename);
    println!("Fingerprint: {}", fingerprint(&upload.bytes));
    println!("Type:        {}", upload.declared_type);
    println!("Method:      {}", extracted.method.as_str());
    println!("Success:     {}", extracted.success);
    println!("Words:       {}", extracted.word_count);
    println!("Characters:  {}", extracted.char_count);
    for warning in &extracted.warnings {
        println!("Warning:     {}", warning);
    }

    if let Some(c) = text_complexity(&extracted.text) {
        println!();
        println!("Sentences:           {}", c.sentence_count);
        println!("Paragraphs:          {}", c.paragraph_count);
        println!("Avg word length:     {:.2}", c.avg_word_length);
        println!("Avg sentence length: {:.2}", c.avg_sentence_length);
        println!("Complexity score:    {}/100", c.complexity_score);
    }

    if !extracted.success {
        bail!("Extraction failed for {}", upload.filename);
    }
    Ok(())
}

pub struct AnalyzeArgs {
    pub paths: Vec<PathBuf>,
    pub backend: Option<String>,
    pub categories: Vec<String>,
    pub max_topics: Option<usize>,
    pub workers: Option<usize>,
    pub json: bool,
}

pub async fn run_analyze(config: &Config, args: AnalyzeArgs) -> Result<()> {
    let files = collect_files(&args.paths)?;
    if files.is_empty() {
        bail!("No supported documents found.");
    }
    let uploads = files
        .iter()
        .map(|f| read_upload(f, None))
        .collect::<Result<Vec<_>>>()?;

    let mut params = AnalysisParams::default();
    if !args.categories.is_empty() {
        params.categories = args.categories;
    }
    if let Some(n) = args.max_topics {
        params.max_topics = n.max(1);
    }
    let backend = args
        .backend
        .unwrap_or_else(|| config.analysis.default_backend.clone());
    if !matches!(backend.as_str(), "remote" | "local" | "mock") {
        bail!("Unknown backend '{}'. Must be remote, local, or mock.", backend);
    }
    let workers = args.workers.unwrap_or(config.analysis.workers).max(1);

    let pipeline = Arc::new(Pipeline::from_config(config).await?);

    let cancel = CancelHandle::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted: finishing in-flight documents, skipping the rest.");
            on_interrupt.cancel();
        }
    });

    let report = pipeline
        .analyze_many(uploads, &backend, &params, workers, &cancel)
        .await;

    if args.json {
        let items: Vec<serde_json::Value> =
            report.outcomes.iter().map(DocumentOutcome::to_json).collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else {
        for outcome in &report.outcomes {
            print_outcome(outcome);
        }
        println!(
            "{} document(s): {} analyzed, {} failed.",
            report.outcomes.len(),
            report.succeeded(),
            report.failed()
        );
    }

    if report.failed() > 0 {
        bail!("{} of {} documents failed", report.failed(), report.outcomes.len());
    }
    Ok(())
}

fn print_outcome(outcome: &DocumentOutcome) {
    let short = &outcome.document.fingerprint[..12.min(outcome.document.fingerprint.len())];
    println!(
        "{}  [{}]  {}",
        outcome.document.filename,
        short,
        outcome.status_line()
    );
    if let Some(extraction) = &outcome.extraction {
        for warning in &extraction.warnings {
            println!("  warning: {}", warning);
        }
    }
    if let Ok(record) = &outcome.result {
        for topic in &record.topics {
            println!(
                "  {:<32} {:>5.1}%  (confidence {:.2})",
                topic.name,
                topic.weight * 100.0,
                topic.confidence
            );
        }
        if !record.summary.is_empty() {
            println!("  Summary: {}", record.summary);
        }
        if !record.question_formats.is_empty() {
            println!("  Question formats: {}", record.question_formats.join(", "));
        }
    }
    println!();
}

pub async fn run_backends(config: &Config) -> Result<()> {
    let registry = BackendRegistry::from_config(config)?;
    let probe_timeout = config.analysis.probe_timeout();

    println!("{:<10} {:<14} AVAILABLE", "BACKEND", "KIND");
    for id in registry.ids() {
        let Some(backend) = registry.get(id) else {
            continue;
        };
        let available = tokio::time::timeout(probe_timeout, backend.is_available())
            .await
            .unwrap_or(false);
        println!("{:<10} {:<14} {}", id, backend.kind().as_str(), available);
    }

    if let Some(local) = &config.backends.local {
        let client = LocalBackend::new(local, probe_timeout, 0)?;
        match tokio::time::timeout(probe_timeout, client.list_models()).await {
            Ok(Ok(models)) if !models.is_empty() => {
                println!();
                println!("Local models (configured: {}):", client.model());
                for model in models {
                    println!("  {}", model);
                }
            }
            Ok(Ok(_)) => println!("\nLocal instance has no models pulled."),
            Ok(Err(e)) => println!("\nCould not list local models: {}", e),
            Err(_) => println!("\nCould not list local models: timed out"),
        }
    }
    Ok(())
}

pub async fn run_invalidate(config: &Config, fingerprint: &str) -> Result<()> {
    let store = SqliteInsightStore::open(cache_path(config)?).await?;
    let removed = store.remove_fingerprint(fingerprint).await?;
    println!("Removed {} cached insight(s) for {}.", removed, fingerprint);
    Ok(())
}

pub async fn run_show(config: &Config, fingerprint: &str) -> Result<()> {
    let store = SqliteInsightStore::open(cache_path(config)?).await?;
    let stored = match store.load_document(fingerprint).await? {
        Some(stored) => stored,
        None => bail!("No document with fingerprint {}", fingerprint),
    };

    let doc = &stored.document;
    let ex = &stored.extraction;
    println!("File:        {}", doc.filename);
    println!("Fingerprint: {}", doc.fingerprint);
    println!("Type:        {}", doc.declared_type);
    println!("Size:        {} bytes", doc.byte_len);
    println!("Uploaded:    {}", doc.uploaded_at.format("%Y-%m-%dT%H:%M:%SZ"));
    println!("Method:      {}", ex.method.as_str());
    println!("Success:     {}", ex.success);
    println!("Words:       {}", ex.word_count);
    for warning in &ex.warnings {
        println!("Warning:     {}", warning);
    }
    Ok(())
}
