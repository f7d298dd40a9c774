//! # Study Insights
//!
//! A local-first ingestion and analysis pipeline for study documents.
//!
//! Uploaded PDF, DOCX and plain-text files are fingerprinted, their text is
//! extracted and chunked, and the chunks are sent to an analysis backend (a
//! remote chat-completions API, a local Ollama model, or an offline mock)
//! that estimates topic weightage, writes a revision summary and suggests
//! likely question formats. Results are cached per document, backend and
//! parameters.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Upload   │──▶│ Extract  │──▶│    Chunk     │──▶│ Orchestrator │
//! │ bytes+tag │   │ PDF/DOCX │   │ para/sentence│   │ cache+fallbk │
//! └───────────┘   └──────────┘   └──────────────┘   └──────┬───────┘
//!                                                          │
//!                          ┌──────────────┬────────────────┤
//!                          ▼              ▼                ▼
//!                     ┌─────────┐   ┌──────────┐    ┌────────────┐
//!                     │ Remote  │   │  Local   │    │    Mock    │
//!                     │  API    │   │ (Ollama) │    │ (offline)  │
//!                     └─────────┘   └──────────┘    └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! studyctl init                          # create the SQLite cache
//! studyctl extract notes.pdf             # check extraction
//! studyctl analyze notes/ --backend local
//! studyctl backends                      # probe configured backends
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Pipeline error taxonomy |
//! | [`extract`] | PDF/DOCX/text extraction with PDF fallback |
//! | [`chunk`] | Boundary-aware text chunking |
//! | [`backend`] | Analysis backend trait, registry and adapters |
//! | [`insight`] | Defensive normalization of backend answers |
//! | [`cache`] | Result cache |
//! | [`store`] | Cache persistence (SQLite, in-memory) |
//! | [`orchestrator`] | Per-document and bulk pipelines |
//! | [`stats`] | Text complexity metrics |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`commands`] | CLI subcommands |

pub mod backend;
pub mod cache;
pub mod chunk;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod insight;
pub mod migrate;
pub mod models;
pub mod orchestrator;
pub mod stats;
pub mod store;

pub use error::PipelineError;
pub use orchestrator::{BulkReport, CancelHandle, DocumentOutcome, Pipeline, Upload};
