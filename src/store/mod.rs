//! Persistence behind the result cache.
//!
//! The [`InsightStore`] trait is the optional durable layer of
//! [`ResultCache`](crate::cache::ResultCache). Two implementations ship:
//! [`SqliteInsightStore`] for the CLI and [`MemoryInsightStore`] for tests.
//!
//! Implementations must be `Send + Sync`; the cache calls them from
//! concurrent analysis workers.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::models::{CacheEntry, CacheKey, Document, ExtractedText};

pub use memory::MemoryInsightStore;
pub use sqlite::SqliteInsightStore;

/// A previously uploaded document and its extraction outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredDocument {
    pub document: Document,
    pub extraction: ExtractedText,
}

#[async_trait]
pub trait InsightStore: Send + Sync {
    async fn load(&self, key: &CacheKey) -> Result<Option<CacheEntry>>;

    /// Insert or replace the entry for `key`.
    async fn save(&self, key: &CacheKey, entry: &CacheEntry) -> Result<()>;

    /// Remove every entry for a fingerprint. Returns the number removed.
    async fn remove_fingerprint(&self, fingerprint: &str) -> Result<u64>;

    async fn save_document(&self, document: &Document, extraction: &ExtractedText) -> Result<()>;

    async fn load_document(&self, fingerprint: &str) -> Result<Option<StoredDocument>>;

    /// Most recently uploaded document with this filename, if any.
    async fn latest_document_named(&self, filename: &str) -> Result<Option<StoredDocument>>;
}
