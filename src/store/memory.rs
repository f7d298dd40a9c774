//! In-memory [`InsightStore`] for tests.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use super::{InsightStore, StoredDocument};
use crate::error::Result;
use crate::models::{CacheEntry, CacheKey, Document, ExtractedText};

#[derive(Default)]
pub struct MemoryInsightStore {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    documents: RwLock<HashMap<String, StoredDocument>>,
}

impl MemoryInsightStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl InsightStore for MemoryInsightStore {
    async fn load(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    async fn save(&self, key: &CacheKey, entry: &CacheEntry) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.clone(), entry.clone());
        Ok(())
    }

    async fn remove_fingerprint(&self, fingerprint: &str) -> Result<u64> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|k, _| k.fingerprint != fingerprint);
        Ok((before - entries.len()) as u64)
    }

    async fn save_document(&self, document: &Document, extraction: &ExtractedText) -> Result<()> {
        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        documents.insert(
            document.fingerprint.clone(),
            StoredDocument {
                document: document.clone(),
                extraction: extraction.clone(),
            },
        );
        Ok(())
    }

    async fn load_document(&self, fingerprint: &str) -> Result<Option<StoredDocument>> {
        let documents = self.documents.read().unwrap_or_else(PoisonError::into_inner);
        Ok(documents.get(fingerprint).cloned())
    }

    async fn latest_document_named(&self, filename: &str) -> Result<Option<StoredDocument>> {
        let documents = self.documents.read().unwrap_or_else(PoisonError::into_inner);
        Ok(documents
            .values()
            .filter(|d| d.document.filename == filename)
            .max_by_key(|d| d.document.uploaded_at)
            .cloned())
    }
}
