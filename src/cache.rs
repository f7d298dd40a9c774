//! Result cache keyed by `(fingerprint, backend, params)`.
//!
//! A read-through, write-through layer: lookups consult the in-memory map,
//! then the optional [`InsightStore`]; writes go to both. Concurrent `put`s
//! for the same key are last-write-wins and never leave a torn entry, since
//! each entry is replaced whole under the map's write lock.
//!
//! The map lock is never held across an `.await`. Store failures degrade to
//! a cache miss (on read) or a memory-only write (on write) and are logged;
//! they never fail an analysis.
//!
//! With `stale_after` set, entries older than the window are treated as
//! misses and evicted from memory.
//!
//! The cache also remembers which fingerprint each filename last had, so a
//! re-upload of the same name with different content can invalidate the
//! entries of the superseded fingerprint.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::models::{CacheEntry, CacheKey, Document, ExtractedText, InsightRecord};
use crate::store::{InsightStore, StoredDocument};

pub struct ResultCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    // filename -> last fingerprint seen under it
    names: RwLock<HashMap<String, String>>,
    store: Option<Arc<dyn InsightStore>>,
    stale_after: Option<Duration>,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl ResultCache {
    /// Memory-only cache without expiry.
    pub fn in_memory() -> Self {
        Self::new(None, None)
    }

    pub fn new(store: Option<Arc<dyn InsightStore>>, stale_after: Option<Duration>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            names: RwLock::new(HashMap::new()),
            store,
            stale_after,
        }
    }

    pub async fn get(&self, key: &CacheKey) -> Option<InsightRecord> {
        let cached = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned();

        let entry = match cached {
            Some(entry) => entry,
            None => {
                let store = self.store.as_ref()?;
                match store.load(key).await {
                    Ok(Some(entry)) => {
                        self.entries
                            .write()
                            .unwrap_or_else(PoisonError::into_inner)
                            .entry(key.clone())
                            .or_insert_with(|| entry.clone());
                        entry
                    }
                    Ok(None) => return None,
                    Err(e) => {
                        warn!(key = %key, error = %e, "cache store read failed, treating as miss");
                        return None;
                    }
                }
            }
        };

        if entry.is_stale(self.stale_after, Utc::now()) {
            debug!(key = %key, stored_at = %entry.stored_at, "cache entry is stale");
            self.entries
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(key);
            return None;
        }
        Some(entry.record)
    }

    pub async fn put(&self, key: CacheKey, record: InsightRecord) {
        let entry = CacheEntry::new(record);
        if let Some(store) = &self.store {
            if let Err(e) = store.save(&key, &entry).await {
                warn!(key = %key, error = %e, "cache store write failed, keeping in memory only");
            }
        }
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, entry);
    }

    /// Drop every entry for a fingerprint. Returns how many were removed.
    pub async fn invalidate(&self, fingerprint: &str) -> u64 {
        let from_memory = {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            let before = entries.len();
            entries.retain(|k, _| k.fingerprint != fingerprint);
            (before - entries.len()) as u64
        };
        let from_store = match &self.store {
            Some(store) => match store.remove_fingerprint(fingerprint).await {
                Ok(n) => n,
                Err(e) => {
                    warn!(fingerprint, error = %e, "cache store invalidation failed");
                    0
                }
            },
            None => 0,
        };
        from_memory.max(from_store)
    }

    /// Fingerprint most recently recorded under `filename`, from memory or
    /// the store.
    pub async fn previous_fingerprint(&self, filename: &str) -> Option<String> {
        let known = self
            .names
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(filename)
            .cloned();
        if known.is_some() {
            return known;
        }
        let store = self.store.as_ref()?;
        match store.latest_document_named(filename).await {
            Ok(doc) => doc.map(|d| d.document.fingerprint),
            Err(e) => {
                warn!(filename, error = %e, "failed to look up previous upload");
                None
            }
        }
    }

    /// Remember an upload and its extraction outcome. The extraction is only
    /// kept when a store is configured.
    pub async fn record_document(&self, document: &Document, extraction: &ExtractedText) {
        self.names
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(document.filename.clone(), document.fingerprint.clone());
        if let Some(store) = &self.store {
            if let Err(e) = store.save_document(document, extraction).await {
                warn!(fingerprint = %document.fingerprint, error = %e, "failed to record document");
            }
        }
    }

    pub async fn document(&self, fingerprint: &str) -> Option<StoredDocument> {
        let store = self.store.as_ref()?;
        match store.load_document(fingerprint).await {
            Ok(doc) => doc,
            Err(e) => {
                warn!(fingerprint, error = %e, "failed to load document");
                None
            }
        }
    }

    /// Number of entries held in memory.
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
