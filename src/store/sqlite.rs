//! SQLite-backed [`InsightStore`].
//!
//! Records are stored as JSON in `insight_cache`, keyed by
//! `(fingerprint, backend, params_digest)`. Timestamps are Unix
//! milliseconds.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{InsightStore, StoredDocument};
use crate::db;
use crate::error::{PipelineError, Result};
use crate::migrate;
use crate::models::{CacheEntry, CacheKey, Document, ExtractedText, InsightRecord};

pub struct SqliteInsightStore {
    pool: SqlitePool,
}

impl SqliteInsightStore {
    /// Wrap an existing pool. The schema must already exist.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to `path` and create the schema if needed.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| PipelineError::Store(format!("invalid timestamp {}", ms)))
}

#[async_trait]
impl InsightStore for SqliteInsightStore {
    async fn load(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let row = sqlx::query(
            "SELECT record_json, stored_at FROM insight_cache WHERE fingerprint = ? AND backend = ? AND params_digest = ?",
        )
        .bind(&key.fingerprint)
        .bind(&key.backend)
        .bind(&key.params_digest)
        .fetch_optional(&self.pool)
        .await?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        let record_json: String = row.get("record_json");
        let stored_at: i64 = row.get("stored_at");
        let record: InsightRecord = serde_json::from_str(&record_json)?;
        Ok(Some(CacheEntry {
            record,
            stored_at: from_millis(stored_at)?,
        }))
    }

    async fn save(&self, key: &CacheKey, entry: &CacheEntry) -> Result<()> {
        let record_json = serde_json::to_string(&entry.record)?;
        sqlx::query(
            r#"
            INSERT INTO insight_cache (fingerprint, backend, params_digest, record_json, stored_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(fingerprint, backend, params_digest) DO UPDATE SET
                record_json = excluded.record_json,
                stored_at = excluded.stored_at
            "#,
        )
        .bind(&key.fingerprint)
        .bind(&key.backend)
        .bind(&key.params_digest)
        .bind(&record_json)
        .bind(entry.stored_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_fingerprint(&self, fingerprint: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM insight_cache WHERE fingerprint = ?")
            .bind(fingerprint)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn save_document(&self, document: &Document, extraction: &ExtractedText) -> Result<()> {
        let extraction_json = serde_json::to_string(extraction)?;
        sqlx::query(
            r#"
            INSERT INTO documents (fingerprint, filename, declared_type, byte_len, uploaded_at, extraction_json)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(fingerprint) DO UPDATE SET
                filename = excluded.filename,
                declared_type = excluded.declared_type,
                uploaded_at = excluded.uploaded_at,
                extraction_json = excluded.extraction_json
            "#,
        )
        .bind(&document.fingerprint)
        .bind(&document.filename)
        .bind(&document.declared_type)
        .bind(document.byte_len as i64)
        .bind(document.uploaded_at.timestamp_millis())
        .bind(&extraction_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_document(&self, fingerprint: &str) -> Result<Option<StoredDocument>> {
        let row = sqlx::query(&format!("{} WHERE fingerprint = ?", SELECT_DOCUMENT))
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| document_from_row(&row)).transpose()
    }

    async fn latest_document_named(&self, filename: &str) -> Result<Option<StoredDocument>> {
        let row = sqlx::query(&format!(
            "{} WHERE filename = ? ORDER BY uploaded_at DESC LIMIT 1",
            SELECT_DOCUMENT
        ))
        .bind(filename)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| document_from_row(&row)).transpose()
    }
}

const SELECT_DOCUMENT: &str = "SELECT fingerprint, filename, declared_type, byte_len, uploaded_at, extraction_json FROM documents";

fn document_from_row(row: &SqliteRow) -> Result<StoredDocument> {
    let byte_len: i64 = row.get("byte_len");
    let uploaded_at: i64 = row.get("uploaded_at");
    let extraction_json: String = row.get("extraction_json");

    Ok(StoredDocument {
        document: Document {
            fingerprint: row.get("fingerprint"),
            filename: row.get("filename"),
            declared_type: row.get("declared_type"),
            byte_len: byte_len.max(0) as u64,
            uploaded_at: from_millis(uploaded_at)?,
        },
        extraction: serde_json::from_str(&extraction_json)?,
    })
}
