use anyhow::Result;
use sqlx::SqlitePool;

/// Create the cache schema. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // One row per (fingerprint, backend, params) analysis
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS insight_cache (
            fingerprint TEXT NOT NULL,
            backend TEXT NOT NULL,
            params_digest TEXT NOT NULL,
            record_json TEXT NOT NULL,
            stored_at INTEGER NOT NULL,
            PRIMARY KEY (fingerprint, backend, params_digest)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_insight_cache_fingerprint ON insight_cache(fingerprint)",
    )
    .execute(pool)
    .await?;

    // Last upload seen for each fingerprint, with its extraction outcome
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            fingerprint TEXT PRIMARY KEY,
            filename TEXT NOT NULL,
            declared_type TEXT NOT NULL,
            byte_len INTEGER NOT NULL,
            uploaded_at INTEGER NOT NULL,
            extraction_json TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_filename ON documents(filename)")
        .execute(pool)
        .await?;

    Ok(())
}
