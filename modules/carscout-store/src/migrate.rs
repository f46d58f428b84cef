use anyhow::Result;
use sqlx::PgPool;

/// Run the embedded SQL migrations. Idempotent; called at every boot.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;

    #[cfg(feature = "embedding")]
    embedding_ddl(pool).await?;

    Ok(())
}

/// Extra DDL for the optional embedding dedupe path. Lives outside the
/// static migration set because the `vector` extension is not present on
/// every deployment.
#[cfg(feature = "embedding")]
async fn embedding_ddl(pool: &PgPool) -> Result<()> {
    sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
        .execute(pool)
        .await?;
    sqlx::query("ALTER TABLE dedupe_signatures ADD COLUMN IF NOT EXISTS embedding vector(384)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS dedupe_signatures_embedding_idx
         ON dedupe_signatures USING ivfflat (embedding vector_cosine_ops)",
    )
    .execute(pool)
    .await?;
    Ok(())
}
