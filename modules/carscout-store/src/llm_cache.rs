use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Cached LLM responses keyed by `(input_hash, prompt_version)`. A prompt
/// revision invalidates the cache without deleting anything.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LlmCache {
    pub id: Uuid,
    pub input_hash: String,
    pub prompt_version: String,
    pub output: serde_json::Value,
    pub hit_count: i32,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl LlmCache {
    /// Look up a cached response. Returns None if missing or expired.
    pub async fn get(input_hash: &str, prompt_version: &str, pool: &PgPool) -> Result<Option<LlmCache>> {
        let row = sqlx::query_as::<_, LlmCache>(
            "SELECT id, input_hash, prompt_version, output, hit_count, created_at, expires_at
             FROM llm_cache
             WHERE input_hash = $1 AND prompt_version = $2
               AND (expires_at IS NULL OR expires_at > now())",
        )
        .bind(input_hash)
        .bind(prompt_version)
        .fetch_optional(pool)
        .await?;

        if let Some(ref row) = row {
            let id = row.id;
            let pool = pool.clone();
            tokio::spawn(async move {
                let _ = sqlx::query("UPDATE llm_cache SET hit_count = hit_count + 1 WHERE id = $1")
                    .bind(id)
                    .execute(&pool)
                    .await;
            });
        }

        Ok(row)
    }

    /// Store a response (upsert).
    pub async fn set(
        input_hash: &str,
        prompt_version: &str,
        output: &serde_json::Value,
        expires_at: Option<DateTime<Utc>>,
        pool: &PgPool,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO llm_cache (input_hash, prompt_version, output, expires_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (input_hash, prompt_version)
             DO UPDATE SET output = EXCLUDED.output,
                           expires_at = EXCLUDED.expires_at,
                           hit_count = 0,
                           created_at = now()",
        )
        .bind(input_hash)
        .bind(prompt_version)
        .bind(output)
        .bind(expires_at)
        .execute(pool)
        .await?;
        Ok(())
    }
}
