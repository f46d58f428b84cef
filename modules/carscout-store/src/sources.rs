use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Error ratio over the sliding outcome window that pauses a source.
const PAUSE_ERROR_RATIO: f64 = 0.3;
const OUTCOME_WINDOW: i64 = 50;
const PAUSE_MINUTES: i64 = 60;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Source {
    pub id: Uuid,
    pub name: String,
    pub base_url: String,
    pub enabled: bool,
    pub crawl_interval_s: i32,
    pub paused_until: Option<DateTime<Utc>>,
}

impl Source {
    pub async fn find_by_id(id: Uuid, pool: &PgPool) -> Result<Source> {
        let source = sqlx::query_as::<_, Source>(
            "SELECT id, name, base_url, enabled, crawl_interval_s, paused_until
             FROM sources WHERE id = $1",
        )
        .bind(id)
        .fetch_one(pool)
        .await?;
        Ok(source)
    }

    /// Sources the scheduler should consider this tick: enabled and not paused.
    pub async fn find_schedulable(pool: &PgPool) -> Result<Vec<Source>> {
        let sources = sqlx::query_as::<_, Source>(
            "SELECT id, name, base_url, enabled, crawl_interval_s, paused_until
             FROM sources
             WHERE enabled AND (paused_until IS NULL OR paused_until <= now())
             ORDER BY name",
        )
        .fetch_all(pool)
        .await?;
        Ok(sources)
    }

    pub async fn insert(name: &str, base_url: &str, crawl_interval_s: i32, pool: &PgPool) -> Result<Uuid> {
        let row = sqlx::query_as::<_, (Uuid,)>(
            "INSERT INTO sources (name, base_url, crawl_interval_s)
             VALUES ($1, $2, $3)
             ON CONFLICT (name) DO UPDATE SET base_url = EXCLUDED.base_url
             RETURNING id",
        )
        .bind(name)
        .bind(base_url)
        .bind(crawl_interval_s)
        .fetch_one(pool)
        .await?;
        Ok(row.0)
    }

    /// Claim a scheduler tick. Returns false when this `(source, bucket)`
    /// was already ticked — replays are no-ops.
    pub async fn claim_tick(source_id: Uuid, tick_bucket: i64, pool: &PgPool) -> Result<bool> {
        let res = sqlx::query(
            "INSERT INTO scrape_ticks (source_id, tick_bucket)
             VALUES ($1, $2)
             ON CONFLICT (source_id, tick_bucket) DO NOTHING",
        )
        .bind(source_id)
        .bind(tick_bucket)
        .execute(pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    /// Record one scrape outcome and pause the source when the sliding
    /// window's error ratio crosses the threshold.
    pub async fn note_outcome(source_id: Uuid, ok: bool, pool: &PgPool) -> Result<()> {
        sqlx::query("INSERT INTO scrape_outcomes (source_id, ok) VALUES ($1, $2)")
            .bind(source_id)
            .bind(ok)
            .execute(pool)
            .await?;

        let (total, errors) = sqlx::query_as::<_, (i64, i64)>(
            "SELECT COUNT(*), COUNT(*) FILTER (WHERE NOT ok)
             FROM (
                 SELECT ok FROM scrape_outcomes
                 WHERE source_id = $1
                 ORDER BY id DESC
                 LIMIT $2
             ) window",
        )
        .bind(source_id)
        .bind(OUTCOME_WINDOW)
        .fetch_one(pool)
        .await?;

        if total >= 10 && errors as f64 / total as f64 > PAUSE_ERROR_RATIO {
            tracing::warn!(source_id = %source_id, errors, total, "Pausing source: error ratio too high");
            sqlx::query(
                "UPDATE sources SET paused_until = now() + make_interval(mins => $2)
                 WHERE id = $1",
            )
            .bind(source_id)
            .bind(PAUSE_MINUTES as f64)
            .execute(pool)
            .await?;
        }
        Ok(())
    }
}
