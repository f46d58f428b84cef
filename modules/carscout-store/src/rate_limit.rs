//! Shared rate-limit state: token buckets and daily counters, both living
//! in Postgres with atomic single-statement updates so workers never hold
//! locks across await points.

use anyhow::Result;
use chrono::NaiveDate;
use sqlx::PgPool;

/// Persisted token bucket keyed by `(entity, window)` strings, e.g.
/// `channel:@carscout` or `notify:telegram`.
pub struct TokenBucket;

impl TokenBucket {
    /// Refill by elapsed time and try to take one token, atomically.
    /// Returns true when a token was consumed.
    pub async fn try_take(key: &str, capacity: f64, refill_per_s: f64, pool: &PgPool) -> Result<bool> {
        let row = sqlx::query_as::<_, (bool,)>(
            "INSERT INTO token_buckets (key, tokens, capacity, refill_per_s, updated_at)
             VALUES ($1, $2 - 1, $2, $3, now())
             ON CONFLICT (key) DO UPDATE SET
                 tokens = GREATEST(0, LEAST(
                     token_buckets.capacity,
                     token_buckets.tokens
                         + EXTRACT(EPOCH FROM (now() - token_buckets.updated_at)) * token_buckets.refill_per_s
                 ) - 1),
                 updated_at = now()
             WHERE LEAST(
                 token_buckets.capacity,
                 token_buckets.tokens
                     + EXTRACT(EPOCH FROM (now() - token_buckets.updated_at)) * token_buckets.refill_per_s
             ) >= 1
             RETURNING true",
        )
        .bind(key)
        .bind(capacity)
        .bind(refill_per_s)
        .fetch_optional(pool)
        .await?
        .is_some();
        Ok(row)
    }

    /// Drain the bucket for `retry_after` seconds — an external service told
    /// us to back off, so local quota must reflect that.
    pub async fn drain_for(key: &str, seconds: f64, pool: &PgPool) -> Result<()> {
        sqlx::query(
            "UPDATE token_buckets
             SET tokens = 0, updated_at = now() + make_interval(secs => $2)
             WHERE key = $1",
        )
        .bind(key)
        .bind(seconds)
        .execute(pool)
        .await?;
        Ok(())
    }
}

/// Per-key, per-UTC-day counters for plan caps.
pub struct DailyCounter;

impl DailyCounter {
    /// Increment and return the new count for today (UTC).
    pub async fn increment(key: &str, day: NaiveDate, pool: &PgPool) -> Result<i32> {
        let row = sqlx::query_as::<_, (i32,)>(
            "INSERT INTO daily_counters (key, day, count) VALUES ($1, $2, 1)
             ON CONFLICT (key, day) DO UPDATE SET count = daily_counters.count + 1
             RETURNING count",
        )
        .bind(key)
        .bind(day)
        .fetch_one(pool)
        .await?;
        Ok(row.0)
    }

    pub async fn get(key: &str, day: NaiveDate, pool: &PgPool) -> Result<i32> {
        let row = sqlx::query_as::<_, (Option<i32>,)>(
            "SELECT count FROM daily_counters WHERE key = $1 AND day = $2",
        )
        .bind(key)
        .bind(day)
        .fetch_optional(pool)
        .await?
        .and_then(|r| r.0);
        Ok(row.unwrap_or(0))
    }

    /// Undo one increment — used when a capped send ultimately failed.
    pub async fn decrement(key: &str, day: NaiveDate, pool: &PgPool) -> Result<()> {
        sqlx::query(
            "UPDATE daily_counters SET count = GREATEST(0, count - 1)
             WHERE key = $1 AND day = $2",
        )
        .bind(key)
        .bind(day)
        .execute(pool)
        .await?;
        Ok(())
    }
}
