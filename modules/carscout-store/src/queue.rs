//! Durable typed job queue backed by Postgres.
//!
//! A task is one listing id plus a stage name. Claiming uses
//! `FOR UPDATE SKIP LOCKED` so parallel workers never double-process; a
//! lease on `locked_at` releases work from crashed workers. Enqueues are
//! deduplicated on `(stage, listing_id, idem_key)` and can join the caller's
//! transaction, which is what makes stage hand-off a transactional outbox.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rand::Rng;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::warn;
use uuid::Uuid;

use carscout_common::Stage;

/// How long a claimed job stays invisible before the lease expires.
const LEASE: Duration = Duration::from_secs(120);

/// Backoff base and ceiling for retries.
const BACKOFF_BASE_SECS: f64 = 2.0;
const BACKOFF_CAP_SECS: f64 = 600.0;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Job {
    pub id: i64,
    pub stage: String,
    pub listing_id: Uuid,
    pub idem_key: String,
    pub run_after: DateTime<Utc>,
    pub attempts: i32,
    pub max_attempts: i32,
}

impl Job {
    pub fn stage(&self) -> Option<Stage> {
        Stage::parse_str(&self.stage)
    }
}

#[derive(Clone)]
pub struct Queue {
    pool: PgPool,
}

impl Queue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Enqueue outside any transaction. Returns false when an identical
    /// message already exists.
    pub async fn enqueue(&self, stage: Stage, listing_id: Uuid, idem_key: &str) -> Result<bool> {
        let res = sqlx::query(
            "INSERT INTO jobs (stage, listing_id, idem_key)
             VALUES ($1, $2, $3)
             ON CONFLICT (stage, listing_id, idem_key) DO NOTHING",
        )
        .bind(stage.as_str())
        .bind(listing_id)
        .bind(idem_key)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    /// Enqueue as part of the caller's transaction — the outbox pattern.
    /// The message becomes visible only when the stage's own writes commit.
    pub async fn enqueue_in(
        tx: &mut Transaction<'_, Postgres>,
        stage: Stage,
        listing_id: Uuid,
        idem_key: &str,
        delay: Duration,
    ) -> Result<bool> {
        let res = sqlx::query(
            "INSERT INTO jobs (stage, listing_id, idem_key, run_after)
             VALUES ($1, $2, $3, now() + make_interval(secs => $4))
             ON CONFLICT (stage, listing_id, idem_key) DO NOTHING",
        )
        .bind(stage.as_str())
        .bind(listing_id)
        .bind(idem_key)
        .bind(delay.as_secs_f64())
        .execute(&mut **tx)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    /// Claim up to `limit` ready jobs for `stage`. Jobs whose lease expired
    /// are reclaimed; their previous worker crashed mid-flight.
    pub async fn claim(&self, worker_id: &str, stage: Stage, limit: i64) -> Result<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(
            "UPDATE jobs
             SET locked_by = $1, locked_at = now()
             WHERE id IN (
                 SELECT id FROM jobs
                 WHERE stage = $2
                   AND run_after <= now()
                   AND (locked_at IS NULL OR locked_at < now() - make_interval(secs => $3))
                 ORDER BY run_after
                 LIMIT $4
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING id, stage, listing_id, idem_key, run_after, attempts, max_attempts",
        )
        .bind(worker_id)
        .bind(stage.as_str())
        .bind(LEASE.as_secs_f64())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    /// The job succeeded; remove it.
    pub async fn complete(&self, job: &Job) -> Result<()> {
        sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(job.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Transient failure: release with exponential backoff and jitter, or
    /// park in the dead-letter table once attempts run out.
    pub async fn retry(&self, job: &Job, error: &str) -> Result<()> {
        let attempts = job.attempts + 1;
        if attempts >= job.max_attempts {
            return self.dead_letter(job, error).await;
        }
        let delay = backoff_delay(attempts);
        sqlx::query(
            "UPDATE jobs
             SET attempts = $2, run_after = now() + make_interval(secs => $3),
                 locked_by = NULL, locked_at = NULL
             WHERE id = $1",
        )
        .bind(job.id)
        .bind(attempts)
        .bind(delay.as_secs_f64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Requeue without consuming an attempt — for rate-limit waits, plan
    /// delays, and deliberate deferrals.
    pub async fn defer(&self, job: &Job, delay: Duration) -> Result<()> {
        sqlx::query(
            "UPDATE jobs
             SET run_after = now() + make_interval(secs => $2),
                 locked_by = NULL, locked_at = NULL
             WHERE id = $1",
        )
        .bind(job.id)
        .bind(delay.as_secs_f64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Park the job permanently. Surfaces as an operational alert.
    pub async fn dead_letter(&self, job: &Job, error: &str) -> Result<()> {
        warn!(
            stage = %job.stage,
            listing_id = %job.listing_id,
            attempts = job.attempts,
            error,
            "Job quarantined to dead letters"
        );
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO dead_letters (stage, listing_id, attempts, last_error)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(&job.stage)
        .bind(job.listing_id)
        .bind(job.attempts)
        .bind(error)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(job.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Ready-message depth per stage, for backpressure decisions.
    pub async fn depth(&self, stage: Stage) -> Result<i64> {
        let row = sqlx::query_as::<_, (i64,)>(
            "SELECT COUNT(*) FROM jobs WHERE stage = $1 AND run_after <= now()",
        )
        .bind(stage.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }
}

/// Exponential backoff with full jitter: `base * 2^attempts`, capped.
pub fn backoff_delay(attempts: i32) -> Duration {
    let exp = BACKOFF_BASE_SECS * 2f64.powi(attempts.min(16));
    let capped = exp.min(BACKOFF_CAP_SECS);
    let jittered = rand::thread_rng().gen_range(capped * 0.5..=capped);
    Duration::from_secs_f64(jittered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let d1 = backoff_delay(1);
        assert!(d1 >= Duration::from_secs(2), "attempt 1 at least base: {d1:?}");
        for attempts in 1..20 {
            let d = backoff_delay(attempts);
            assert!(d <= Duration::from_secs_f64(BACKOFF_CAP_SECS));
        }
    }

    #[test]
    fn jitter_stays_above_half() {
        for _ in 0..100 {
            let d = backoff_delay(10);
            assert!(d.as_secs_f64() >= BACKOFF_CAP_SECS * 0.5);
        }
    }
}
