use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Alert {
    pub id: Uuid,
    pub user_id: Uuid,
    pub dsl_query: String,
    pub filters: serde_json::Value,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AlertMatch {
    pub id: Uuid,
    pub alert_id: Uuid,
    pub listing_id: Uuid,
    pub matched_at: DateTime<Utc>,
    pub deliver_at: DateTime<Utc>,
    pub notified_at: Option<DateTime<Utc>>,
    pub status: String,
}

impl Alert {
    pub async fn find_by_id(id: Uuid, pool: &PgPool) -> Result<Alert> {
        let alert = sqlx::query_as::<_, Alert>(
            "SELECT id, user_id, dsl_query, filters, active, created_at
             FROM alerts WHERE id = $1",
        )
        .bind(id)
        .fetch_one(pool)
        .await?;
        Ok(alert)
    }

    pub async fn find_active(pool: &PgPool) -> Result<Vec<Alert>> {
        let alerts = sqlx::query_as::<_, Alert>(
            "SELECT a.id, a.user_id, a.dsl_query, a.filters, a.active, a.created_at
             FROM alerts a
             JOIN users u ON u.id = a.user_id
             WHERE a.active AND u.status = 'active'
             ORDER BY a.created_at",
        )
        .fetch_all(pool)
        .await?;
        Ok(alerts)
    }

    /// Store both forms: the user's raw query and the normalized filters.
    pub async fn create(
        user_id: Uuid,
        dsl_query: &str,
        filters: &serde_json::Value,
        pool: &PgPool,
    ) -> Result<Uuid> {
        let row = sqlx::query_as::<_, (Uuid,)>(
            "INSERT INTO alerts (user_id, dsl_query, filters) VALUES ($1, $2, $3)
             RETURNING id",
        )
        .bind(user_id)
        .bind(dsl_query)
        .bind(filters)
        .fetch_one(pool)
        .await?;
        Ok(row.0)
    }
}

impl AlertMatch {
    /// Create a match scheduled for `deliver_at`. The unique
    /// `(alert_id, listing_id)` constraint collapses concurrent duplicates;
    /// returns None when the pair already matched.
    pub async fn create(
        tx: &mut Transaction<'_, Postgres>,
        alert_id: Uuid,
        listing_id: Uuid,
        deliver_at: DateTime<Utc>,
    ) -> Result<Option<Uuid>> {
        let row = sqlx::query_as::<_, (Uuid,)>(
            "INSERT INTO alert_matches (alert_id, listing_id, deliver_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (alert_id, listing_id) DO NOTHING
             RETURNING id",
        )
        .bind(alert_id)
        .bind(listing_id)
        .bind(deliver_at)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row.map(|r| r.0))
    }

    pub async fn find(alert_id: Uuid, listing_id: Uuid, pool: &PgPool) -> Result<Option<AlertMatch>> {
        let row = sqlx::query_as::<_, AlertMatch>(
            "SELECT id, alert_id, listing_id, matched_at, deliver_at, notified_at, status
             FROM alert_matches WHERE alert_id = $1 AND listing_id = $2",
        )
        .bind(alert_id)
        .bind(listing_id)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    /// Settle the match terminally: notified / skipped / failed. The send
    /// acknowledgment and the status land in one transaction.
    pub async fn settle(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        status: &str,
        notified: bool,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE alert_matches
             SET status = $2, notified_at = CASE WHEN $3 THEN now() ELSE notified_at END
             WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .bind(notified)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn find_pending_for_listing(listing_id: Uuid, pool: &PgPool) -> Result<Vec<AlertMatch>> {
        let rows = sqlx::query_as::<_, AlertMatch>(
            "SELECT id, alert_id, listing_id, matched_at, deliver_at, notified_at, status
             FROM alert_matches
             WHERE listing_id = $1 AND status = 'pending'
             ORDER BY deliver_at",
        )
        .bind(listing_id)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }
}
