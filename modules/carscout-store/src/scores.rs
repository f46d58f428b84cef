use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Score {
    pub listing_id: Uuid,
    pub score: f64,
    pub price_score: f64,
    pub risk_penalty: f64,
    pub freshness: f64,
    pub liquidity: f64,
    pub reasons: serde_json::Value,
    pub state: String,
    pub scored_at: DateTime<Utc>,
}

impl Score {
    pub async fn find(listing_id: Uuid, pool: &PgPool) -> Result<Option<Score>> {
        let row = sqlx::query_as::<_, Score>(
            "SELECT listing_id, score, price_score, risk_penalty, freshness, liquidity,
                    reasons, state, scored_at
             FROM scores WHERE listing_id = $1",
        )
        .bind(listing_id)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    pub async fn upsert(&self, tx: &mut Transaction<'_, Postgres>) -> Result<()> {
        sqlx::query(
            "INSERT INTO scores
                 (listing_id, score, price_score, risk_penalty, freshness, liquidity,
                  reasons, state, scored_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now())
             ON CONFLICT (listing_id) DO UPDATE SET
                 score = EXCLUDED.score, price_score = EXCLUDED.price_score,
                 risk_penalty = EXCLUDED.risk_penalty, freshness = EXCLUDED.freshness,
                 liquidity = EXCLUDED.liquidity, reasons = EXCLUDED.reasons,
                 state = EXCLUDED.state, scored_at = now()",
        )
        .bind(self.listing_id)
        .bind(self.score)
        .bind(self.price_score)
        .bind(self.risk_penalty)
        .bind(self.freshness)
        .bind(self.liquidity)
        .bind(&self.reasons)
        .bind(&self.state)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}
