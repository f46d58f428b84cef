use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

/// One broadcast per `(channel, listing)`; price changes edit the existing
/// message rather than creating a new row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChannelPost {
    pub listing_id: Uuid,
    pub channel: String,
    pub message_id: i64,
    pub posted_at: DateTime<Utc>,
    pub last_price_bgn: Decimal,
}

impl ChannelPost {
    pub async fn find(channel: &str, listing_id: Uuid, pool: &PgPool) -> Result<Option<ChannelPost>> {
        let row = sqlx::query_as::<_, ChannelPost>(
            "SELECT listing_id, channel, message_id, posted_at, last_price_bgn
             FROM channel_posts WHERE channel = $1 AND listing_id = $2",
        )
        .bind(channel)
        .bind(listing_id)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    pub async fn insert(
        tx: &mut Transaction<'_, Postgres>,
        channel: &str,
        listing_id: Uuid,
        message_id: i64,
        price_bgn: Decimal,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO channel_posts (listing_id, channel, message_id, last_price_bgn)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(listing_id)
        .bind(channel)
        .bind(message_id)
        .bind(price_bgn)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn update_price(
        tx: &mut Transaction<'_, Postgres>,
        channel: &str,
        listing_id: Uuid,
        price_bgn: Decimal,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE channel_posts SET last_price_bgn = $3
             WHERE channel = $1 AND listing_id = $2",
        )
        .bind(channel)
        .bind(listing_id)
        .bind(price_bgn)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Posts for this brand/model in the channel within the diversity
    /// window. Caps repetitive inventory.
    pub async fn count_recent_for_model(
        channel: &str,
        brand_id: &str,
        model_id: &str,
        window_hours: i64,
        pool: &PgPool,
    ) -> Result<i64> {
        let row = sqlx::query_as::<_, (i64,)>(
            "SELECT COUNT(*) FROM channel_posts cp
             JOIN listings l ON l.id = cp.listing_id
             WHERE cp.channel = $1 AND l.brand_id = $2 AND l.model_id = $3
               AND cp.posted_at > now() - make_interval(hours => $4)",
        )
        .bind(channel)
        .bind(brand_id)
        .bind(model_id)
        .bind(window_hours as f64)
        .fetch_one(pool)
        .await?;
        Ok(row.0)
    }

    /// Serialize create/edit per `(channel, listing)` for the lifetime of
    /// the caller's transaction.
    pub async fn lock_key(
        tx: &mut Transaction<'_, Postgres>,
        channel: &str,
        listing_id: Uuid,
    ) -> Result<()> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1 || ':' || $2::text))")
            .bind(channel)
            .bind(listing_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}
