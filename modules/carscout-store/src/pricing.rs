use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

/// One comparable-selection query, in the relaxation ladder's terms.
/// `None` means the dimension is not constrained at this step.
#[derive(Debug, Clone)]
pub struct CompFilter {
    pub listing_id: Uuid,
    pub brand_id: String,
    pub model_id: String,
    pub year: i32,
    pub year_window: i32,
    pub mileage_km: Option<i64>,
    pub mileage_pct: Option<f64>,
    pub fuel: Option<String>,
    pub gearbox: Option<String>,
    pub window_days: i64,
    pub limit: i64,
}

/// Fetch comparable prices: same brand/model, recent, active, non-duplicate,
/// excluding the target itself. Most recent first, capped.
pub async fn fetch_comparables(filter: &CompFilter, pool: &PgPool) -> Result<Vec<Decimal>> {
    let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
        "SELECT l.price_bgn FROM listings l
         JOIN listings_raw r ON r.id = l.raw_id
         WHERE l.price_bgn IS NOT NULL
           AND l.is_normalized AND NOT l.is_duplicate AND r.is_active
           AND l.id <> ",
    );
    qb.push_bind(filter.listing_id);
    qb.push(" AND l.brand_id = ").push_bind(&filter.brand_id);
    qb.push(" AND l.model_id = ").push_bind(&filter.model_id);
    qb.push(" AND l.year BETWEEN ")
        .push_bind(filter.year - filter.year_window)
        .push(" AND ")
        .push_bind(filter.year + filter.year_window);

    if let (Some(km), Some(pct)) = (filter.mileage_km, filter.mileage_pct) {
        let lo = (km as f64 * (1.0 - pct)) as i64;
        let hi = (km as f64 * (1.0 + pct)) as i64;
        qb.push(" AND l.mileage_km BETWEEN ")
            .push_bind(lo)
            .push(" AND ")
            .push_bind(hi);
    }
    if let Some(fuel) = &filter.fuel {
        qb.push(" AND l.fuel = ").push_bind(fuel);
    }
    if let Some(gearbox) = &filter.gearbox {
        qb.push(" AND l.gearbox = ").push_bind(gearbox);
    }
    qb.push(" AND r.first_seen > now() - make_interval(days => ")
        .push_bind(filter.window_days as f64)
        .push(")");
    qb.push(" ORDER BY r.first_seen DESC LIMIT ").push_bind(filter.limit);

    let rows: Vec<(Decimal,)> = qb.build_query_as().fetch_all(pool).await?;
    Ok(rows.into_iter().map(|r| r.0).collect())
}

/// Cached comparable statistics for one listing.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CompCache {
    pub listing_id: Uuid,
    pub p10: Option<Decimal>,
    pub p25: Option<Decimal>,
    pub p50: Option<Decimal>,
    pub p75: Option<Decimal>,
    pub p90: Option<Decimal>,
    pub mean: Option<Decimal>,
    pub sd: Option<f64>,
    pub predicted_price: Option<Decimal>,
    pub discount_pct: Option<f64>,
    pub sample_size: i32,
    pub confidence: f64,
    pub relaxation_step: i32,
    pub computed_at: DateTime<Utc>,
    pub model_version: String,
}

impl CompCache {
    pub async fn find(listing_id: Uuid, pool: &PgPool) -> Result<Option<CompCache>> {
        let row = sqlx::query_as::<_, CompCache>(
            "SELECT listing_id, p10, p25, p50, p75, p90, mean, sd, predicted_price,
                    discount_pct, sample_size, confidence, relaxation_step, computed_at, model_version
             FROM comp_cache WHERE listing_id = $1",
        )
        .bind(listing_id)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    pub async fn upsert(&self, tx: &mut Transaction<'_, Postgres>) -> Result<()> {
        sqlx::query(
            "INSERT INTO comp_cache
                 (listing_id, p10, p25, p50, p75, p90, mean, sd, predicted_price,
                  discount_pct, sample_size, confidence, relaxation_step, computed_at, model_version)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, now(), $14)
             ON CONFLICT (listing_id) DO UPDATE SET
                 p10 = EXCLUDED.p10, p25 = EXCLUDED.p25, p50 = EXCLUDED.p50,
                 p75 = EXCLUDED.p75, p90 = EXCLUDED.p90, mean = EXCLUDED.mean,
                 sd = EXCLUDED.sd, predicted_price = EXCLUDED.predicted_price,
                 discount_pct = EXCLUDED.discount_pct, sample_size = EXCLUDED.sample_size,
                 confidence = EXCLUDED.confidence, relaxation_step = EXCLUDED.relaxation_step,
                 computed_at = now(), model_version = EXCLUDED.model_version",
        )
        .bind(self.listing_id)
        .bind(self.p10)
        .bind(self.p25)
        .bind(self.p50)
        .bind(self.p75)
        .bind(self.p90)
        .bind(self.mean)
        .bind(self.sd)
        .bind(self.predicted_price)
        .bind(self.discount_pct)
        .bind(self.sample_size)
        .bind(self.confidence)
        .bind(self.relaxation_step)
        .bind(&self.model_version)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

/// Append-only price trail. A row is added only when the price moved.
pub struct PriceHistory;

impl PriceHistory {
    /// Append if `price_bgn` differs from the most recent entry.
    /// Returns true when a row was written.
    pub async fn append_if_changed(
        tx: &mut Transaction<'_, Postgres>,
        listing_id: Uuid,
        price_bgn: Decimal,
    ) -> Result<bool> {
        let last = sqlx::query_as::<_, (Decimal,)>(
            "SELECT price_bgn FROM price_history
             WHERE listing_id = $1 ORDER BY seen_at DESC, id DESC LIMIT 1",
        )
        .bind(listing_id)
        .fetch_optional(&mut **tx)
        .await?;

        if last.map(|r| r.0) == Some(price_bgn) {
            return Ok(false);
        }
        sqlx::query("INSERT INTO price_history (listing_id, price_bgn) VALUES ($1, $2)")
            .bind(listing_id)
            .bind(price_bgn)
            .execute(&mut **tx)
            .await?;
        Ok(true)
    }
}
