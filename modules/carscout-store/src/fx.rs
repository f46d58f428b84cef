use anyhow::Result;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::PgPool;

/// Daily-versioned FX rates to BGN.
pub struct FxRates;

impl FxRates {
    /// The rate for `currency` on `day`, falling back to the most recent
    /// earlier day so a missed refresh doesn't stall normalization.
    pub async fn rate_on(day: NaiveDate, currency: &str, pool: &PgPool) -> Result<Option<Decimal>> {
        let row = sqlx::query_as::<_, (Decimal,)>(
            "SELECT rate_to_bgn FROM fx_rates
             WHERE currency = $1 AND day <= $2
             ORDER BY day DESC
             LIMIT 1",
        )
        .bind(currency.to_uppercase())
        .bind(day)
        .fetch_optional(pool)
        .await?;
        Ok(row.map(|r| r.0))
    }

    pub async fn upsert(day: NaiveDate, currency: &str, rate_to_bgn: Decimal, pool: &PgPool) -> Result<()> {
        sqlx::query(
            "INSERT INTO fx_rates (day, currency, rate_to_bgn) VALUES ($1, $2, $3)
             ON CONFLICT (day, currency) DO UPDATE SET rate_to_bgn = EXCLUDED.rate_to_bgn",
        )
        .bind(day)
        .bind(currency.to_uppercase())
        .bind(rate_to_bgn)
        .execute(pool)
        .await?;
        Ok(())
    }
}
