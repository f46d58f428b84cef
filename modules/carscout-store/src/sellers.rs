use anyhow::Result;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Seller {
    pub id: Uuid,
    pub phone_hash: String,
    pub profile_url: Option<String>,
    pub contact_count: i32,
    pub blacklisted: bool,
}

impl Seller {
    /// Upsert by phone hash inside the normalize transaction; bumps the
    /// contact count on every sighting.
    pub async fn upsert_by_phone_hash(
        tx: &mut Transaction<'_, Postgres>,
        phone_hash: &str,
        profile_url: Option<&str>,
    ) -> Result<Uuid> {
        let row = sqlx::query_as::<_, (Uuid,)>(
            "INSERT INTO sellers (phone_hash, profile_url, contact_count)
             VALUES ($1, $2, 1)
             ON CONFLICT (phone_hash) DO UPDATE SET
                 contact_count = sellers.contact_count + 1,
                 profile_url = COALESCE(EXCLUDED.profile_url, sellers.profile_url)
             RETURNING id",
        )
        .bind(phone_hash)
        .bind(profile_url)
        .fetch_one(&mut **tx)
        .await?;
        Ok(row.0)
    }
}
