use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

/// Consecutive parse failures before a raw listing is deactivated.
const MAX_PARSE_ERRORS: i32 = 3;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RawListing {
    pub id: Uuid,
    pub source_id: Uuid,
    pub site_ad_id: String,
    pub url: String,
    pub raw_blob_key: Option<String>,
    pub content_hash: Option<String>,
    pub http_status: Option<i32>,
    pub parse_errors: i32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub is_active: bool,
    pub version: i32,
}

/// Result of recording one scrape observation.
#[derive(Debug, Clone, Copy)]
pub struct Observation {
    pub raw_id: Uuid,
    pub version: i32,
    /// True when the stored content hash changed (or this is the first
    /// observation) — only then is a new parse warranted.
    pub content_changed: bool,
}

impl RawListing {
    pub async fn find_by_id(id: Uuid, pool: &PgPool) -> Result<RawListing> {
        let raw = sqlx::query_as::<_, RawListing>(
            "SELECT id, source_id, site_ad_id, url, raw_blob_key, content_hash, http_status,
                    parse_errors, first_seen, last_seen, is_active, version
             FROM listings_raw WHERE id = $1",
        )
        .bind(id)
        .fetch_one(pool)
        .await?;
        Ok(raw)
    }

    /// Upsert one observed record. First observation sets `first_seen`;
    /// re-observation bumps `last_seen`, and a changed content hash swaps
    /// the blob key and increments `version`.
    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_observation(
        source_id: Uuid,
        site_ad_id: &str,
        url: &str,
        raw_blob_key: &str,
        content_hash: &str,
        http_status: i32,
        etag: Option<&str>,
        last_modified: Option<&str>,
        pool: &PgPool,
    ) -> Result<Observation> {
        let mut tx = pool.begin().await?;

        let existing = sqlx::query_as::<_, (Uuid, Option<String>, i32)>(
            "SELECT id, content_hash, version FROM listings_raw
             WHERE source_id = $1 AND site_ad_id = $2
             FOR UPDATE",
        )
        .bind(source_id)
        .bind(site_ad_id)
        .fetch_optional(&mut *tx)
        .await?;

        let observation = match existing {
            None => {
                let row = sqlx::query_as::<_, (Uuid,)>(
                    "INSERT INTO listings_raw
                         (source_id, site_ad_id, url, raw_blob_key, content_hash, http_status,
                          etag, last_modified)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                     RETURNING id",
                )
                .bind(source_id)
                .bind(site_ad_id)
                .bind(url)
                .bind(raw_blob_key)
                .bind(content_hash)
                .bind(http_status)
                .bind(etag)
                .bind(last_modified)
                .fetch_one(&mut *tx)
                .await?;
                Observation { raw_id: row.0, version: 1, content_changed: true }
            }
            Some((id, old_hash, version)) => {
                let changed = old_hash.as_deref() != Some(content_hash);
                if changed {
                    sqlx::query(
                        "UPDATE listings_raw SET
                             last_seen = now(), is_active = true, url = $2, http_status = $3,
                             raw_blob_key = $4, content_hash = $5, etag = $6, last_modified = $7,
                             version = version + 1
                         WHERE id = $1",
                    )
                    .bind(id)
                    .bind(url)
                    .bind(http_status)
                    .bind(raw_blob_key)
                    .bind(content_hash)
                    .bind(etag)
                    .bind(last_modified)
                    .execute(&mut *tx)
                    .await?;
                } else {
                    sqlx::query(
                        "UPDATE listings_raw SET last_seen = now(), is_active = true, http_status = $2
                         WHERE id = $1",
                    )
                    .bind(id)
                    .bind(http_status)
                    .execute(&mut *tx)
                    .await?;
                }
                Observation {
                    raw_id: id,
                    version: if changed { version + 1 } else { version },
                    content_changed: changed,
                }
            }
        };

        tx.commit().await?;
        Ok(observation)
    }

    /// Record a parse failure; deactivate after too many in a row.
    /// Returns true when the listing was deactivated.
    pub async fn record_parse_error(id: Uuid, pool: &PgPool) -> Result<bool> {
        let row = sqlx::query_as::<_, (i32,)>(
            "UPDATE listings_raw SET parse_errors = parse_errors + 1 WHERE id = $1
             RETURNING parse_errors",
        )
        .bind(id)
        .fetch_one(pool)
        .await?;

        if row.0 >= MAX_PARSE_ERRORS {
            sqlx::query("UPDATE listings_raw SET is_active = false WHERE id = $1")
                .bind(id)
                .execute(pool)
                .await?;
            return Ok(true);
        }
        Ok(false)
    }

    pub async fn clear_parse_errors(id: Uuid, pool: &PgPool) -> Result<()> {
        sqlx::query("UPDATE listings_raw SET parse_errors = 0 WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Mark listings unseen for `days` as inactive. Run by the scheduler.
    pub async fn deactivate_stale(days: i64, pool: &PgPool) -> Result<u64> {
        let res = sqlx::query(
            "UPDATE listings_raw SET is_active = false
             WHERE is_active AND last_seen < now() - make_interval(days => $1)",
        )
        .bind(days as f64)
        .execute(pool)
        .await?;
        Ok(res.rows_affected())
    }
}

/// A parsed (and later normalized) listing. One-to-one with `listings_raw`
/// per parse generation; `version` mirrors the raw row's version.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Listing {
    pub id: Uuid,
    pub raw_id: Uuid,
    pub brand_raw: Option<String>,
    pub model_raw: Option<String>,
    pub fuel_raw: Option<String>,
    pub gearbox_raw: Option<String>,
    pub body_raw: Option<String>,
    pub brand_id: Option<String>,
    pub model_id: Option<String>,
    pub year: Option<i32>,
    pub mileage_km: Option<i64>,
    pub fuel: Option<String>,
    pub gearbox: Option<String>,
    pub body: Option<String>,
    pub power_hp: Option<i32>,
    pub price: Option<Decimal>,
    pub currency: Option<String>,
    pub price_bgn: Option<Decimal>,
    pub region: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub description_hash: Option<String>,
    pub features: serde_json::Value,
    pub first_image_hash: Option<i64>,
    pub seller_phone_hash: Option<String>,
    pub seller_profile_url: Option<String>,
    pub seller_id: Option<Uuid>,
    pub is_normalized: bool,
    pub is_draft: bool,
    pub is_duplicate: bool,
    pub canonical_of: Option<Uuid>,
    pub version: i32,
}

/// Field draft produced by the parse stage. Missing fields stay None.
#[derive(Debug, Clone, Default)]
pub struct ListingDraft {
    pub title: Option<String>,
    pub brand_raw: Option<String>,
    pub model_raw: Option<String>,
    pub price: Option<Decimal>,
    pub currency: Option<String>,
    pub year: Option<i32>,
    pub mileage_km: Option<i64>,
    pub fuel_raw: Option<String>,
    pub gearbox_raw: Option<String>,
    pub body_raw: Option<String>,
    pub power_hp: Option<i32>,
    pub region_raw: Option<String>,
    pub description: Option<String>,
    pub features: Vec<String>,
    pub image_urls: Vec<String>,
    pub first_image_phash: Option<i64>,
    pub seller_phone: Option<String>,
    pub seller_profile_url: Option<String>,
}

const LISTING_COLUMNS: &str =
    "id, raw_id, brand_raw, model_raw, fuel_raw, gearbox_raw, body_raw,
     brand_id, model_id, year, mileage_km, fuel, gearbox, body, power_hp,
     price, currency, price_bgn, region, title, description, description_hash, features,
     first_image_hash, seller_phone_hash, seller_profile_url, seller_id,
     is_normalized, is_draft, is_duplicate, canonical_of, version";

impl Listing {
    pub async fn find_by_id(id: Uuid, pool: &PgPool) -> Result<Listing> {
        let listing = sqlx::query_as::<_, Listing>(&format!(
            "SELECT {LISTING_COLUMNS} FROM listings WHERE id = $1"
        ))
        .bind(id)
        .fetch_one(pool)
        .await?;
        Ok(listing)
    }

    pub async fn find_by_raw_id(raw_id: Uuid, pool: &PgPool) -> Result<Option<Listing>> {
        let listing = sqlx::query_as::<_, Listing>(&format!(
            "SELECT {LISTING_COLUMNS} FROM listings WHERE raw_id = $1"
        ))
        .bind(raw_id)
        .fetch_optional(pool)
        .await?;
        Ok(listing)
    }

    /// Write the parse stage's draft inside the caller's transaction,
    /// replacing any previous generation's fields and images. The seller
    /// phone arrives pre-hashed; the raw number is never persisted.
    pub async fn upsert_draft(
        tx: &mut Transaction<'_, Postgres>,
        raw_id: Uuid,
        version: i32,
        draft: &ListingDraft,
        seller_phone_hash: Option<&str>,
    ) -> Result<Uuid> {
        let row = sqlx::query_as::<_, (Uuid,)>(
            "INSERT INTO listings
                 (raw_id, title, brand_raw, model_raw, fuel_raw, gearbox_raw, body_raw,
                  price, currency, year, mileage_km, power_hp, region,
                  description, features, first_image_hash,
                  seller_phone_hash, seller_profile_url, version, is_normalized, is_draft)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                     $17, $18, $19, false, false)
             ON CONFLICT (raw_id) DO UPDATE SET
                 title = EXCLUDED.title,
                 brand_raw = EXCLUDED.brand_raw,
                 model_raw = EXCLUDED.model_raw,
                 fuel_raw = EXCLUDED.fuel_raw,
                 gearbox_raw = EXCLUDED.gearbox_raw,
                 body_raw = EXCLUDED.body_raw,
                 price = EXCLUDED.price,
                 currency = EXCLUDED.currency,
                 year = EXCLUDED.year,
                 mileage_km = EXCLUDED.mileage_km,
                 power_hp = EXCLUDED.power_hp,
                 region = EXCLUDED.region,
                 description = EXCLUDED.description,
                 features = EXCLUDED.features,
                 first_image_hash = EXCLUDED.first_image_hash,
                 seller_phone_hash = EXCLUDED.seller_phone_hash,
                 seller_profile_url = EXCLUDED.seller_profile_url,
                 version = EXCLUDED.version,
                 is_normalized = false,
                 is_draft = false,
                 updated_at = now()
             RETURNING id",
        )
        .bind(raw_id)
        .bind(&draft.title)
        .bind(&draft.brand_raw)
        .bind(&draft.model_raw)
        .bind(&draft.fuel_raw)
        .bind(&draft.gearbox_raw)
        .bind(&draft.body_raw)
        .bind(draft.price)
        .bind(&draft.currency)
        .bind(draft.year)
        .bind(draft.mileage_km)
        .bind(draft.power_hp)
        .bind(&draft.region_raw)
        .bind(&draft.description)
        .bind(serde_json::json!(draft.features))
        .bind(draft.first_image_phash)
        .bind(seller_phone_hash)
        .bind(&draft.seller_profile_url)
        .bind(version)
        .fetch_one(&mut **tx)
        .await?;
        let listing_id = row.0;

        sqlx::query("DELETE FROM images WHERE listing_id = $1")
            .bind(listing_id)
            .execute(&mut **tx)
            .await?;
        for (idx, url) in draft.image_urls.iter().take(5).enumerate() {
            sqlx::query(
                "INSERT INTO images (listing_id, url, idx) VALUES ($1, $2, $3)",
            )
            .bind(listing_id)
            .bind(url)
            .bind(idx as i32)
            .execute(&mut **tx)
            .await?;
        }

        Ok(listing_id)
    }

    /// Persist the normalize stage's canonical fields.
    #[allow(clippy::too_many_arguments)]
    pub async fn apply_normalization(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        brand_id: &str,
        model_id: &str,
        fuel: Option<&str>,
        gearbox: Option<&str>,
        body: Option<&str>,
        year: Option<i32>,
        mileage_km: Option<i64>,
        price_bgn: Option<Decimal>,
        region: Option<&str>,
        description_hash: Option<&str>,
        seller_id: Option<Uuid>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE listings SET
                 brand_id = $2, model_id = $3, fuel = $4, gearbox = $5, body = $6,
                 year = $7, mileage_km = $8, price_bgn = $9, region = $10,
                 description_hash = $11, seller_id = $12,
                 is_normalized = true, is_draft = false, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(brand_id)
        .bind(model_id)
        .bind(fuel)
        .bind(gearbox)
        .bind(body)
        .bind(year)
        .bind(mileage_km)
        .bind(price_bgn)
        .bind(region)
        .bind(description_hash)
        .bind(seller_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// No confident brand/model mapping: park as draft. Revisited when the
    /// alias table changes.
    pub async fn mark_unmapped_draft(id: Uuid, pool: &PgPool) -> Result<()> {
        sqlx::query(
            "UPDATE listings SET is_draft = true, is_normalized = false, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Mark as a duplicate of `canonical_of` inside the caller's transaction.
    pub async fn mark_duplicate(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        canonical_of: Uuid,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE listings SET is_duplicate = true, canonical_of = $2, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(canonical_of)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Resolve the root canonical, compressing chains if a duplicate ever
    /// points at another duplicate. Chains should not appear; this
    /// reconciles them when they do.
    pub async fn resolve_canonical(id: Uuid, pool: &PgPool) -> Result<Uuid> {
        let mut current = id;
        for _ in 0..16 {
            let row = sqlx::query_as::<_, (Option<Uuid>,)>(
                "SELECT canonical_of FROM listings WHERE id = $1",
            )
            .bind(current)
            .fetch_one(pool)
            .await?;
            match row.0 {
                Some(next) if next != current => current = next,
                _ => break,
            }
        }
        if current != id {
            sqlx::query("UPDATE listings SET canonical_of = $2 WHERE id = $1 AND canonical_of IS NOT NULL")
                .bind(id)
                .bind(current)
                .execute(pool)
                .await?;
        }
        Ok(current)
    }

    /// `first_seen` of the backing raw listing — freshness is measured from
    /// first observation, not from parse time.
    pub async fn first_seen(id: Uuid, pool: &PgPool) -> Result<DateTime<Utc>> {
        let row = sqlx::query_as::<_, (DateTime<Utc>,)>(
            "SELECT r.first_seen FROM listings l JOIN listings_raw r ON r.id = l.raw_id
             WHERE l.id = $1",
        )
        .bind(id)
        .fetch_one(pool)
        .await?;
        Ok(row.0)
    }

    /// Listings parked as drafts for lack of a brand/model mapping.
    /// Re-enqueued for normalize when the alias table changes.
    pub async fn find_unmapped_drafts(limit: i64, pool: &PgPool) -> Result<Vec<Uuid>> {
        let rows = sqlx::query_as::<_, (Uuid,)>(
            "SELECT id FROM listings WHERE is_draft ORDER BY updated_at LIMIT $1",
        )
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }
}
