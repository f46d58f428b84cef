use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

/// A candidate duplicate: an existing active, non-duplicate listing plus
/// the evidence the method needs to decide.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Candidate {
    pub id: Uuid,
    pub first_seen: DateTime<Utc>,
}

/// Candidate with the stored perceptual hash, for Hamming comparison.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PhashCandidate {
    pub id: Uuid,
    pub first_seen: DateTime<Utc>,
    pub first_image_phash: i64,
}

/// Candidate with the trigram similarity Postgres computed.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TextCandidate {
    pub id: Uuid,
    pub first_seen: DateTime<Utc>,
    pub similarity: f32,
}

/// Same seller (by phone-hash-keyed seller row), same brand/model, price
/// within ±10%.
pub async fn phone_candidates(
    listing_id: Uuid,
    seller_id: Uuid,
    brand_id: &str,
    model_id: &str,
    price_bgn: rust_decimal::Decimal,
    pool: &PgPool,
) -> Result<Vec<Candidate>> {
    let rows = sqlx::query_as::<_, Candidate>(
        "SELECT l.id, r.first_seen FROM listings l
         JOIN listings_raw r ON r.id = l.raw_id
         WHERE l.seller_id = $2
           AND l.id <> $1
           AND l.brand_id = $3 AND l.model_id = $4
           AND l.price_bgn BETWEEN $5 * 0.9 AND $5 * 1.1
           AND l.is_normalized AND NOT l.is_duplicate AND r.is_active
         ORDER BY r.first_seen",
    )
    .bind(listing_id)
    .bind(seller_id)
    .bind(brand_id)
    .bind(model_id)
    .bind(price_bgn)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Recent active signatures with a populated phash. Hamming distance is
/// computed in Rust over this candidate set.
pub async fn phash_candidates(listing_id: Uuid, limit: i64, pool: &PgPool) -> Result<Vec<PhashCandidate>> {
    let rows = sqlx::query_as::<_, PhashCandidate>(
        "SELECT l.id, r.first_seen, s.first_image_phash
         FROM dedupe_signatures s
         JOIN listings l ON l.id = s.listing_id
         JOIN listings_raw r ON r.id = l.raw_id
         WHERE s.first_image_phash IS NOT NULL
           AND s.listing_id <> $1
           AND NOT l.is_duplicate AND r.is_active
         ORDER BY s.created_at DESC
         LIMIT $2",
    )
    .bind(listing_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Title-trigram candidates above `threshold`, tie-broken by brand/model,
/// year, mileage ±30% and price ±10%. Uses the pg_trgm GIN index.
#[allow(clippy::too_many_arguments)]
pub async fn text_candidates(
    listing_id: Uuid,
    title: &str,
    threshold: f32,
    brand_id: &str,
    model_id: &str,
    year: Option<i32>,
    mileage_km: Option<i64>,
    price_bgn: Option<rust_decimal::Decimal>,
    pool: &PgPool,
) -> Result<Vec<TextCandidate>> {
    let rows = sqlx::query_as::<_, TextCandidate>(
        "SELECT l.id, r.first_seen, similarity(l.title, $2) AS similarity
         FROM listings l
         JOIN listings_raw r ON r.id = l.raw_id
         WHERE l.id <> $1
           AND l.title % $2
           AND similarity(l.title, $2) >= $3
           AND l.brand_id = $4 AND l.model_id = $5
           AND ($6::int IS NULL OR l.year = $6)
           AND ($7::bigint IS NULL OR l.mileage_km BETWEEN ($7 * 0.7)::bigint AND ($7 * 1.3)::bigint)
           AND ($8::numeric IS NULL OR l.price_bgn BETWEEN $8 * 0.9 AND $8 * 1.1)
           AND l.is_normalized AND NOT l.is_duplicate AND r.is_active
         ORDER BY similarity DESC, r.first_seen
         LIMIT 20",
    )
    .bind(listing_id)
    .bind(title)
    .bind(threshold)
    .bind(brand_id)
    .bind(model_id)
    .bind(year)
    .bind(mileage_km)
    .bind(price_bgn)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Cosine-similar descriptions within the same brand/model, when vectors
/// are populated. Only compiled with the `embedding` feature.
#[cfg(feature = "embedding")]
pub async fn embedding_candidates(
    listing_id: Uuid,
    embedding: &pgvector::Vector,
    min_cosine: f64,
    brand_id: &str,
    model_id: &str,
    pool: &PgPool,
) -> Result<Vec<Candidate>> {
    let rows = sqlx::query_as::<_, Candidate>(
        "SELECT l.id, r.first_seen
         FROM dedupe_signatures s
         JOIN listings l ON l.id = s.listing_id
         JOIN listings_raw r ON r.id = l.raw_id
         WHERE s.embedding IS NOT NULL
           AND s.listing_id <> $1
           AND l.brand_id = $3 AND l.model_id = $4
           AND 1 - (s.embedding <=> $2) >= $5
           AND NOT l.is_duplicate AND r.is_active
         ORDER BY s.embedding <=> $2
         LIMIT 10",
    )
    .bind(listing_id)
    .bind(embedding)
    .bind(brand_id)
    .bind(model_id)
    .bind(min_cosine)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Persist the listing's signature in the same transaction that settles its
/// duplicate status, so future listings can match it.
pub async fn persist_signature(
    tx: &mut Transaction<'_, Postgres>,
    listing_id: Uuid,
    title_norm: Option<&str>,
    desc_hash: Option<&str>,
    first_image_phash: Option<i64>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO dedupe_signatures (listing_id, title_norm, desc_hash, first_image_phash)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (listing_id) DO UPDATE SET
             title_norm = EXCLUDED.title_norm,
             desc_hash = EXCLUDED.desc_hash,
             first_image_phash = EXCLUDED.first_image_phash",
    )
    .bind(listing_id)
    .bind(title_norm)
    .bind(desc_hash)
    .bind(first_image_phash)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Append the decision trail row.
pub async fn log_duplicate(
    tx: &mut Transaction<'_, Postgres>,
    listing_id: Uuid,
    duplicate_of: Uuid,
    method: &str,
    confidence: f64,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO duplicate_log (listing_id, duplicate_of, method, confidence)
         VALUES ($1, $2, $3, $4)",
    )
    .bind(listing_id)
    .bind(duplicate_of)
    .bind(method)
    .bind(confidence)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// 64-bit Hamming distance between two perceptual hashes.
pub fn hamming(a: i64, b: i64) -> u32 {
    ((a ^ b) as u64).count_ones()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hamming_of_equal_hashes_is_zero() {
        assert_eq!(hamming(0x1234_5678_9abc_def0, 0x1234_5678_9abc_def0), 0);
    }

    #[test]
    fn hamming_counts_flipped_bits() {
        assert_eq!(hamming(0, 0b1011), 3);
        assert_eq!(hamming(-1, 0), 64);
    }
}
