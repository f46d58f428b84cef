//! Dedupe: multi-method cascade. First method whose confidence clears its
//! threshold wins; the earliest-seen listing of the pair stays canonical
//! regardless of arrival order.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use carscout_common::{text, DuplicateMethod, Stage};
use carscout_store::dedupe as sig;
use carscout_store::listings::Listing;
use carscout_store::{Job, Queue};

use crate::deps::PipelineDeps;
use crate::stages::StageOutcome;

/// Max Hamming distance for a first-image phash hit.
const PHASH_MAX_HAMMING: u32 = 6;
/// Trigram similarity floor for the title method.
const TEXT_THRESHOLD: f32 = 0.80;
/// How many recent phash signatures to scan per listing.
const PHASH_SCAN_LIMIT: i64 = 2_000;

const CONFIDENCE_PHONE: f64 = 0.95;
const CONFIDENCE_IMAGE: f64 = 0.90;
const CONFIDENCE_TEXT: f64 = 0.75;
#[cfg(feature = "embedding")]
const CONFIDENCE_EMBEDDING: f64 = 0.80;
#[cfg(feature = "embedding")]
const EMBEDDING_MIN_COSINE: f64 = 0.85;

struct Hit {
    other: Uuid,
    other_first_seen: DateTime<Utc>,
    method: DuplicateMethod,
    confidence: f64,
}

pub async fn run(job: &Job, deps: &PipelineDeps) -> Result<StageOutcome> {
    let listing = Listing::find_by_id(job.listing_id, deps.pool()).await?;
    if !listing.is_normalized {
        return Ok(StageOutcome::Skip("not normalized".into()));
    }
    if listing.is_duplicate {
        return Ok(StageOutcome::Skip("already settled as duplicate".into()));
    }

    let hit = find_duplicate(&listing, deps).await?;
    let first_seen = Listing::first_seen(listing.id, deps.pool()).await?;
    let title_norm = listing.title.as_deref().map(text::normalize_whitespace);

    let mut tx = deps.pool().begin().await?;

    match hit {
        Some(hit) if hit.other_first_seen <= first_seen => {
            // The existing listing was seen first: this one folds into it.
            let canonical = Listing::resolve_canonical(hit.other, deps.pool()).await?;
            Listing::mark_duplicate(&mut tx, listing.id, canonical).await?;
            sig::log_duplicate(&mut tx, listing.id, canonical, hit.method.as_str(), hit.confidence)
                .await?;
            tx.commit().await?;
            info!(
                listing_id = %listing.id,
                canonical = %canonical,
                method = %hit.method,
                confidence = hit.confidence,
                "Duplicate suppressed"
            );
            // Duplicates terminate here; only the canonical proceeds.
            return Ok(StageOutcome::Done);
        }
        Some(hit) => {
            // This listing was observed first (batch order is not arrival
            // order): the other one folds into this.
            Listing::mark_duplicate(&mut tx, hit.other, listing.id).await?;
            sig::log_duplicate(&mut tx, hit.other, listing.id, hit.method.as_str(), hit.confidence)
                .await?;
            info!(
                listing_id = %hit.other,
                canonical = %listing.id,
                method = %hit.method,
                "Later-arriving canonical absorbed earlier match"
            );
        }
        None => {}
    }

    // Not a duplicate: persist the signature in the same transaction so
    // future listings can match against it, then move on to pricing.
    sig::persist_signature(
        &mut tx,
        listing.id,
        title_norm.as_deref(),
        listing.description_hash.as_deref(),
        listing.first_image_hash,
    )
    .await?;
    Queue::enqueue_in(
        &mut tx,
        Stage::Price,
        listing.id,
        &format!("v{}", listing.version),
        Duration::ZERO,
    )
    .await?;
    tx.commit().await?;

    Ok(StageOutcome::Done)
}

/// Run the cascade in fixed order: phone, image, text, embedding.
async fn find_duplicate(listing: &Listing, deps: &PipelineDeps) -> Result<Option<Hit>> {
    // 1. Phone: same seller, same model, price within ±10%.
    if let (Some(seller_id), Some(brand), Some(model), Some(price)) = (
        listing.seller_id,
        listing.brand_id.as_deref(),
        listing.model_id.as_deref(),
        listing.price_bgn,
    ) {
        let candidates =
            sig::phone_candidates(listing.id, seller_id, brand, model, price, deps.pool()).await?;
        if let Some(candidate) = candidates.first() {
            return Ok(Some(Hit {
                other: candidate.id,
                other_first_seen: candidate.first_seen,
                method: DuplicateMethod::Phone,
                confidence: CONFIDENCE_PHONE,
            }));
        }
    }

    // 2. Image: first-image perceptual hash within Hamming distance.
    if let Some(phash) = listing.first_image_hash {
        let candidates = sig::phash_candidates(listing.id, PHASH_SCAN_LIMIT, deps.pool()).await?;
        let best = candidates
            .iter()
            .map(|c| (sig::hamming(phash, c.first_image_phash), c))
            .filter(|(dist, _)| *dist <= PHASH_MAX_HAMMING)
            .min_by_key(|(dist, _)| *dist);
        if let Some((_, candidate)) = best {
            return Ok(Some(Hit {
                other: candidate.id,
                other_first_seen: candidate.first_seen,
                method: DuplicateMethod::Image,
                confidence: CONFIDENCE_IMAGE,
            }));
        }
    }

    // 3. Text: title trigram similarity with attribute tie-breaks.
    if let (Some(title), Some(brand), Some(model)) = (
        listing.title.as_deref(),
        listing.brand_id.as_deref(),
        listing.model_id.as_deref(),
    ) {
        let candidates = sig::text_candidates(
            listing.id,
            title,
            TEXT_THRESHOLD,
            brand,
            model,
            listing.year,
            listing.mileage_km,
            listing.price_bgn,
            deps.pool(),
        )
        .await?;
        if let Some(candidate) = candidates.first() {
            return Ok(Some(Hit {
                other: candidate.id,
                other_first_seen: candidate.first_seen,
                method: DuplicateMethod::Text,
                confidence: CONFIDENCE_TEXT,
            }));
        }
    }

    // 4. Embedding: optional, only when signature vectors are populated.
    #[cfg(feature = "embedding")]
    {
        if let (Some(brand), Some(model)) =
            (listing.brand_id.as_deref(), listing.model_id.as_deref())
        {
            if let Some(embedding) = signature_embedding(listing.id, deps).await? {
                let candidates = sig::embedding_candidates(
                    listing.id,
                    &embedding,
                    EMBEDDING_MIN_COSINE,
                    brand,
                    model,
                    deps.pool(),
                )
                .await?;
                if let Some(candidate) = candidates.first() {
                    return Ok(Some(Hit {
                        other: candidate.id,
                        other_first_seen: candidate.first_seen,
                        method: DuplicateMethod::Embedding,
                        confidence: CONFIDENCE_EMBEDDING,
                    }));
                }
            }
        }
    }

    Ok(None)
}

#[cfg(feature = "embedding")]
async fn signature_embedding(
    listing_id: Uuid,
    deps: &PipelineDeps,
) -> Result<Option<pgvector::Vector>> {
    let row: Option<(Option<pgvector::Vector>,)> = sqlx::query_as(
        "SELECT embedding FROM dedupe_signatures WHERE listing_id = $1",
    )
    .bind(listing_id)
    .fetch_optional(deps.pool())
    .await?;
    Ok(row.and_then(|r| r.0))
}
