//! Channel delivery: rate-limited, diversity-filtered, idempotent per
//! `(channel, listing)`. Price changes edit the original message.

use std::time::Duration;

use anyhow::Result;
use rust_decimal::Decimal;
use tracing::{info, warn};

use carscout_common::ScoreState;
use carscout_store::channel::ChannelPost;
use carscout_store::images::Image;
use carscout_store::listings::Listing;
use carscout_store::rate_limit::TokenBucket;
use carscout_store::scores::Score;
use carscout_store::Job;
use telegram_client::{InlineButton, TransportError};

use crate::deps::PipelineDeps;
use crate::format;
use crate::stages::StageOutcome;

pub async fn run(job: &Job, deps: &PipelineDeps) -> Result<StageOutcome> {
    let listing = Listing::find_by_id(job.listing_id, deps.pool()).await?;
    let Some(score) = Score::find(listing.id, deps.pool()).await? else {
        return Ok(StageOutcome::Retry("score not yet persisted".into()));
    };
    if ScoreState::parse_str(&score.state) != Some(ScoreState::Approved) {
        return Ok(StageOutcome::Skip("not approved".into()));
    }
    let Some(price_bgn) = listing.price_bgn else {
        return Ok(StageOutcome::Skip("no BGN price".into()));
    };

    let channel = deps.config.telegram_channel.clone();
    if channel.is_empty() {
        return Ok(StageOutcome::Skip("no channel configured".into()));
    }

    // Existing post: this delivery is an edit or a no-op, not a new post,
    // so neither the bucket nor the diversity cap applies.
    if let Some(existing) = ChannelPost::find(&channel, listing.id, deps.pool()).await? {
        if existing.last_price_bgn == price_bgn {
            return Ok(StageOutcome::Done);
        }
        return edit_price(&listing, &score, &existing, price_bgn, deps).await;
    }

    // Diversity: cap per (brand, model) per rolling window.
    if let (Some(brand), Some(model)) = (listing.brand_id.as_deref(), listing.model_id.as_deref()) {
        let recent = ChannelPost::count_recent_for_model(
            &channel,
            brand,
            model,
            deps.config.diversity_window_hours,
            deps.pool(),
        )
        .await?;
        if recent >= deps.config.diversity_cap_per_model {
            info!(listing_id = %listing.id, brand, model, "Diversity cap hit, deferring");
            return Ok(StageOutcome::Defer(Duration::from_secs(30 * 60)));
        }
    }

    // Channel token bucket: N posts per rolling hour.
    let capacity = deps.config.channel_posts_per_hour as f64;
    let bucket_key = format!("channel:{channel}");
    if !TokenBucket::try_take(&bucket_key, capacity, capacity / 3600.0, deps.pool()).await? {
        return Ok(StageOutcome::Defer(Duration::from_secs(120)));
    }

    let images = Image::urls_for_listing(listing.id, deps.pool()).await?;
    let caption = format::channel_caption(&listing, &score, price_bgn);
    let raw_url = listing_url(&listing, deps).await?;
    let buttons = vec![InlineButton::new("🔗 Виж обява", raw_url)];

    // Per-key lock spans check + send + insert so a concurrent worker for
    // the same (channel, listing) can't double-post. The transaction is
    // held across the send, bounded by the transport timeout.
    let mut tx = deps.pool().begin().await?;
    ChannelPost::lock_key(&mut tx, &channel, listing.id).await?;
    if ChannelPost::find(&channel, listing.id, deps.pool()).await?.is_some() {
        tx.rollback().await?;
        return Ok(StageOutcome::Done);
    }

    match deps
        .messenger
        .send_media_group(&channel, &images, &caption, &buttons)
        .await
    {
        Ok(message_id) => {
            ChannelPost::insert(&mut tx, &channel, listing.id, message_id, price_bgn).await?;
            tx.commit().await?;
            info!(listing_id = %listing.id, message_id, "Posted to channel");
            Ok(StageOutcome::Done)
        }
        Err(e) => {
            tx.rollback().await?;
            transport_outcome(e, &bucket_key, deps).await
        }
    }
}

async fn edit_price(
    listing: &Listing,
    score: &Score,
    existing: &ChannelPost,
    price_bgn: Decimal,
    deps: &PipelineDeps,
) -> Result<StageOutcome> {
    let caption = format::channel_caption(listing, score, price_bgn);

    let mut tx = deps.pool().begin().await?;
    ChannelPost::lock_key(&mut tx, &existing.channel, listing.id).await?;

    match deps
        .messenger
        .edit_caption(&existing.channel, existing.message_id, &caption)
        .await
    {
        Ok(()) => {
            ChannelPost::update_price(&mut tx, &existing.channel, listing.id, price_bgn).await?;
            tx.commit().await?;
            info!(
                listing_id = %listing.id,
                message_id = existing.message_id,
                price = %price_bgn,
                "Edited channel post price"
            );
            Ok(StageOutcome::Done)
        }
        Err(e) => {
            tx.rollback().await?;
            let key = format!("channel:{}", existing.channel);
            transport_outcome(e, &key, deps).await
        }
    }
}

/// Map typed transport errors onto queue outcomes.
async fn transport_outcome(
    error: TransportError,
    bucket_key: &str,
    deps: &PipelineDeps,
) -> Result<StageOutcome> {
    match error {
        TransportError::RateLimited(retry_after) => {
            // Honor retry_after locally too: the quota is already spent.
            TokenBucket::drain_for(bucket_key, retry_after.as_secs_f64(), deps.pool()).await?;
            Ok(StageOutcome::Defer(retry_after))
        }
        TransportError::Transient(e) => Ok(StageOutcome::Retry(e)),
        TransportError::InvalidRecipient(e) | TransportError::Permanent(e) => {
            warn!(error = %e, "Permanent delivery failure, skipping");
            Ok(StageOutcome::Skip(e))
        }
    }
}

async fn listing_url(listing: &Listing, deps: &PipelineDeps) -> Result<String> {
    let row: (String,) = sqlx::query_as("SELECT url FROM listings_raw WHERE id = $1")
        .bind(listing.raw_id)
        .fetch_one(deps.pool())
        .await?;
    Ok(row.0)
}
