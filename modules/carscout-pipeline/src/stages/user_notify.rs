//! Per-user alert dispatch: plan delay and daily cap enforced here, at
//! delivery time, with the entitlement view re-checked. A permanent send
//! failure settles the match as failed — users are never spammed with
//! retries.

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use carscout_store::alerts::{Alert, AlertMatch};
use carscout_store::listings::Listing;
use carscout_store::rate_limit::{DailyCounter, TokenBucket};
use carscout_store::users::{Plan, User};
use carscout_store::Job;
use telegram_client::{InlineButton, TransportError};

use crate::deps::PipelineDeps;
use crate::format;
use crate::stages::StageOutcome;

/// Shared limiter for the user-notification transport.
const NOTIFY_BUCKET: &str = "notify:telegram";
const NOTIFY_CAPACITY: f64 = 25.0;
const NOTIFY_REFILL_PER_S: f64 = 25.0;

pub async fn run(job: &Job, deps: &PipelineDeps) -> Result<StageOutcome> {
    // The job's idem key is the alert id; together with the listing id it
    // names exactly one match row.
    let Ok(alert_id) = job.idem_key.parse::<Uuid>() else {
        return Ok(StageOutcome::DeadLetter(format!("bad alert id {}", job.idem_key)));
    };
    let Some(m) = AlertMatch::find(alert_id, job.listing_id, deps.pool()).await? else {
        return Ok(StageOutcome::Skip("match row vanished".into()));
    };
    if m.status != "pending" {
        return Ok(StageOutcome::Done);
    }

    // Plan delay: never deliver early.
    let now = Utc::now();
    if now < m.deliver_at {
        let remaining = (m.deliver_at - now).to_std().unwrap_or(Duration::from_secs(1));
        return Ok(StageOutcome::Defer(remaining));
    }

    // Re-check alert and subscription at delivery time.
    let alert = Alert::find_by_id(alert_id, deps.pool()).await?;
    let user = User::find_by_id(alert.user_id, deps.pool()).await?;
    if !alert.active || user.status != "active" {
        settle(&m, "skipped", false, deps).await?;
        return Ok(StageOutcome::Done);
    }

    // Daily cap per user per UTC day; increment first so concurrent
    // deliveries can't both sneak under the cap.
    let plan = Plan::effective_for_user(user.id, deps.pool()).await?;
    let day = now.date_naive();
    let cap_key = format!("alerts:{}", user.id);
    if let Some(cap) = plan.daily_cap {
        let count = DailyCounter::increment(&cap_key, day, deps.pool()).await?;
        if count > cap {
            DailyCounter::decrement(&cap_key, day, deps.pool()).await?;
            settle(&m, "skipped", false, deps).await?;
            info!(user_id = %user.id, cap, "Daily cap reached, match skipped");
            return Ok(StageOutcome::Done);
        }
    }

    // Transport rate limiter, separate from the channel's.
    if !TokenBucket::try_take(NOTIFY_BUCKET, NOTIFY_CAPACITY, NOTIFY_REFILL_PER_S, deps.pool())
        .await?
    {
        if plan.daily_cap.is_some() {
            DailyCounter::decrement(&cap_key, day, deps.pool()).await?;
        }
        return Ok(StageOutcome::Defer(Duration::from_secs(2)));
    }

    let listing = Listing::find_by_id(job.listing_id, deps.pool()).await?;
    let Some(price_bgn) = listing.price_bgn else {
        settle(&m, "skipped", false, deps).await?;
        return Ok(StageOutcome::Done);
    };
    let message = format::alert_message(&listing, price_bgn);
    let url = listing_url(&listing, deps).await?;
    let buttons = vec![InlineButton::new("🔗 Виж обява", url)];
    let chat = user.telegram_user_id.to_string();

    match deps.messenger.send_message(&chat, &message, &buttons).await {
        Ok(_) => {
            settle(&m, "notified", true, deps).await?;
            info!(alert_id = %alert.id, listing_id = %listing.id, "Alert delivered");
            Ok(StageOutcome::Done)
        }
        Err(TransportError::RateLimited(retry_after)) => {
            if plan.daily_cap.is_some() {
                DailyCounter::decrement(&cap_key, day, deps.pool()).await?;
            }
            TokenBucket::drain_for(NOTIFY_BUCKET, retry_after.as_secs_f64(), deps.pool()).await?;
            Ok(StageOutcome::Defer(retry_after))
        }
        Err(TransportError::Transient(e)) => {
            if plan.daily_cap.is_some() {
                DailyCounter::decrement(&cap_key, day, deps.pool()).await?;
            }
            Ok(StageOutcome::Retry(e))
        }
        Err(TransportError::InvalidRecipient(e)) | Err(TransportError::Permanent(e)) => {
            warn!(alert_id = %alert.id, error = %e, "Permanent alert failure");
            if plan.daily_cap.is_some() {
                DailyCounter::decrement(&cap_key, day, deps.pool()).await?;
            }
            settle(&m, "failed", false, deps).await?;
            Ok(StageOutcome::Done)
        }
    }
}

async fn settle(m: &AlertMatch, status: &str, notified: bool, deps: &PipelineDeps) -> Result<()> {
    let mut tx = deps.pool().begin().await?;
    AlertMatch::settle(&mut tx, m.id, status, notified).await?;
    tx.commit().await?;
    Ok(())
}

async fn listing_url(listing: &Listing, deps: &PipelineDeps) -> Result<String> {
    let row: (String,) = sqlx::query_as("SELECT url FROM listings_raw WHERE id = $1")
        .bind(listing.raw_id)
        .fetch_one(deps.pool())
        .await?;
    Ok(row.0)
}
