//! Alert matching: every active alert is tested against the approved
//! listing; matches are scheduled with the owner plan's delay.

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use tracing::{info, warn};

use carscout_common::{ScoreState, Stage};
use carscout_store::alerts::{Alert, AlertMatch};
use carscout_store::listings::Listing;
use carscout_store::scores::Score;
use carscout_store::users::Plan;
use carscout_store::{Job, Queue};

use crate::alert_dsl::{self, AlertFilters, ListingFacts};
use crate::deps::PipelineDeps;
use crate::stages::StageOutcome;

pub async fn run(job: &Job, deps: &PipelineDeps) -> Result<StageOutcome> {
    let listing = Listing::find_by_id(job.listing_id, deps.pool()).await?;
    let Some(score) = Score::find(listing.id, deps.pool()).await? else {
        return Ok(StageOutcome::Retry("score not yet persisted".into()));
    };
    if ScoreState::parse_str(&score.state) != Some(ScoreState::Approved) {
        return Ok(StageOutcome::Skip("not approved".into()));
    }

    let facts = facts_for(&listing);
    let alerts = Alert::find_active(deps.pool()).await?;
    let mut matched = 0usize;

    for alert in alerts {
        let filters: AlertFilters = match serde_json::from_value(alert.filters.clone()) {
            Ok(filters) => filters,
            Err(e) => {
                warn!(alert_id = %alert.id, error = %e, "Unreadable alert filters, skipping");
                continue;
            }
        };
        if !alert_dsl::matches(&filters, &facts) {
            continue;
        }

        let plan = Plan::effective_for_user(alert.user_id, deps.pool()).await?;
        let delay = Duration::from_secs(plan.notification_delay_min as u64 * 60);
        let deliver_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();

        // The unique (alert, listing) pair collapses concurrent duplicates;
        // the notify job rides the same transaction, delayed to deliver_at.
        let mut tx = deps.pool().begin().await?;
        if AlertMatch::create(&mut tx, alert.id, listing.id, deliver_at)
            .await?
            .is_some()
        {
            Queue::enqueue_in(
                &mut tx,
                Stage::UserNotify,
                listing.id,
                &alert.id.to_string(),
                delay,
            )
            .await?;
            matched += 1;
        }
        tx.commit().await?;
    }

    info!(listing_id = %listing.id, matched, "Alert matching complete");
    Ok(StageOutcome::Done)
}

fn facts_for(listing: &Listing) -> ListingFacts {
    ListingFacts {
        brand_id: listing.brand_id.clone(),
        model_id: listing.model_id.clone(),
        fuel: listing.fuel.clone(),
        gearbox: listing.gearbox.clone(),
        body: listing.body.clone(),
        region: listing.region.clone(),
        year: listing.year,
        price_bgn: listing.price_bgn.and_then(|p| p.to_i64()),
        mileage_km: listing.mileage_km,
        power_hp: listing.power_hp,
    }
}
