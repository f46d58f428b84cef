//! Normalize: free-form draft fields → canonical vocabulary, BGN price,
//! hashed seller identity.

use std::sync::OnceLock;
use std::time::Duration;

use anyhow::Result;
use chrono::{Datelike, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use tracing::info;

use carscout_common::{fx, text, vocab, Stage};
use carscout_store::fx::FxRates;
use carscout_store::listings::Listing;
use carscout_store::sellers::Seller;
use carscout_store::{Job, Queue};

use crate::deps::PipelineDeps;
use crate::stages::StageOutcome;

pub async fn run(job: &Job, deps: &PipelineDeps) -> Result<StageOutcome> {
    let listing = Listing::find_by_id(job.listing_id, deps.pool()).await?;

    // Brand/model via the alias table; fall back to scanning the title.
    let aliases = deps.aliases.read().await;
    let mapped = match (&listing.brand_raw, &listing.model_raw) {
        (Some(brand), Some(model)) => aliases.match_pair(brand, model),
        _ => listing.title.as_deref().and_then(|title| {
            let tokens: Vec<&str> = title.split_whitespace().collect();
            let (brand, model, _) = aliases.match_tokens(&tokens);
            brand.zip(model)
        }),
    };
    drop(aliases);

    let Some((brand_id, model_id)) = mapped else {
        Listing::mark_unmapped_draft(listing.id, deps.pool()).await?;
        return Ok(StageOutcome::Skip("no confident brand/model mapping".into()));
    };

    let fuel = listing.fuel_raw.as_deref().and_then(vocab::canonical_fuel);
    let gearbox = listing.gearbox_raw.as_deref().and_then(vocab::canonical_gearbox);
    let body = listing.body_raw.as_deref().and_then(vocab::canonical_body);

    // Numbers: structured values win; free text is the fallback.
    let current_year = Utc::now().year();
    let year = listing
        .year
        .or_else(|| extract_year(listing.title.as_deref().unwrap_or_default()));
    if let Some(y) = year {
        if !vocab::plausible_year(y, current_year) {
            Listing::mark_unmapped_draft(listing.id, deps.pool()).await?;
            return Ok(StageOutcome::Skip(format!("implausible year {y}")));
        }
    }
    let mileage = listing
        .mileage_km
        .or_else(|| extract_mileage_km(listing.description.as_deref().unwrap_or_default()));
    if let Some(km) = mileage {
        if !vocab::plausible_mileage(km) {
            Listing::mark_unmapped_draft(listing.id, deps.pool()).await?;
            return Ok(StageOutcome::Skip(format!("implausible mileage {km}")));
        }
    }

    // Price to BGN with the day's rate.
    let price_bgn = match (listing.price, listing.currency.as_deref()) {
        (Some(price), Some(currency)) => {
            let today = Utc::now().date_naive();
            match FxRates::rate_on(today, currency, deps.pool()).await? {
                Some(rate) => Some(fx::to_bgn(price, rate)),
                None => {
                    return Ok(StageOutcome::Retry(format!("no FX rate for {currency}")));
                }
            }
        }
        (Some(price), None) => Some(price.round_dp(2)),
        _ => None,
    };

    let region = listing.region.as_deref().and_then(vocab::canonical_region);
    let description_hash = listing.description.as_deref().map(text::description_hash);

    let mut tx = deps.pool().begin().await?;

    let seller_id = match &listing.seller_phone_hash {
        Some(hash) => Some(
            Seller::upsert_by_phone_hash(&mut tx, hash, listing.seller_profile_url.as_deref())
                .await?,
        ),
        None => None,
    };

    Listing::apply_normalization(
        &mut tx,
        listing.id,
        &brand_id,
        &model_id,
        fuel.map(|f| f.as_str()),
        gearbox.map(|g| g.as_str()),
        body.map(|b| b.as_str()),
        year,
        mileage,
        price_bgn,
        region,
        description_hash.as_deref(),
        seller_id,
    )
    .await?;
    Queue::enqueue_in(
        &mut tx,
        Stage::Dedupe,
        listing.id,
        &format!("v{}", listing.version),
        Duration::ZERO,
    )
    .await?;
    tx.commit().await?;

    info!(listing_id = %listing.id, brand = %brand_id, model = %model_id, "Normalized listing");
    Ok(StageOutcome::Done)
}

fn year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b((?:19|20)\d{2})\s*(?:г\.?|год\.?)?\b").unwrap())
}

fn mileage_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+(?:[ .]\d+)*)\s*(хил\.?\s*)?(?:км|km)").unwrap())
}

/// First plausible-looking four-digit year in free text.
pub fn extract_year(text: &str) -> Option<i32> {
    year_re().captures(text).and_then(|c| c[1].parse().ok())
}

/// Mileage in km from free text; "145 000 км", "145.000km" and the like.
pub fn extract_mileage_km(text: &str) -> Option<i64> {
    let caps = mileage_re().captures(text)?;
    let digits: String = caps[1].chars().filter(|c| c.is_ascii_digit()).collect();
    let mut value: i64 = digits.parse().ok()?;
    // "145 хил. км" style — the captured number is in thousands.
    if caps.get(2).is_some() {
        value *= 1_000;
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn year_from_title() {
        assert_eq!(extract_year("BMW X5 3.0d 2019 г."), Some(2019));
        assert_eq!(extract_year("Голф без година"), None);
    }

    #[test]
    fn mileage_with_thousands_separator() {
        assert_eq!(extract_mileage_km("пробег 145 000 км реални"), Some(145_000));
        assert_eq!(extract_mileage_km("145.000km"), Some(145_000));
    }

    #[test]
    fn mileage_in_thousands_shorthand() {
        assert_eq!(extract_mileage_km("само 145 хил. км"), Some(145_000));
    }

    #[test]
    fn no_mileage_is_none() {
        assert_eq!(extract_mileage_km("перфектно състояние"), None);
    }
}
