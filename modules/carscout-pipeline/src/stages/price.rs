//! Price: nonparametric estimate from comparables with progressive filter
//! relaxation. P50 of the selected set is the prediction.

use std::time::Duration;

use anyhow::Result;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use tracing::info;

use carscout_common::Stage;
use carscout_store::listings::Listing;
use carscout_store::pricing::{fetch_comparables, CompCache, CompFilter, PriceHistory};
use carscout_store::{Job, Queue};

use crate::deps::PipelineDeps;
use crate::stages::StageOutcome;

pub const MODEL_VERSION: &str = "comps-v1";

/// Sample size at which the ladder stops relaxing.
const TARGET_SAMPLE: usize = 30;
/// Below this, the estimate is unusable: confidence 0, no prediction.
const MIN_SAMPLE: usize = 5;
const MAX_COMPARABLES: i64 = 200;
const WINDOW_DAYS: i64 = 180;

pub async fn run(job: &Job, deps: &PipelineDeps) -> Result<StageOutcome> {
    let listing = Listing::find_by_id(job.listing_id, deps.pool()).await?;
    if listing.is_duplicate {
        return Ok(StageOutcome::Skip("duplicates are not priced".into()));
    }

    let (brand_id, model_id, year, price_bgn) = match (
        listing.brand_id.clone(),
        listing.model_id.clone(),
        listing.year,
        listing.price_bgn,
    ) {
        (Some(b), Some(m), Some(y), Some(p)) => (b, m, y, p),
        _ => {
            // Not enough features to select comparables; record the empty
            // estimate and let scoring reject it.
            return persist_and_forward(&listing, Estimate::empty(0), deps).await;
        }
    };

    let (prices, step) = select_comparables(&listing, &brand_id, &model_id, year, deps).await?;
    let estimate = estimate_from(&prices, price_bgn, step);

    persist_and_forward(&listing, estimate, deps).await
}

/// Walk the relaxation ladder, stopping at the first step with a full
/// sample. Returns the selected prices and the step index that produced
/// them.
async fn select_comparables(
    listing: &Listing,
    brand_id: &str,
    model_id: &str,
    year: i32,
    deps: &PipelineDeps,
) -> Result<(Vec<Decimal>, i32)> {
    let base = CompFilter {
        listing_id: listing.id,
        brand_id: brand_id.to_string(),
        model_id: model_id.to_string(),
        year,
        year_window: 2,
        mileage_km: listing.mileage_km,
        mileage_pct: Some(0.30),
        fuel: listing.fuel.clone(),
        gearbox: listing.gearbox.clone(),
        window_days: WINDOW_DAYS,
        limit: MAX_COMPARABLES,
    };

    // Step order: widen mileage, drop gearbox, drop fuel, widen year.
    let steps: Vec<CompFilter> = vec![
        base.clone(),
        CompFilter { mileage_pct: Some(0.50), ..base.clone() },
        CompFilter { mileage_pct: Some(0.50), gearbox: None, ..base.clone() },
        CompFilter { mileage_pct: Some(0.50), gearbox: None, fuel: None, ..base.clone() },
        CompFilter {
            mileage_pct: Some(0.50),
            gearbox: None,
            fuel: None,
            year_window: 4,
            ..base
        },
    ];

    let mut widest: Vec<Decimal> = Vec::new();
    for (i, filter) in steps.iter().enumerate() {
        let prices = fetch_comparables(filter, deps.pool()).await?;
        if prices.len() >= TARGET_SAMPLE {
            return Ok((prices, i as i32));
        }
        widest = prices;
    }
    Ok((widest, steps.len() as i32 - 1))
}

#[derive(Debug, Clone)]
pub struct Estimate {
    pub p10: Option<Decimal>,
    pub p25: Option<Decimal>,
    pub p50: Option<Decimal>,
    pub p75: Option<Decimal>,
    pub p90: Option<Decimal>,
    pub mean: Option<Decimal>,
    pub sd: Option<f64>,
    pub predicted_price: Option<Decimal>,
    pub discount_pct: Option<f64>,
    pub sample_size: usize,
    pub confidence: f64,
    pub relaxation_step: i32,
}

impl Estimate {
    fn empty(step: i32) -> Self {
        Self {
            p10: None,
            p25: None,
            p50: None,
            p75: None,
            p90: None,
            mean: None,
            sd: None,
            predicted_price: None,
            discount_pct: None,
            sample_size: 0,
            confidence: 0.0,
            relaxation_step: step,
        }
    }
}

/// Empirical quantiles, mean/sd, discount against the asking price, and
/// `confidence = min(1, n/30) × max(0, 1 − cv)` clamped to [0,1].
pub fn estimate_from(prices: &[Decimal], asking_bgn: Decimal, step: i32) -> Estimate {
    let n = prices.len();
    if n < MIN_SAMPLE {
        return Estimate { sample_size: n, ..Estimate::empty(step) };
    }

    let mut values: Vec<f64> = prices.iter().filter_map(|p| p.to_f64()).collect();
    values.sort_by(|a, b| a.total_cmp(b));

    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    let sd = variance.sqrt();
    let cv = if mean > 0.0 { sd / mean } else { 1.0 };

    let p50 = percentile(&values, 0.50);
    let predicted = Decimal::from_f64(p50).map(|d| d.round_dp(2));
    let asking = asking_bgn.to_f64().unwrap_or(0.0);
    let discount = if p50 > 0.0 { Some((p50 - asking) / p50) } else { None };

    let confidence =
        ((n as f64 / TARGET_SAMPLE as f64).min(1.0) * (1.0 - cv).max(0.0)).clamp(0.0, 1.0);

    let dec = |v: f64| Decimal::from_f64(v).map(|d| d.round_dp(2));

    Estimate {
        p10: dec(percentile(&values, 0.10)),
        p25: dec(percentile(&values, 0.25)),
        p50: dec(p50),
        p75: dec(percentile(&values, 0.75)),
        p90: dec(percentile(&values, 0.90)),
        mean: dec(mean),
        sd: Some(sd),
        predicted_price: predicted,
        discount_pct: discount,
        sample_size: n,
        confidence,
        relaxation_step: step,
    }
}

/// Linear-interpolated empirical percentile over sorted values.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = q * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = rank - lo as f64;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}

async fn persist_and_forward(
    listing: &Listing,
    estimate: Estimate,
    deps: &PipelineDeps,
) -> Result<StageOutcome> {
    let cache = CompCache {
        listing_id: listing.id,
        p10: estimate.p10,
        p25: estimate.p25,
        p50: estimate.p50,
        p75: estimate.p75,
        p90: estimate.p90,
        mean: estimate.mean,
        sd: estimate.sd,
        predicted_price: estimate.predicted_price,
        discount_pct: estimate.discount_pct,
        sample_size: estimate.sample_size as i32,
        confidence: estimate.confidence,
        relaxation_step: estimate.relaxation_step,
        computed_at: chrono::Utc::now(),
        model_version: MODEL_VERSION.to_string(),
    };

    let mut tx = deps.pool().begin().await?;
    cache.upsert(&mut tx).await?;
    if let Some(price) = listing.price_bgn {
        PriceHistory::append_if_changed(&mut tx, listing.id, price).await?;
    }
    Queue::enqueue_in(
        &mut tx,
        Stage::Risk,
        listing.id,
        &format!("v{}", listing.version),
        Duration::ZERO,
    )
    .await?;
    tx.commit().await?;

    info!(
        listing_id = %listing.id,
        sample = estimate.sample_size,
        confidence = estimate.confidence,
        step = estimate.relaxation_step,
        "Priced listing"
    );
    Ok(StageOutcome::Done)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prices(values: &[i64]) -> Vec<Decimal> {
        values.iter().map(|v| Decimal::from(*v)).collect()
    }

    #[test]
    fn small_sample_yields_zero_confidence_and_no_prediction() {
        let est = estimate_from(&prices(&[30_000, 31_000]), Decimal::from(28_000), 0);
        assert_eq!(est.sample_size, 2);
        assert_eq!(est.confidence, 0.0);
        assert!(est.predicted_price.is_none());
    }

    #[test]
    fn median_is_the_prediction() {
        let set: Vec<i64> = (0..40).map(|i| 30_000 + i * 100).collect();
        let est = estimate_from(&prices(&set), Decimal::from(28_500), 0);
        let predicted = est.predicted_price.unwrap().to_f64().unwrap();
        assert!((predicted - 31_950.0).abs() < 1.0, "median ≈ 31950, got {predicted}");
        assert!(est.discount_pct.unwrap() > 0.10);
    }

    #[test]
    fn confidence_scales_with_sample_and_spread() {
        // 40 tightly clustered comparables: near-full confidence.
        let tight: Vec<i64> = (0..40).map(|i| 32_000 + (i % 5) * 50).collect();
        let est = estimate_from(&prices(&tight), Decimal::from(28_500), 0);
        assert!(est.confidence > 0.9, "tight set should be confident: {}", est.confidence);

        // Same prices, tiny sample: capped by n/30.
        let est_small = estimate_from(&prices(&tight[..6]), Decimal::from(28_500), 0);
        assert!(est_small.confidence < 0.25);
    }

    #[test]
    fn quantiles_are_ordered() {
        let spread: Vec<i64> = (0..60).map(|i| 20_000 + i * 500).collect();
        let est = estimate_from(&prices(&spread), Decimal::from(25_000), 1);
        let (p10, p50, p90) = (est.p10.unwrap(), est.p50.unwrap(), est.p90.unwrap());
        assert!(p10 < p50 && p50 < p90);
    }

    #[test]
    fn overpriced_listing_has_negative_discount() {
        let set: Vec<i64> = (0..35).map(|_| 30_000).collect();
        let est = estimate_from(&prices(&set), Decimal::from(33_000), 0);
        assert!(est.discount_pct.unwrap() < 0.0);
    }
}
