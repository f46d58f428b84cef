//! Score and approval gate. Four additive components on top of a base of
//! 1, clamped to [1,10]; approval needs every gate to hold.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::info;

use carscout_common::{RiskLevel, ScoreState, Stage};
use carscout_store::listings::Listing;
use carscout_store::pricing::CompCache;
use carscout_store::risk::RiskEvaluation;
use carscout_store::scores::Score;
use carscout_store::{Job, Queue};

use crate::deps::PipelineDeps;
use crate::stages::StageOutcome;

/// Everything the score formula consumes, separated from storage so the
/// arithmetic is trivially testable.
#[derive(Debug, Clone)]
pub struct ScoreInputs {
    pub discount_pct: Option<f64>,
    pub confidence: f64,
    pub sample_size: i64,
    pub risk_level: RiskLevel,
    pub hard_accident_flag: bool,
    pub age_hours: f64,
}

#[derive(Debug, Clone)]
pub struct ScoreBreakdown {
    pub price_score: f64,
    pub risk_penalty: f64,
    pub freshness: f64,
    pub liquidity: f64,
    pub score: f64,
}

/// Gate thresholds, from configuration.
#[derive(Debug, Clone, Copy)]
pub struct ApprovalGate {
    pub score_threshold: f64,
    pub sample_threshold: i64,
    pub confidence_threshold: f64,
}

/// Price ∈ [0,5] linear in discount up to 25%, scaled by confidence;
/// risk ∈ [−4,0] with an extra −1 for a hard accident flag;
/// freshness ∈ [0,0.5] decaying over 24h; liquidity ∈ [0,1] from sample.
pub fn compute_score(inputs: &ScoreInputs) -> ScoreBreakdown {
    let discount = inputs.discount_pct.unwrap_or(0.0);
    let price_raw = (discount / 0.25).clamp(0.0, 1.0) * 5.0;
    let price_score = price_raw * inputs.confidence.clamp(0.0, 1.0);

    let mut risk_penalty = match inputs.risk_level {
        RiskLevel::Green => 0.0,
        RiskLevel::Yellow => -2.0,
        RiskLevel::Red => -4.0,
    };
    if inputs.hard_accident_flag {
        risk_penalty -= 1.0;
    }

    let freshness = if inputs.age_hours <= 1.0 {
        0.5
    } else if inputs.age_hours >= 24.0 {
        0.0
    } else {
        0.5 * (24.0 - inputs.age_hours) / 23.0
    };

    let liquidity = (inputs.sample_size as f64 / 60.0).min(1.0).max(0.0);

    let score = (1.0 + price_score + risk_penalty + freshness + liquidity).clamp(1.0, 10.0);

    ScoreBreakdown { price_score, risk_penalty, freshness, liquidity, score }
}

/// All gates must hold, inclusively, and red is never approved.
pub fn approve(breakdown: &ScoreBreakdown, inputs: &ScoreInputs, gate: &ApprovalGate) -> ScoreState {
    let approved = breakdown.score >= gate.score_threshold
        && inputs.sample_size >= gate.sample_threshold
        && inputs.confidence >= gate.confidence_threshold
        && inputs.risk_level != RiskLevel::Red;
    if approved {
        ScoreState::Approved
    } else {
        ScoreState::Rejected
    }
}

pub async fn run(job: &Job, deps: &PipelineDeps) -> Result<StageOutcome> {
    let listing = Listing::find_by_id(job.listing_id, deps.pool()).await?;
    let comps = CompCache::find(listing.id, deps.pool()).await?;
    let Some(risk) = RiskEvaluation::find(listing.id, deps.pool()).await? else {
        return Ok(StageOutcome::Retry("risk evaluation not yet persisted".into()));
    };

    let first_seen = Listing::first_seen(listing.id, deps.pool()).await?;
    let risk_level = RiskLevel::parse_str(&risk.risk_level).unwrap_or(RiskLevel::Red);

    let inputs = ScoreInputs {
        discount_pct: comps.as_ref().and_then(|c| c.discount_pct),
        confidence: comps.as_ref().map(|c| c.confidence).unwrap_or(0.0),
        sample_size: comps.as_ref().map(|c| c.sample_size as i64).unwrap_or(0),
        risk_level,
        hard_accident_flag: risk
            .flags
            .get("categories")
            .and_then(|c| c.get("accident"))
            .is_some(),
        age_hours: age_hours(first_seen, Utc::now()),
    };

    let breakdown = compute_score(&inputs);
    let gate = ApprovalGate {
        score_threshold: deps.config.score_threshold,
        sample_threshold: deps.config.sample_threshold,
        confidence_threshold: deps.config.confidence_threshold,
    };
    let state = approve(&breakdown, &inputs, &gate);

    let reasons = reasons_json(&breakdown, &inputs, &gate, state);
    let score = Score {
        listing_id: listing.id,
        score: breakdown.score,
        price_score: breakdown.price_score,
        risk_penalty: breakdown.risk_penalty,
        freshness: breakdown.freshness,
        liquidity: breakdown.liquidity,
        reasons,
        state: state.as_str().to_string(),
        scored_at: Utc::now(),
    };

    let mut tx = deps.pool().begin().await?;
    score.upsert(&mut tx).await?;
    if state == ScoreState::Approved {
        let idem = format!("v{}", listing.version);
        Queue::enqueue_in(&mut tx, Stage::Channel, listing.id, &idem, Duration::ZERO).await?;
        Queue::enqueue_in(&mut tx, Stage::AlertMatch, listing.id, &idem, Duration::ZERO).await?;
    }
    tx.commit().await?;

    info!(
        listing_id = %listing.id,
        score = breakdown.score,
        state = %state,
        "Scored listing"
    );
    Ok(StageOutcome::Done)
}

fn age_hours(first_seen: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - first_seen).num_seconds().max(0) as f64 / 3600.0
}

/// Persist the contributing components and the decisive thresholds, so a
/// score can be explained months later.
fn reasons_json(
    breakdown: &ScoreBreakdown,
    inputs: &ScoreInputs,
    gate: &ApprovalGate,
    state: ScoreState,
) -> serde_json::Value {
    let mut notes: Vec<String> = Vec::new();
    if let Some(discount) = inputs.discount_pct {
        if discount >= 0.15 {
            notes.push(format!("Отлична цена ({:.1}% под пазара)", discount * 100.0));
        } else if discount >= 0.10 {
            notes.push(format!("Добра цена ({:.1}% под пазара)", discount * 100.0));
        }
    }
    match inputs.risk_level {
        RiskLevel::Green => notes.push("Няма рискови индикатори".to_string()),
        RiskLevel::Yellow => notes.push("Смесени рискови индикатори".to_string()),
        RiskLevel::Red => notes.push("⚠️ Висок риск".to_string()),
    }
    if inputs.sample_size < gate.sample_threshold {
        notes.push(format!("Малко сравними обяви ({})", inputs.sample_size));
    }
    if inputs.confidence < gate.confidence_threshold {
        notes.push("Несигурна ценова оценка".to_string());
    }

    serde_json::json!({
        "components": {
            "price_score": breakdown.price_score,
            "risk_penalty": breakdown.risk_penalty,
            "freshness": breakdown.freshness,
            "liquidity": breakdown.liquidity,
        },
        "gates": {
            "score_threshold": gate.score_threshold,
            "sample_threshold": gate.sample_threshold,
            "confidence_threshold": gate.confidence_threshold,
            "sample_size": inputs.sample_size,
            "confidence": inputs.confidence,
            "risk_level": inputs.risk_level.as_str(),
        },
        "state": state.as_str(),
        "notes": notes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_inputs() -> ScoreInputs {
        ScoreInputs {
            discount_pct: Some(0.109),
            confidence: 0.8,
            sample_size: 40,
            risk_level: RiskLevel::Green,
            hard_accident_flag: false,
            age_hours: 12.0,
        }
    }

    fn gate() -> ApprovalGate {
        ApprovalGate { score_threshold: 7.5, sample_threshold: 30, confidence_threshold: 0.6 }
    }

    #[test]
    fn modest_discount_scores_below_threshold() {
        // ~11% discount, green, 40 comparables: a decent deal, not a
        // channel-worthy one.
        let inputs = base_inputs();
        let b = compute_score(&inputs);
        assert!((b.price_score - 0.109 / 0.25 * 5.0 * 0.8).abs() < 1e-9);
        assert!(b.score < 7.5);
        assert_eq!(approve(&b, &inputs, &gate()), ScoreState::Rejected);
    }

    #[test]
    fn deep_discount_fresh_listing_is_approved() {
        // A ≥25% discount with full confidence, a deep comparable pool and
        // sub-hour freshness is the ceiling case: every component maxes out
        // and the gate opens exactly at the threshold.
        let inputs = ScoreInputs {
            discount_pct: Some(0.28),
            confidence: 1.0,
            sample_size: 60,
            risk_level: RiskLevel::Green,
            hard_accident_flag: false,
            age_hours: 5.0 / 60.0,
        };
        let b = compute_score(&inputs);
        assert!((b.price_score - 5.0).abs() < 1e-9);
        assert!((b.freshness - 0.5).abs() < 1e-9);
        assert!((b.liquidity - 1.0).abs() < 1e-9);
        assert!((b.score - 7.5).abs() < 1e-9);
        assert_eq!(approve(&b, &inputs, &gate()), ScoreState::Approved);
    }

    #[test]
    fn red_risk_is_never_approved() {
        let inputs = ScoreInputs {
            discount_pct: Some(0.30),
            confidence: 1.0,
            sample_size: 100,
            risk_level: RiskLevel::Red,
            hard_accident_flag: true,
            age_hours: 0.5,
        };
        let b = compute_score(&inputs);
        assert!((b.risk_penalty - (-5.0)).abs() < 1e-9);
        assert_eq!(approve(&b, &inputs, &gate()), ScoreState::Rejected);
    }

    #[test]
    fn score_is_monotone_in_discount() {
        // P6: a worse deal never scores higher, all else equal.
        let mut previous = f64::MAX;
        for discount in [0.30, 0.25, 0.20, 0.10, 0.05, 0.0, -0.10] {
            let inputs = ScoreInputs { discount_pct: Some(discount), ..base_inputs() };
            let b = compute_score(&inputs);
            assert!(b.score <= previous, "discount {discount} raised the score");
            previous = b.score;
        }
    }

    #[test]
    fn freshness_decays_linearly_to_zero() {
        let at = |age_hours: f64| {
            compute_score(&ScoreInputs { age_hours, ..base_inputs() }).freshness
        };
        assert!((at(0.5) - 0.5).abs() < 1e-9);
        assert!(at(6.0) < 0.5 && at(6.0) > 0.0);
        assert_eq!(at(24.0), 0.0);
        assert_eq!(at(48.0), 0.0);
    }

    #[test]
    fn zero_discount_zeroes_the_price_component() {
        let inputs = ScoreInputs { discount_pct: Some(0.0), ..base_inputs() };
        assert_eq!(compute_score(&inputs).price_score, 0.0);
        let inputs = ScoreInputs { discount_pct: Some(-0.2), ..base_inputs() };
        assert_eq!(compute_score(&inputs).price_score, 0.0);
    }

    #[test]
    fn gates_are_inclusive_at_thresholds() {
        // score exactly 7.5, sample exactly 30, confidence exactly 0.6.
        let inputs = ScoreInputs {
            discount_pct: Some(0.25),
            confidence: 0.6,
            sample_size: 30,
            risk_level: RiskLevel::Green,
            hard_accident_flag: false,
            age_hours: 0.5,
        };
        let mut b = compute_score(&inputs);
        b.score = 7.5;
        assert_eq!(approve(&b, &inputs, &gate()), ScoreState::Approved);
    }
}
