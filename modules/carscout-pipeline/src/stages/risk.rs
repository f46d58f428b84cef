//! Risk: keyword rules first, cached LLM escalation only when the rules
//! are uncertain. The external service can fail without blocking anything.

use std::time::Duration;

use anyhow::Result;
use rust_decimal::prelude::ToPrimitive;
use tracing::{info, warn};

use carscout_common::{text, Stage};
use carscout_store::listings::Listing;
use carscout_store::llm_cache::LlmCache;
use carscout_store::pricing::CompCache;
use carscout_store::risk::RiskEvaluation;
use carscout_store::{Job, Queue};

use crate::deps::PipelineDeps;
use crate::risk::{classify, RiskPrompt, RiskVerdict, KEYWORDS_VERSION, PROMPT_VERSION};
use crate::stages::StageOutcome;

pub async fn run(job: &Job, deps: &PipelineDeps) -> Result<StageOutcome> {
    let listing = Listing::find_by_id(job.listing_id, deps.pool()).await?;
    let title = listing.title.as_deref().unwrap_or_default();
    let description = listing.description.as_deref().unwrap_or_default();

    let rule = classify(title, description);

    let mut risk_level = rule.risk_level;
    let mut llm_summary = None;
    let mut llm_reasons = serde_json::json!([]);
    let mut llm_confidence = None;
    let mut llm_unavailable = false;

    if rule.needs_llm {
        match escalate(&listing, &rule, deps).await {
            Ok(Some(verdict)) => {
                // The model's view wins only when it is more certain than
                // the rules were.
                if verdict.confidence > rule.rule_confidence {
                    risk_level = verdict.risk_level;
                }
                llm_summary = Some(verdict.summary);
                llm_reasons = serde_json::json!(verdict.reasons);
                llm_confidence = Some(verdict.confidence);
            }
            Ok(None) => {
                llm_unavailable = true;
            }
            Err(e) => {
                warn!(listing_id = %listing.id, error = %e, "LLM escalation failed, using rule result");
                llm_unavailable = true;
            }
        }
    }

    let evaluation = RiskEvaluation {
        listing_id: listing.id,
        flags: rule.flags_json(),
        risk_level: risk_level.as_str().to_string(),
        rule_confidence: rule.rule_confidence,
        llm_summary,
        llm_reasons,
        llm_confidence,
        llm_unavailable,
        keywords_version: KEYWORDS_VERSION.to_string(),
        evaluated_at: chrono::Utc::now(),
    };

    let mut tx = deps.pool().begin().await?;
    evaluation.upsert(&mut tx).await?;
    Queue::enqueue_in(
        &mut tx,
        Stage::Score,
        listing.id,
        &format!("v{}", listing.version),
        Duration::ZERO,
    )
    .await?;
    tx.commit().await?;

    info!(listing_id = %listing.id, risk = %risk_level, llm_unavailable, "Risk evaluated");
    Ok(StageOutcome::Done)
}

/// Cached escalation. Returns Ok(None) when no LLM is configured or the
/// call timed out — the caller falls back to the rule result.
async fn escalate(
    listing: &Listing,
    rule: &crate::risk::RuleOutcome,
    deps: &PipelineDeps,
) -> Result<Option<RiskVerdict>> {
    let Some(llm) = deps.llm.as_ref() else {
        return Ok(None);
    };

    let description = listing.description.as_deref().unwrap_or_default();
    let input_hash = listing
        .description_hash
        .clone()
        .unwrap_or_else(|| text::description_hash(description));

    if let Some(cached) = LlmCache::get(&input_hash, PROMPT_VERSION, deps.pool()).await? {
        let verdict: RiskVerdict = serde_json::from_value(cached.output)?;
        return Ok(Some(verdict));
    }

    let comps = CompCache::find(listing.id, deps.pool()).await?;
    let features = listing
        .features
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    let prompt = RiskPrompt {
        title: listing.title.clone().unwrap_or_default(),
        description: description.to_string(),
        features,
        price_bgn: listing.price_bgn.and_then(|p| p.to_f64()),
        predicted_price_bgn: comps
            .as_ref()
            .and_then(|c| c.predicted_price)
            .and_then(|p| p.to_f64()),
        discount_pct: comps.as_ref().and_then(|c| c.discount_pct),
        red_flag_count: rule.flags.values().map(Vec::len).sum(),
        positive_flag_count: rule.positive.len(),
    };

    let deadline = Duration::from_secs(deps.config.llm_deadline_secs);
    let verdict = match tokio::time::timeout(deadline, llm.evaluate(&prompt)).await {
        Ok(Ok(verdict)) => verdict,
        Ok(Err(e)) => {
            warn!(listing_id = %listing.id, error = %e, "LLM call failed");
            return Ok(None);
        }
        Err(_) => {
            warn!(listing_id = %listing.id, "LLM call timed out");
            return Ok(None);
        }
    };

    LlmCache::set(
        &input_hash,
        PROMPT_VERSION,
        &serde_json::to_value(&verdict)?,
        None,
        deps.pool(),
    )
    .await?;

    Ok(Some(verdict))
}
