use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RiskEvaluation {
    pub listing_id: Uuid,
    pub flags: serde_json::Value,
    pub risk_level: String,
    pub rule_confidence: f64,
    pub llm_summary: Option<String>,
    pub llm_reasons: serde_json::Value,
    pub llm_confidence: Option<f64>,
    pub llm_unavailable: bool,
    pub keywords_version: String,
    pub evaluated_at: DateTime<Utc>,
}

impl RiskEvaluation {
    pub async fn find(listing_id: Uuid, pool: &PgPool) -> Result<Option<RiskEvaluation>> {
        let row = sqlx::query_as::<_, RiskEvaluation>(
            "SELECT listing_id, flags, risk_level, rule_confidence, llm_summary, llm_reasons,
                    llm_confidence, llm_unavailable, keywords_version, evaluated_at
             FROM risk_evaluations WHERE listing_id = $1",
        )
        .bind(listing_id)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    pub async fn upsert(&self, tx: &mut Transaction<'_, Postgres>) -> Result<()> {
        sqlx::query(
            "INSERT INTO risk_evaluations
                 (listing_id, flags, risk_level, rule_confidence, llm_summary, llm_reasons,
                  llm_confidence, llm_unavailable, keywords_version, evaluated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now())
             ON CONFLICT (listing_id) DO UPDATE SET
                 flags = EXCLUDED.flags, risk_level = EXCLUDED.risk_level,
                 rule_confidence = EXCLUDED.rule_confidence,
                 llm_summary = EXCLUDED.llm_summary, llm_reasons = EXCLUDED.llm_reasons,
                 llm_confidence = EXCLUDED.llm_confidence,
                 llm_unavailable = EXCLUDED.llm_unavailable,
                 keywords_version = EXCLUDED.keywords_version, evaluated_at = now()",
        )
        .bind(self.listing_id)
        .bind(&self.flags)
        .bind(&self.risk_level)
        .bind(self.rule_confidence)
        .bind(&self.llm_summary)
        .bind(&self.llm_reasons)
        .bind(self.llm_confidence)
        .bind(self.llm_unavailable)
        .bind(&self.keywords_version)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}
