//! Postgres persistence for the listing pipeline.
//!
//! The database is the single source of truth: entity state, the durable
//! typed job queue, rate-limit buckets, and the LLM response cache all live
//! here. Every stage commits its side effects and the next-stage enqueue in
//! one transaction so crashes never drop work.

pub mod alerts;
pub mod brand_models;
pub mod channel;
pub mod dedupe;
pub mod fx;
pub mod images;
pub mod listings;
pub mod llm_cache;
pub mod migrate;
pub mod pricing;
pub mod queue;
pub mod rate_limit;
pub mod risk;
pub mod scores;
pub mod sellers;
pub mod sources;
pub mod users;

pub use migrate::migrate;
pub use queue::{Job, Queue};

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Connect a pool sized for worker fanout. Statements are prepared and
/// cached by sqlx; no long-held transactions anywhere in this crate.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}
