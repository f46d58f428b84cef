//! Stage implementations. Each is `(job) → outcome`; the worker maps the
//! outcome onto the queue (complete / backoff / dead-letter / defer).

pub mod alert_match;
pub mod channel;
pub mod dedupe;
pub mod normalize;
pub mod parse;
pub mod price;
pub mod risk;
pub mod score;
pub mod user_notify;

use std::time::Duration;

use anyhow::Result;

use carscout_common::Stage;
use carscout_store::Job;

use crate::deps::PipelineDeps;

/// What the queue should do with the task. Mirrors the error taxonomy:
/// input errors skip, transient errors retry, exhaustion defers.
#[derive(Debug)]
pub enum StageOutcome {
    Done,
    /// Transient failure — retry with backoff, eventually dead-letter.
    Retry(String),
    /// Unrecoverable for this task — park it and alert.
    DeadLetter(String),
    /// Terminal no-op for this listing (input error, gate not met).
    Skip(String),
    /// Not ready yet (rate limit, plan delay) — requeue without burning an
    /// attempt.
    Defer(Duration),
}

/// Route a claimed job to its stage function.
pub async fn dispatch(job: &Job, deps: &PipelineDeps) -> Result<StageOutcome> {
    let Some(stage) = job.stage() else {
        return Ok(StageOutcome::DeadLetter(format!("unknown stage {}", job.stage)));
    };
    match stage {
        Stage::Parse => parse::run(job, deps).await,
        Stage::Normalize => normalize::run(job, deps).await,
        Stage::Dedupe => dedupe::run(job, deps).await,
        Stage::Price => price::run(job, deps).await,
        Stage::Risk => risk::run(job, deps).await,
        Stage::Score => score::run(job, deps).await,
        Stage::Channel => channel::run(job, deps).await,
        Stage::AlertMatch => alert_match::run(job, deps).await,
        Stage::UserNotify => user_notify::run(job, deps).await,
    }
}
