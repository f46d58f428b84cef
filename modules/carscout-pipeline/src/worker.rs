//! Queue consumers: one worker loop per stage, each processing claims
//! concurrently up to the configured fanout, under a wall-clock deadline.

use std::time::Duration;

use anyhow::Result;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use carscout_common::Stage;
use carscout_store::Job;

use crate::deps::PipelineDeps;
use crate::stages::{self, StageOutcome};

const IDLE_SLEEP: Duration = Duration::from_millis(1_000);

pub const ALL_STAGES: &[Stage] = &[
    Stage::Parse,
    Stage::Normalize,
    Stage::Dedupe,
    Stage::Price,
    Stage::Risk,
    Stage::Score,
    Stage::Channel,
    Stage::AlertMatch,
    Stage::UserNotify,
];

/// Run one stage's consumer loop forever.
pub async fn run_stage(deps: PipelineDeps, stage: Stage) -> Result<()> {
    let worker_id = format!("{}-{}", stage, Uuid::new_v4());
    let fanout = deps.config.worker_fanout;
    info!(%stage, worker_id, fanout, "Stage worker starting");

    loop {
        let jobs = deps.queue.claim(&worker_id, stage, fanout as i64).await?;
        if jobs.is_empty() {
            tokio::time::sleep(IDLE_SLEEP).await;
            continue;
        }

        stream::iter(jobs)
            .for_each_concurrent(fanout, |job| {
                let deps = deps.clone();
                async move {
                    process(&job, &deps).await;
                }
            })
            .await;
    }
}

/// Spawn every stage's worker plus nothing else; callers own the join.
pub fn spawn_all(deps: &PipelineDeps) -> Vec<tokio::task::JoinHandle<Result<()>>> {
    ALL_STAGES
        .iter()
        .map(|stage| {
            let deps = deps.clone();
            let stage = *stage;
            tokio::spawn(async move { run_stage(deps, stage).await })
        })
        .collect()
}

async fn process(job: &Job, deps: &PipelineDeps) {
    let deadline = match job.stage() {
        Some(Stage::Risk) => {
            // The risk stage owns a separate LLM budget on top of its own.
            Duration::from_secs(deps.config.stage_deadline_secs + deps.config.llm_deadline_secs)
        }
        _ => Duration::from_secs(deps.config.stage_deadline_secs),
    };

    let outcome = match tokio::time::timeout(deadline, stages::dispatch(job, deps)).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => StageOutcome::Retry(e.to_string()),
        Err(_) => StageOutcome::Retry(format!("stage deadline {deadline:?} exceeded")),
    };

    let result = match outcome {
        StageOutcome::Done => deps.queue.complete(job).await,
        StageOutcome::Skip(reason) => {
            debug!(stage = %job.stage, listing_id = %job.listing_id, reason, "Task skipped");
            deps.queue.complete(job).await
        }
        StageOutcome::Retry(error) => {
            debug!(stage = %job.stage, listing_id = %job.listing_id, error, "Task will retry");
            deps.queue.retry(job, &error).await
        }
        StageOutcome::DeadLetter(error) => deps.queue.dead_letter(job, &error).await,
        StageOutcome::Defer(delay) => deps.queue.defer(job, delay).await,
    };

    if let Err(e) = result {
        warn!(stage = %job.stage, listing_id = %job.listing_id, error = %e, "Queue bookkeeping failed");
    }
}
