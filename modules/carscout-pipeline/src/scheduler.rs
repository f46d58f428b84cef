//! The scrape scheduler: ticks every enabled source on its crawl interval.
//! Ticks are idempotent by `(source_id, tick_bucket)`, so replays and
//! concurrent scheduler processes are harmless.

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use carscout_common::{text, Stage};
use carscout_store::listings::{Listing, RawListing};
use carscout_store::sources::Source;

use crate::adapters::CrawlBudget;
use crate::deps::PipelineDeps;

const LOOP_SLEEP: Duration = Duration::from_secs(30);
/// Listings unseen this long are deactivated by maintenance.
const STALE_DAYS: i64 = 30;
/// Ready-message depth at which scraping pauses to let workers catch up.
/// Dedupe and price are the usual hotspots.
const BACKPRESSURE_MAX_DEPTH: i64 = 5_000;

pub struct Scheduler {
    deps: PipelineDeps,
}

impl Scheduler {
    pub fn new(deps: PipelineDeps) -> Self {
        Self { deps }
    }

    /// Run forever: scrape ticks plus hourly maintenance.
    pub async fn run(self) -> Result<()> {
        let mut last_maintenance = Utc::now() - chrono::Duration::hours(2);
        loop {
            if let Err(e) = self.tick().await {
                warn!(error = %e, "Scheduler tick failed");
            }

            if Utc::now() - last_maintenance > chrono::Duration::hours(1) {
                if let Err(e) = self.maintenance().await {
                    warn!(error = %e, "Maintenance pass failed");
                }
                last_maintenance = Utc::now();
            }

            tokio::time::sleep(LOOP_SLEEP).await;
        }
    }

    /// One pass: claim due ticks and scrape the claimed sources.
    pub async fn tick(&self) -> Result<()> {
        // Backpressure: when downstream stages lag, stop producing. Unclaimed
        // ticks are simply skipped; the next due bucket picks scraping back up.
        for stage in [Stage::Parse, Stage::Dedupe, Stage::Price] {
            let depth = self.deps.queue.depth(stage).await?;
            if depth > BACKPRESSURE_MAX_DEPTH {
                warn!(%stage, depth, "Downstream stage lagging, skipping scrape tick");
                return Ok(());
            }
        }

        let sources = Source::find_schedulable(self.deps.pool()).await?;
        let now = Utc::now().timestamp();

        let mut due = Vec::new();
        for source in sources {
            let interval = source.crawl_interval_s.max(1) as i64;
            let bucket = now / interval;
            if Source::claim_tick(source.id, bucket, self.deps.pool()).await? {
                due.push(source);
            }
        }
        if due.is_empty() {
            return Ok(());
        }

        info!(sources = due.len(), "Scrape tick");
        stream::iter(due)
            .for_each_concurrent(self.deps.config.per_source_concurrency, |source| async move {
                match self.scrape_source(&source).await {
                    Ok(records) => {
                        let _ = Source::note_outcome(source.id, true, self.deps.pool()).await;
                        info!(source = %source.name, records, "Source scraped");
                    }
                    Err(e) => {
                        warn!(source = %source.name, error = %e, "Source scrape failed");
                        let _ = Source::note_outcome(source.id, false, self.deps.pool()).await;
                    }
                }
            })
            .await;

        Ok(())
    }

    /// Pull recent pages from one source's adapter and upsert observations.
    async fn scrape_source(&self, source: &Source) -> Result<usize> {
        let Some(adapter) = self.deps.adapters.get(&source.name) else {
            anyhow::bail!("no adapter registered for source {}", source.name);
        };
        let budget = CrawlBudget::default();

        let mut cursor: Option<String> = None;
        let mut total = 0usize;
        for _ in 0..budget.max_pages {
            let page = adapter
                .list_recent(cursor.as_deref())
                .await
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;

            for record in &page.records {
                self.observe(source, record).await?;
                total += 1;
            }

            match page.next_cursor {
                Some(next) if !page.records.is_empty() => cursor = Some(next),
                _ => break,
            }
            tokio::time::sleep(Duration::from_millis(budget.delay_ms)).await;
        }
        Ok(total)
    }

    async fn observe(&self, source: &Source, record: &crate::adapters::SourceRecord) -> Result<()> {
        let mut hasher = Sha256::new();
        hasher.update(&record.raw_blob);
        let content_hash = text::hex_encode(&hasher.finalize());

        let blob_key = format!(
            "{}/{}-{}.json",
            source.id,
            record.site_ad_id,
            &content_hash[..12]
        );
        self.deps.blobs.put(&blob_key, &record.raw_blob).await?;

        let observation = RawListing::upsert_observation(
            source.id,
            &record.site_ad_id,
            &record.url,
            &blob_key,
            &content_hash,
            record.http_status,
            record.etag.as_deref(),
            record.last_modified.as_deref(),
            self.deps.pool(),
        )
        .await?;

        // Unchanged content re-observed: nothing to parse again.
        if observation.content_changed {
            self.deps
                .queue
                .enqueue(
                    Stage::Parse,
                    observation.raw_id,
                    &format!("v{}", observation.version),
                )
                .await?;
        }
        Ok(())
    }

    /// Housekeeping: deactivate unseen listings and revisit drafts that
    /// were parked for lack of an alias mapping.
    async fn maintenance(&self) -> Result<()> {
        let stale = RawListing::deactivate_stale(STALE_DAYS, self.deps.pool()).await?;
        if stale > 0 {
            info!(stale, "Deactivated stale listings");
        }

        self.deps.reload_aliases().await?;
        let drafts = Listing::find_unmapped_drafts(500, self.deps.pool()).await?;
        let day = Utc::now().date_naive();
        for listing_id in drafts {
            self.deps
                .queue
                .enqueue(Stage::Normalize, listing_id, &format!("remap-{day}"))
                .await?;
        }
        Ok(())
    }
}
