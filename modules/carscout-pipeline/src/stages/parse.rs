//! Parse: raw blob → field draft.
//!
//! The job's listing id is the *raw* listing id; the draft row this stage
//! writes is where the pipeline's listing id is born.

use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use carscout_common::phone;
use carscout_common::Stage;
use carscout_store::listings::{Listing, RawListing};
use carscout_store::sources::Source;
use carscout_store::{Job, Queue};

use crate::deps::PipelineDeps;
use crate::extract::ExtractorRegistry;
use crate::stages::StageOutcome;

pub async fn run(job: &Job, deps: &PipelineDeps) -> Result<StageOutcome> {
    let raw = RawListing::find_by_id(job.listing_id, deps.pool()).await?;
    if !raw.is_active {
        return Ok(StageOutcome::Skip("raw listing inactive".into()));
    }
    let Some(blob_key) = raw.raw_blob_key.as_deref() else {
        // Draft rows without content are terminal until a newer scrape
        // produces a blob. Do not infer content.
        return Ok(StageOutcome::Skip("no raw blob".into()));
    };

    let blob = match deps.blobs.get(blob_key).await {
        Ok(bytes) => bytes,
        Err(e) => return Ok(StageOutcome::Retry(format!("blob fetch failed: {e}"))),
    };

    let source = Source::find_by_id(raw.source_id, deps.pool()).await?;
    let registry = ExtractorRegistry::standard();
    let Some(extractor) = registry.get(&source.name) else {
        return Ok(StageOutcome::DeadLetter(format!("no extractor for source {}", source.name)));
    };

    let draft = match extractor.extract(&blob) {
        Ok(draft) => draft,
        Err(e) => {
            warn!(raw_id = %raw.id, error = %e, "Parse failed");
            let deactivated = RawListing::record_parse_error(raw.id, deps.pool()).await?;
            return Ok(if deactivated {
                StageOutcome::Skip("deactivated after repeated parse errors".into())
            } else {
                StageOutcome::Skip(format!("parse error: {e}"))
            });
        }
    };

    let phone_hash = draft
        .seller_phone
        .as_deref()
        .and_then(|p| phone::phone_hash(p, &deps.config.phone_hash_salt));

    let mut tx = deps.pool().begin().await?;
    let listing_id =
        Listing::upsert_draft(&mut tx, raw.id, raw.version, &draft, phone_hash.as_deref()).await?;
    Queue::enqueue_in(
        &mut tx,
        Stage::Normalize,
        listing_id,
        &format!("v{}", raw.version),
        Duration::ZERO,
    )
    .await?;
    tx.commit().await?;

    RawListing::clear_parse_errors(raw.id, deps.pool()).await?;
    info!(raw_id = %raw.id, listing_id = %listing_id, version = raw.version, "Parsed listing");
    Ok(StageOutcome::Done)
}
