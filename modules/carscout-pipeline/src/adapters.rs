//! Scrape adapter contract.
//!
//! Site-specific extractors live outside the core; an adapter is anything
//! that can page through recent ads and fetch one ad's raw record. Adapters
//! must respect their per-source concurrency and delay budgets and surface
//! conditional-request metadata so the scheduler can skip unchanged pages.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use carscout_common::CarScoutError;

pub type AdapterResult<T> = std::result::Result<T, CarScoutError>;

/// One observed ad, as the core sees it. The blob behind `raw_blob` is
/// opaque here; the parse stage hands it to the source's field extractor.
#[derive(Debug, Clone)]
pub struct SourceRecord {
    pub site_ad_id: String,
    pub url: String,
    pub raw_blob: Vec<u8>,
    pub http_status: i32,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub observed_at: DateTime<Utc>,
}

/// A page of records plus the cursor for the next page, if any.
#[derive(Debug, Clone, Default)]
pub struct RecordPage {
    pub records: Vec<SourceRecord>,
    pub next_cursor: Option<String>,
}

/// Per-source crawl budget the adapter must obey.
#[derive(Debug, Clone)]
pub struct CrawlBudget {
    pub concurrency: usize,
    pub delay_ms: u64,
    pub max_pages: usize,
}

impl Default for CrawlBudget {
    fn default() -> Self {
        Self { concurrency: 2, delay_ms: 1_000, max_pages: 5 }
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// List recently published or updated ads, newest first.
    async fn list_recent(&self, cursor: Option<&str>) -> AdapterResult<RecordPage>;

    /// Fetch one ad's full raw record.
    async fn fetch_detail(&self, url: &str) -> AdapterResult<Vec<u8>>;

    /// Adapter name, matching `sources.name` (selects the field extractor).
    fn name(&self) -> &str;
}

/// Registry mapping source names to adapter instances.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, std::sync::Arc<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: std::sync::Arc<dyn SourceAdapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    pub fn get(&self, name: &str) -> Option<std::sync::Arc<dyn SourceAdapter>> {
        self.adapters.get(name).cloned()
    }
}
