//! The nine-stage listing pipeline.
//!
//! Each stage is a function `(listing_id) → outcome` pulled off a typed
//! durable queue; no hidden control flow. Stage side effects and the
//! next-stage enqueue commit in one transaction.

pub mod adapters;
pub mod alert_dsl;
pub mod alias;
pub mod blob;
pub mod deps;
pub mod extract;
pub mod format;
pub mod risk;
pub mod scheduler;
pub mod stages;
pub mod testing;
pub mod worker;

pub use deps::PipelineDeps;
pub use stages::StageOutcome;
