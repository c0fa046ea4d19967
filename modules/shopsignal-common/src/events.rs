//! Crawl lifecycle events: the contract between the crawl core and
//! downstream per-page stages.
//!
//! Delivered over an explicit channel rather than an in-process observer
//! registry, so consumers (screenshot, analysis, embedding, attribute
//! extraction) can live on separate work queues.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CrawlEvent {
    /// A page was fetched and its graph state persisted. Downstream stages
    /// may now claim it; `was_rendered` lets consumers skip re-rendering
    /// content that already went through the headless browser.
    ContentReady {
        page_id: Uuid,
        raw_content_ref: String,
        was_rendered: bool,
        discovered_links: Vec<String>,
    },
}
