//! Downstream per-page stage dispatch.
//!
//! Consumes content-ready events and runs each registered stage processor at
//! most once per page in the common case: skip already-stamped stages, claim
//! the per-stage lock, process, stamp the completion timestamp, release. A
//! lock-store outage degrades to "no mutual exclusion"; it never blocks a
//! stage from attempting work, so processors must stay idempotent.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use browserless_client::BrowserlessClient;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use shopsignal_common::{CrawlEvent, Page, Stage};
use shopsignal_store::PageStore;

use crate::locks::PageLockService;
use crate::raw_store::RawContentStore;

/// One downstream stage implementation. AI analysis, embedding generation,
/// and attribute extraction plug in here from their own services; this crate
/// only ships the screenshot stage.
#[async_trait]
pub trait StageProcessor: Send + Sync {
    fn stage(&self) -> Stage;
    async fn process(&self, page: &Page, raw_content_ref: &str, was_rendered: bool) -> Result<()>;
}

pub struct StageWorker {
    store: Arc<dyn PageStore>,
    locks: PageLockService,
    processors: Vec<Arc<dyn StageProcessor>>,
}

impl StageWorker {
    pub fn new(
        store: Arc<dyn PageStore>,
        locks: PageLockService,
        processors: Vec<Arc<dyn StageProcessor>>,
    ) -> Self {
        Self {
            store,
            locks,
            processors,
        }
    }

    /// Drain content-ready events until every sender is gone.
    pub async fn run(&self, mut rx: mpsc::UnboundedReceiver<CrawlEvent>) {
        while let Some(event) = rx.recv().await {
            let CrawlEvent::ContentReady {
                page_id,
                raw_content_ref,
                was_rendered,
                ..
            } = event;
            if let Err(e) = self.handle_page(page_id, &raw_content_ref, was_rendered).await {
                warn!(%page_id, error = %e, "Stage dispatch failed for page");
            }
        }
    }

    pub async fn handle_page(
        &self,
        page_id: Uuid,
        raw_content_ref: &str,
        was_rendered: bool,
    ) -> Result<()> {
        let page = self
            .store
            .get_page(page_id)
            .await?
            .ok_or_else(|| anyhow!("unknown page {page_id}"))?;

        for processor in &self.processors {
            let stage = processor.stage();
            if stage_completed_at(&page, stage).is_some() {
                continue;
            }

            let acquired = match self.locks.acquire(page_id, stage).await {
                Ok(acquired) => acquired,
                Err(e) => {
                    // Fail open: the cache-tier being down must not stop work.
                    warn!(%page_id, %stage, error = %e,
                        "Lock store unavailable, proceeding without mutual exclusion");
                    true
                }
            };
            if !acquired {
                debug!(%page_id, %stage, "Stage held by another worker, skipping");
                continue;
            }

            match processor.process(&page, raw_content_ref, was_rendered).await {
                Ok(()) => {
                    self.store
                        .set_stage_completed(page_id, stage, Utc::now())
                        .await?;
                }
                Err(e) => warn!(%page_id, %stage, error = %e, "Stage processing failed"),
            }

            if let Err(e) = self.locks.release(page_id, stage).await {
                warn!(%page_id, %stage, error = %e, "Failed to release stage lock, will expire");
            }
        }

        Ok(())
    }
}

fn stage_completed_at(page: &Page, stage: Stage) -> Option<DateTime<Utc>> {
    match stage {
        Stage::Screenshot => page.screenshot_at,
        Stage::Analysis => page.analyzed_at,
        Stage::Embedding => page.embedded_at,
        Stage::Attributes => page.attributes_at,
    }
}

// --- Screenshot stage ---

/// Captures a full-page screenshot through Browserless and spools the bytes
/// next to the page's raw HTML.
pub struct ScreenshotProcessor {
    browserless: Arc<BrowserlessClient>,
    raw_store: Arc<dyn RawContentStore>,
}

impl ScreenshotProcessor {
    pub fn new(browserless: Arc<BrowserlessClient>, raw_store: Arc<dyn RawContentStore>) -> Self {
        Self {
            browserless,
            raw_store,
        }
    }
}

#[async_trait]
impl StageProcessor for ScreenshotProcessor {
    fn stage(&self) -> Stage {
        Stage::Screenshot
    }

    async fn process(&self, page: &Page, _raw_content_ref: &str, _was_rendered: bool) -> Result<()> {
        let bytes = self.browserless.screenshot(&page.url).await?;
        let name = format!("{}.png", page.url_hash);
        let screenshot_ref = self.raw_store.put(page.domain_id, &name, &bytes).await?;
        debug!(url = page.url.as_str(), screenshot_ref = screenshot_ref.as_str(), "Screenshot stored");
        Ok(())
    }
}
