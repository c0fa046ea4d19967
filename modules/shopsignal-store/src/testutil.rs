//! In-memory `PageStore` for tests. Mirrors the Postgres implementation's
//! upsert semantics (including depth preservation on refetch and silent
//! last-writer-wins on edges) so crawl logic can be exercised without a
//! database.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use shopsignal_common::{Domain, Page, PageLink, Stage};

use crate::error::{Result, StoreError};
use crate::page_store::PageStore;

#[derive(Default)]
struct Inner {
    domains: Vec<Domain>,
    pages: Vec<Page>,
    links: HashMap<(Uuid, Uuid), PageLink>,
}

#[derive(Default)]
pub struct MemoryPageStore {
    inner: Mutex<Inner>,
}

impl MemoryPageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All link edges, for test assertions.
    pub fn links(&self) -> Vec<PageLink> {
        self.inner.lock().unwrap().links.values().cloned().collect()
    }

    /// All pages, for test assertions.
    pub fn pages(&self) -> Vec<Page> {
        self.inner.lock().unwrap().pages.clone()
    }

    /// Backdate a page's last crawl, so tests can make it due again.
    pub fn set_last_crawled(&self, page_id: Uuid, at: Option<DateTime<Utc>>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(page) = inner.pages.iter_mut().find(|p| p.id == page_id) {
            page.last_crawled_at = at;
        }
    }
}

#[async_trait]
impl PageStore for MemoryPageStore {
    async fn insert_domain(&self, domain: &Domain) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.domains.iter().any(|d| d.host == domain.host) {
            inner.domains.push(domain.clone());
        }
        Ok(())
    }

    async fn active_domains(&self) -> Result<Vec<Domain>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.domains.iter().filter(|d| d.active).cloned().collect())
    }

    async fn domain_by_host(&self, host: &str) -> Result<Option<Domain>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.domains.iter().find(|d| d.host == host).cloned())
    }

    async fn touch_domain_crawled(&self, domain_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(domain) = inner.domains.iter_mut().find(|d| d.id == domain_id) {
            domain.last_crawled_at = Some(at);
        }
        Ok(())
    }

    async fn page_count(&self, domain_id: Uuid) -> Result<u64> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.pages.iter().filter(|p| p.domain_id == domain_id).count() as u64)
    }

    async fn frontier_count(&self, domain_id: Uuid) -> Result<u64> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .pages
            .iter()
            .filter(|p| p.domain_id == domain_id && p.last_crawled_at.is_none())
            .count() as u64)
    }

    async fn pages_for_domain(&self, domain_id: Uuid) -> Result<Vec<Page>> {
        let inner = self.inner.lock().unwrap();
        let mut pages: Vec<Page> = inner
            .pages
            .iter()
            .filter(|p| p.domain_id == domain_id)
            .cloned()
            .collect();
        pages.sort_by_key(|p| p.discovered_at);
        Ok(pages)
    }

    async fn page_by_hash(&self, domain_id: Uuid, url_hash: &str) -> Result<Option<Page>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .pages
            .iter()
            .find(|p| p.domain_id == domain_id && p.url_hash == url_hash)
            .cloned())
    }

    async fn get_page(&self, page_id: Uuid) -> Result<Option<Page>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.pages.iter().find(|p| p.id == page_id).cloned())
    }

    async fn record_fetch(
        &self,
        domain_id: Uuid,
        url: &str,
        url_hash: &str,
        raw_content_ref: &str,
        depth: Option<i32>,
        fetched_at: DateTime<Utc>,
    ) -> Result<Page> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(page) = inner
            .pages
            .iter_mut()
            .find(|p| p.domain_id == domain_id && p.url_hash == url_hash)
        {
            page.raw_content_ref = Some(raw_content_ref.to_string());
            page.last_crawled_at = Some(fetched_at);
            if let Some(depth) = depth {
                page.depth = depth;
            }
            return Ok(page.clone());
        }

        let page = Page {
            id: Uuid::new_v4(),
            domain_id,
            url: url.to_string(),
            url_hash: url_hash.to_string(),
            depth: depth.unwrap_or(0),
            last_crawled_at: Some(fetched_at),
            inbound_links: 0,
            raw_content_ref: Some(raw_content_ref.to_string()),
            discovered_at: fetched_at,
            screenshot_at: None,
            analyzed_at: None,
            embedded_at: None,
            attributes_at: None,
        };
        inner.pages.push(page.clone());
        Ok(page)
    }

    async fn create_frontier_page(
        &self,
        domain_id: Uuid,
        url: &str,
        url_hash: &str,
        depth: i32,
        discovered_at: DateTime<Utc>,
    ) -> Result<Page> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner
            .pages
            .iter()
            .find(|p| p.domain_id == domain_id && p.url_hash == url_hash)
        {
            return Ok(existing.clone());
        }

        let page = Page {
            id: Uuid::new_v4(),
            domain_id,
            url: url.to_string(),
            url_hash: url_hash.to_string(),
            depth,
            last_crawled_at: None,
            inbound_links: 0,
            raw_content_ref: None,
            discovered_at,
            screenshot_at: None,
            analyzed_at: None,
            embedded_at: None,
            attributes_at: None,
        };
        inner.pages.push(page.clone());
        Ok(page)
    }

    async fn set_stage_completed(
        &self,
        page_id: Uuid,
        stage: Stage,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let page = inner
            .pages
            .iter_mut()
            .find(|p| p.id == page_id)
            .ok_or(StoreError::PageNotFound(page_id))?;
        match stage {
            Stage::Screenshot => page.screenshot_at = Some(at),
            Stage::Analysis => page.analyzed_at = Some(at),
            Stage::Embedding => page.embedded_at = Some(at),
            Stage::Attributes => page.attributes_at = Some(at),
        }
        Ok(())
    }

    async fn upsert_link(
        &self,
        source_page_id: Uuid,
        target_page_id: Uuid,
        anchor_text: Option<&str>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .links
            .entry((source_page_id, target_page_id))
            .and_modify(|link| link.anchor_text = anchor_text.map(String::from))
            .or_insert(PageLink {
                source_page_id,
                target_page_id,
                anchor_text: anchor_text.map(String::from),
                created_at: Utc::now(),
            });
        Ok(())
    }

    async fn recompute_inbound_counts(&self, domain_id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let mut counts: HashMap<Uuid, i32> = HashMap::new();
        for (_, target) in inner.links.keys() {
            *counts.entry(*target).or_default() += 1;
        }
        for page in inner.pages.iter_mut().filter(|p| p.domain_id == domain_id) {
            page.inbound_links = counts.get(&page.id).copied().unwrap_or(0);
        }
        Ok(())
    }
}
