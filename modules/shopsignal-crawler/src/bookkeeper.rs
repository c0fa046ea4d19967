//! Link-graph bookkeeping: turning one successful fetch into durable graph
//! state. Upsert the page, record the discovering edge, ingest outbound
//! links as frontier pages, keep inbound counts consistent at session end.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, warn};

use shopsignal_common::{stable_hash, Domain, Page};
use shopsignal_store::PageStore;

use crate::links::DiscoveredLink;

/// Session-local cache of url_hash → page, so pages created moments ago in
/// this crawl session aren't re-fetched from the store for every edge.
/// Scoped to one session and discarded with it, never reused across
/// sessions, where it would go stale.
#[derive(Default)]
pub struct SessionCache {
    pages: HashMap<String, Page>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, url_hash: &str) -> Option<&Page> {
        self.pages.get(url_hash)
    }

    fn insert(&mut self, page: Page) {
        self.pages.insert(page.url_hash.clone(), page);
    }
}

pub struct LinkGraphBookkeeper {
    store: Arc<dyn PageStore>,
}

impl LinkGraphBookkeeper {
    pub fn new(store: Arc<dyn PageStore>) -> Self {
        Self { store }
    }

    /// Persist one successful fetch. Depth is 0 for a brand-new crawl root,
    /// `parent.depth + 1` when the page was found on another page, and 1 when
    /// the parent isn't persisted yet (a concurrent-crawl race). A refetch of
    /// a known page keeps its existing depth.
    pub async fn record_fetch(
        &self,
        domain: &Domain,
        url: &str,
        raw_content_ref: &str,
        found_on_url: Option<&str>,
        cache: &mut SessionCache,
    ) -> Result<Page> {
        let url_hash = stable_hash(url);
        let depth = match found_on_url {
            None => None,
            Some(parent_url) => {
                let parent_hash = stable_hash(parent_url);
                match self.lookup(domain, &parent_hash, cache).await? {
                    Some(parent) => Some(parent.depth + 1),
                    None => Some(1),
                }
            }
        };

        let page = self
            .store
            .record_fetch(domain.id, url, &url_hash, raw_content_ref, depth, Utc::now())
            .await?;
        cache.insert(page.clone());
        Ok(page)
    }

    /// Record the directed edge source → target, anchor last-write-wins.
    /// Concurrent discovery of the same edge is absorbed by the store.
    pub async fn record_edge(
        &self,
        source: &Page,
        target: &Page,
        anchor_text: Option<&str>,
    ) -> Result<()> {
        self.store
            .upsert_link(source.id, target.id, anchor_text)
            .await?;
        Ok(())
    }

    /// Ingest one page's outbound links. External hosts are dropped; known
    /// targets just get an edge; unknown targets become frontier pages at
    /// `source.depth + 1`. A single bad link is logged and skipped, never
    /// aborting the rest of the set. Returns the domain-internal URLs that
    /// were recorded.
    pub async fn ingest_discovered_links(
        &self,
        domain: &Domain,
        source: &Page,
        links: &[DiscoveredLink],
        cache: &mut SessionCache,
    ) -> Result<Vec<String>> {
        let mut ingested = Vec::new();

        for link in links {
            let host = match url::Url::parse(&link.url) {
                Ok(parsed) => match parsed.host_str() {
                    Some(host) => host.to_string(),
                    None => {
                        debug!(url = link.url.as_str(), "Link has no host, skipping");
                        continue;
                    }
                },
                Err(e) => {
                    debug!(url = link.url.as_str(), error = %e, "Unparseable link, skipping");
                    continue;
                }
            };
            if !domain.allows_host(&host) {
                continue;
            }

            match self.ingest_one(domain, source, link, cache).await {
                Ok(()) => ingested.push(link.url.clone()),
                Err(e) => {
                    warn!(url = link.url.as_str(), error = %e, "Failed to ingest link, skipping")
                }
            }
        }

        Ok(ingested)
    }

    async fn ingest_one(
        &self,
        domain: &Domain,
        source: &Page,
        link: &DiscoveredLink,
        cache: &mut SessionCache,
    ) -> Result<()> {
        let url_hash = stable_hash(&link.url);
        let target = match self.lookup(domain, &url_hash, cache).await? {
            Some(existing) => existing,
            None => {
                let page = self
                    .store
                    .create_frontier_page(
                        domain.id,
                        &link.url,
                        &url_hash,
                        source.depth + 1,
                        Utc::now(),
                    )
                    .await?;
                cache.insert(page.clone());
                page
            }
        };

        self.record_edge(source, &target, link.anchor.as_deref()).await
    }

    async fn lookup(
        &self,
        domain: &Domain,
        url_hash: &str,
        cache: &mut SessionCache,
    ) -> Result<Option<Page>> {
        if let Some(page) = cache.get(url_hash) {
            return Ok(Some(page.clone()));
        }
        let found = self.store.page_by_hash(domain.id, url_hash).await?;
        if let Some(ref page) = found {
            cache.insert(page.clone());
        }
        Ok(found)
    }

    /// Bulk-recompute inbound-link counts for the domain. Runs once at the
    /// end of a crawl session, not per edge.
    pub async fn recompute_inbound_counts(&self, domain: &Domain) -> Result<()> {
        self.store.recompute_inbound_counts(domain.id).await?;
        Ok(())
    }
}
