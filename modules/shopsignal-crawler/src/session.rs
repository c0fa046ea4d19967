//! Domain crawl sessions.
//!
//! One bounded run across one or more domains: brand-new domains get a
//! single bootstrap fetch of their root URL, established domains pull due
//! candidates from the recrawl scheduler. Fetches are sequential within a
//! run; the run-wide budget counts attempts, and a domain whose turn comes
//! after exhaustion is skipped entirely.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use shopsignal_common::{stable_hash, CrawlEvent, Domain};
use shopsignal_store::PageStore;

use crate::bookkeeper::{LinkGraphBookkeeper, SessionCache};
use crate::fetch::PageFetcher;
use crate::links;
use crate::notify::ContentSink;
use crate::raw_store::RawContentStore;
use crate::scheduling::budget::PageBudget;
use crate::scheduling::scheduler::{CandidateOpts, RecrawlScheduler};

/// Options for one crawl run, mirroring the CLI flags.
#[derive(Debug, Clone, Default)]
pub struct CrawlOptions {
    /// Restrict the run to a single host.
    pub domain: Option<String>,
    /// Run-wide fetch budget override.
    pub limit: Option<usize>,
    /// Only fetch never-crawled frontier pages.
    pub new_only: bool,
    /// Recrawl everything, ignoring the due formula.
    pub force: bool,
}

/// Per-domain outcome of a session.
#[derive(Debug, Clone)]
pub struct DomainReport {
    pub host: String,
    pub processed: u32,
    pub errors: u32,
    /// Post-session frontier size: pages discovered but never fetched.
    pub queue_size: u64,
}

/// Aggregate outcome of a crawl run.
#[derive(Debug, Default)]
pub struct CrawlStats {
    pub domains: Vec<DomainReport>,
}

impl CrawlStats {
    pub fn processed(&self) -> u32 {
        self.domains.iter().map(|d| d.processed).sum()
    }

    pub fn errors(&self) -> u32 {
        self.domains.iter().map(|d| d.errors).sum()
    }
}

impl std::fmt::Display for CrawlStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Crawl Run Complete ===")?;
        for report in &self.domains {
            writeln!(
                f,
                "{:<32} processed: {:<5} errors: {:<5} queue: {}",
                report.host, report.processed, report.errors, report.queue_size
            )?;
        }
        writeln!(f, "Total processed: {}", self.processed())?;
        writeln!(f, "Total errors:    {}", self.errors())?;
        Ok(())
    }
}

pub struct CrawlOrchestrator {
    store: Arc<dyn PageStore>,
    raw_store: Arc<dyn RawContentStore>,
    bookkeeper: LinkGraphBookkeeper,
    scheduler: RecrawlScheduler,
    fetcher: Arc<dyn PageFetcher>,
    render_fetcher: Option<Arc<dyn PageFetcher>>,
    sink: Arc<dyn ContentSink>,
    default_limit: usize,
    default_request_delay_ms: u64,
}

impl CrawlOrchestrator {
    pub fn new(
        store: Arc<dyn PageStore>,
        raw_store: Arc<dyn RawContentStore>,
        scheduler: RecrawlScheduler,
        fetcher: Arc<dyn PageFetcher>,
        sink: Arc<dyn ContentSink>,
        default_limit: usize,
        default_request_delay_ms: u64,
    ) -> Self {
        Self {
            bookkeeper: LinkGraphBookkeeper::new(store.clone()),
            store,
            raw_store,
            scheduler,
            fetcher,
            render_fetcher: None,
            sink,
            default_limit,
            default_request_delay_ms,
        }
    }

    /// Route `render_js` domains through the headless-browser fetcher.
    pub fn with_render_fetcher(mut self, fetcher: Arc<dyn PageFetcher>) -> Self {
        self.render_fetcher = Some(fetcher);
        self
    }

    /// Run one crawl session. Per-page failures are counted, never fatal;
    /// only the inability to start at all is an error.
    pub async fn run(&self, opts: &CrawlOptions) -> Result<CrawlStats> {
        let domains = self.session_domains(opts).await?;
        let budget = PageBudget::new(opts.limit.unwrap_or(self.default_limit) as u64);
        let mut stats = CrawlStats::default();

        for domain in domains {
            if budget.is_exhausted() {
                info!(
                    host = domain.host.as_str(),
                    "Page budget exhausted, skipping remaining domains"
                );
                break;
            }
            let report = self.crawl_domain(&domain, opts, &budget).await?;
            stats.domains.push(report);
        }

        budget.log_status();
        Ok(stats)
    }

    async fn session_domains(&self, opts: &CrawlOptions) -> Result<Vec<Domain>> {
        match &opts.domain {
            Some(host) => match self.store.domain_by_host(host).await? {
                Some(domain) if domain.active => Ok(vec![domain]),
                Some(_) => {
                    warn!(host = host.as_str(), "Domain is inactive, skipping");
                    Ok(vec![])
                }
                None => {
                    warn!(host = host.as_str(), "Domain not found, skipping");
                    Ok(vec![])
                }
            },
            None => {
                let domains = self
                    .store
                    .active_domains()
                    .await
                    .context("Failed to load active domains")?;
                if domains.is_empty() {
                    anyhow::bail!("No active domains configured");
                }
                Ok(domains)
            }
        }
    }

    async fn crawl_domain(
        &self,
        domain: &Domain,
        opts: &CrawlOptions,
        budget: &PageBudget,
    ) -> Result<DomainReport> {
        let mut cache = SessionCache::new();
        let mut processed = 0u32;
        let mut errors = 0u32;

        if self.store.page_count(domain.id).await? == 0 {
            // Brand-new domain: bootstrap from the root only. Frontier links
            // discovered on the root seed the next run's queue.
            let root = domain.root_url();
            info!(host = domain.host.as_str(), "Bootstrapping new domain");
            budget.spend();
            match self.fetch_and_record(domain, &root, &mut cache).await {
                Ok(()) => processed += 1,
                Err(e) => {
                    warn!(host = domain.host.as_str(), url = root.as_str(), error = %e,
                        "Bootstrap fetch failed");
                    errors += 1;
                }
            }
        } else {
            let pages = self.store.pages_for_domain(domain.id).await?;
            let limit = domain_limit(domain, budget);
            let candidates = self.scheduler.due_candidates(
                &pages,
                limit,
                CandidateOpts {
                    new_only: opts.new_only,
                    force: opts.force,
                },
                Utc::now(),
            );
            let delay_ms = domain.request_delay_ms.unwrap_or(self.default_request_delay_ms);

            info!(
                host = domain.host.as_str(),
                candidates = candidates.len(),
                "Crawling due candidates"
            );
            for (i, candidate) in candidates.iter().enumerate() {
                if i > 0 && delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                budget.spend();
                match self.fetch_and_record(domain, &candidate.url, &mut cache).await {
                    Ok(()) => processed += 1,
                    Err(e) => {
                        warn!(host = domain.host.as_str(), url = candidate.url.as_str(),
                            error = %e, "Fetch failed, continuing");
                        errors += 1;
                    }
                }
            }
        }

        self.bookkeeper.recompute_inbound_counts(domain).await?;
        self.store.touch_domain_crawled(domain.id, Utc::now()).await?;
        let queue_size = self.store.frontier_count(domain.id).await?;

        info!(
            host = domain.host.as_str(),
            processed, errors, queue_size, "Domain session complete"
        );
        Ok(DomainReport {
            host: domain.host.clone(),
            processed,
            errors,
            queue_size,
        })
    }

    /// Fetch one URL, persist graph state, and notify downstream stages.
    /// The crawl step itself takes no page-level lock; per-stage exclusion
    /// belongs to the consumers.
    async fn fetch_and_record(
        &self,
        domain: &Domain,
        url: &str,
        cache: &mut SessionCache,
    ) -> Result<()> {
        let fetcher = self.fetcher_for(domain);
        let fetched = fetcher
            .fetch(url)
            .await
            .with_context(|| format!("Fetch failed via {}", fetcher.name()))?;
        if !(200..300).contains(&fetched.status) {
            anyhow::bail!("Fetch returned status {}", fetched.status);
        }

        let url_hash = stable_hash(url);
        let raw_content_ref = self
            .raw_store
            .put(domain.id, &format!("{url_hash}.html"), fetched.body.as_bytes())
            .await
            .context("Failed to store raw content")?;

        let page = self
            .bookkeeper
            .record_fetch(domain, url, &raw_content_ref, None, cache)
            .await?;
        let discovered = links::extract_outbound_links(&fetched.body, url);
        let ingested = self
            .bookkeeper
            .ingest_discovered_links(domain, &page, &discovered, cache)
            .await?;

        self.sink
            .emit(CrawlEvent::ContentReady {
                page_id: page.id,
                raw_content_ref,
                was_rendered: fetched.was_rendered,
                discovered_links: ingested,
            })
            .await?;
        Ok(())
    }

    fn fetcher_for(&self, domain: &Domain) -> &Arc<dyn PageFetcher> {
        if domain.render_js {
            if let Some(ref render) = self.render_fetcher {
                return render;
            }
            warn!(
                host = domain.host.as_str(),
                "Domain wants JS rendering but no render fetcher is configured"
            );
        }
        &self.fetcher
    }
}

/// Cap this domain's candidate batch by the remaining run budget and the
/// domain's own page-budget override.
fn domain_limit(domain: &Domain, budget: &PageBudget) -> usize {
    let remaining = budget.remaining().min(usize::MAX as u64) as usize;
    match domain.page_budget {
        Some(cap) => remaining.min(cap as usize),
        None => remaining,
    }
}
