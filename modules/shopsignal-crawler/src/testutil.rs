//! Test doubles for crawl components.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use shopsignal_common::{CrawlEvent, Domain, Protocol};

use crate::fetch::{FetchedPage, PageFetcher};
use crate::locks::{LockError, LockResult, LockStore};
use crate::notify::ContentSink;
use crate::raw_store::RawContentStore;

// --- Lock stores ---

#[derive(Default)]
pub struct MemoryLockStore {
    map: Mutex<HashMap<String, i64>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn get(&self, key: &str) -> LockResult<Option<i64>> {
        Ok(self.map.lock().unwrap().get(key).copied())
    }

    async fn set(&self, key: &str, value: i64) -> LockResult<()> {
        self.map.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    async fn del(&self, key: &str) -> LockResult<()> {
        self.map.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Lock store whose every operation fails, for fail-open tests.
pub struct FailingLockStore;

#[async_trait]
impl LockStore for FailingLockStore {
    async fn get(&self, _key: &str) -> LockResult<Option<i64>> {
        Err(LockError::Unavailable("lock store down".to_string()))
    }

    async fn set(&self, _key: &str, _value: i64) -> LockResult<()> {
        Err(LockError::Unavailable("lock store down".to_string()))
    }

    async fn del(&self, _key: &str) -> LockResult<()> {
        Err(LockError::Unavailable("lock store down".to_string()))
    }
}

// --- Fetcher ---

/// Fetcher serving canned bodies. URLs with no configured response fail,
/// which doubles as the broken-page case in session tests.
#[derive(Default)]
pub struct StaticFetcher {
    pages: HashMap<String, FetchedPage>,
    calls: Mutex<Vec<String>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(
            url.to_string(),
            FetchedPage {
                status: 200,
                body: html.to_string(),
                content_type: Some("text/html".to_string()),
                was_rendered: false,
            },
        );
        self
    }

    pub fn with_rendered_page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(
            url.to_string(),
            FetchedPage {
                status: 200,
                body: html.to_string(),
                content_type: Some("text/html".to_string()),
                was_rendered: true,
            },
        );
        self
    }

    pub fn with_status(mut self, url: &str, status: u16) -> Self {
        self.pages.insert(
            url.to_string(),
            FetchedPage {
                status,
                body: String::new(),
                content_type: None,
                was_rendered: false,
            },
        );
        self
    }

    /// Every URL handed to `fetch`, in order. Attempt accounting for
    /// budget tests.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        self.calls.lock().unwrap().push(url.to_string());
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("connection refused: {url}"))
    }

    fn name(&self) -> &str {
        "static"
    }
}

// --- Sink ---

#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<CrawlEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CrawlEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentSink for CollectingSink {
    async fn emit(&self, event: CrawlEvent) -> Result<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

// --- Raw content store ---

#[derive(Default)]
pub struct MemoryRawStore {
    contents: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryRawStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> HashMap<String, Vec<u8>> {
        self.contents.lock().unwrap().clone()
    }
}

#[async_trait]
impl RawContentStore for MemoryRawStore {
    async fn put(&self, domain_id: Uuid, name: &str, bytes: &[u8]) -> Result<String> {
        let content_ref = format!("{domain_id}/{name}");
        self.contents
            .lock()
            .unwrap()
            .insert(content_ref.clone(), bytes.to_vec());
        Ok(content_ref)
    }
}

// --- Fixtures ---

pub fn make_domain(host: &str) -> Domain {
    Domain {
        id: Uuid::new_v4(),
        host: host.to_string(),
        allowed_subdomains: vec![],
        protocol: Protocol::Https,
        last_crawled_at: None,
        active: true,
        request_delay_ms: None,
        page_budget: None,
        render_js: false,
        created_at: Utc::now(),
    }
}
