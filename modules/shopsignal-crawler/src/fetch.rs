//! Page fetch collaborators.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use browserless_client::BrowserlessClient;

/// Raw result of fetching one URL. The crawl core only accepts 2xx bodies;
/// everything else counts as a fetch failure for the session.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: u16,
    pub body: String,
    pub content_type: Option<String>,
    /// Whether the body went through the headless-browser renderer.
    pub was_rendered: bool,
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage>;
    fn name(&self) -> &str;
}

// --- Plain HTTP fetcher ---

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("shopsignal-crawler/0.1")
            .build()
            .expect("Failed to build HTTP client");
        Self { client }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let body = resp.text().await?;
        Ok(FetchedPage {
            status,
            body,
            content_type,
            was_rendered: false,
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}

// --- Headless-browser fetcher ---

/// Fetches through Browserless for domains whose content only exists after
/// JS execution. Downstream of the renderer the body is treated exactly like
/// a plain HTTP fetch.
pub struct BrowserlessFetcher {
    client: Arc<BrowserlessClient>,
}

impl BrowserlessFetcher {
    pub fn new(client: Arc<BrowserlessClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageFetcher for BrowserlessFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        let rendered = self.client.content(url).await?;
        Ok(FetchedPage {
            status: rendered.status,
            body: rendered.html,
            content_type: Some("text/html".to_string()),
            was_rendered: true,
        })
    }

    fn name(&self) -> &str {
        "browserless"
    }
}
