use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

// --- URL hashing ---

/// Stable hash of a canonical URL string. `(domain_id, url_hash)` is the sole
/// deduplication key for pages; two URL strings that hash identically are the
/// same page.
pub fn stable_hash(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}

// --- Protocol ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            other => Err(format!("unknown protocol: {other}")),
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// --- Domain ---

/// A crawl target root. Seeded by operators; `last_crawled_at` is touched at
/// the end of every crawl session. Never hard-deleted in normal operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Domain {
    pub id: Uuid,
    pub host: String,
    /// Additional hostnames whose pages belong to this domain
    /// (e.g. "shop.example.com" alongside "example.com").
    pub allowed_subdomains: Vec<String>,
    pub protocol: Protocol,
    pub last_crawled_at: Option<DateTime<Utc>>,
    pub active: bool,
    /// Per-domain politeness delay between sequential fetches.
    pub request_delay_ms: Option<u64>,
    /// Per-domain override of the run-wide page budget.
    pub page_budget: Option<u32>,
    /// Fetch through the headless-browser renderer instead of plain HTTP.
    pub render_js: bool,
    pub created_at: DateTime<Utc>,
}

impl Domain {
    /// The bootstrap URL for a brand-new domain.
    pub fn root_url(&self) -> String {
        format!("{}://{}/", self.protocol, self.host)
    }

    /// Whether a hostname belongs to this crawl target. External hosts are
    /// recorded nowhere.
    pub fn allows_host(&self, host: &str) -> bool {
        host == self.host || self.allowed_subdomains.iter().any(|s| s == host)
    }
}

// --- Page ---

/// A single crawled URL scoped to one domain. `last_crawled_at = None` marks
/// a frontier page: discovered via a link but never fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub id: Uuid,
    pub domain_id: Uuid,
    pub url: String,
    pub url_hash: String,
    /// Hops from the domain root at discovery time.
    pub depth: i32,
    pub last_crawled_at: Option<DateTime<Utc>>,
    /// Denormalized count of edges targeting this page. Recomputed in bulk at
    /// the end of a crawl session; the scheduler's popularity input.
    pub inbound_links: i32,
    /// Opaque handle to externally stored raw HTML.
    pub raw_content_ref: Option<String>,
    pub discovered_at: DateTime<Utc>,
    pub screenshot_at: Option<DateTime<Utc>>,
    pub analyzed_at: Option<DateTime<Utc>>,
    pub embedded_at: Option<DateTime<Utc>>,
    pub attributes_at: Option<DateTime<Utc>>,
}

impl Page {
    pub fn is_frontier(&self) -> bool {
        self.last_crawled_at.is_none()
    }
}

// --- PageLink ---

/// A directed edge source → target. `(source_page_id, target_page_id)` is
/// unique; repeated discovery overwrites the anchor text (last-seen-wins).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageLink {
    pub source_page_id: Uuid,
    pub target_page_id: Uuid,
    pub anchor_text: Option<String>,
    pub created_at: DateTime<Utc>,
}

// --- Stage ---

/// One discrete downstream processing step applied to a fetched page. Each
/// stage is independently lockable and stamps its own completion timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Screenshot,
    Analysis,
    Embedding,
    Attributes,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Screenshot,
        Stage::Analysis,
        Stage::Embedding,
        Stage::Attributes,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Stage::Screenshot => "screenshot",
            Stage::Analysis => "analysis",
            Stage::Embedding => "embedding",
            Stage::Attributes => "attributes",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_hash_is_deterministic() {
        let a = stable_hash("https://example.com/product/1");
        let b = stable_hash("https://example.com/product/1");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn stable_hash_differs_per_url() {
        assert_ne!(
            stable_hash("https://example.com/a"),
            stable_hash("https://example.com/b")
        );
    }

    #[test]
    fn stage_keys_are_distinct() {
        let keys: std::collections::HashSet<_> = Stage::ALL.iter().map(|s| s.key()).collect();
        assert_eq!(keys.len(), Stage::ALL.len());
    }

    #[test]
    fn domain_root_url_uses_protocol() {
        let domain = Domain {
            id: Uuid::new_v4(),
            host: "example.com".to_string(),
            allowed_subdomains: vec![],
            protocol: Protocol::Https,
            last_crawled_at: None,
            active: true,
            request_delay_ms: None,
            page_budget: None,
            render_js: false,
            created_at: Utc::now(),
        };
        assert_eq!(domain.root_url(), "https://example.com/");
    }

    #[test]
    fn allows_host_checks_subdomain_list() {
        let domain = Domain {
            id: Uuid::new_v4(),
            host: "example.com".to_string(),
            allowed_subdomains: vec!["shop.example.com".to_string()],
            protocol: Protocol::Https,
            last_crawled_at: None,
            active: true,
            request_delay_ms: None,
            page_budget: None,
            render_js: false,
            created_at: Utc::now(),
        };
        assert!(domain.allows_host("example.com"));
        assert!(domain.allows_host("shop.example.com"));
        assert!(!domain.allows_host("blog.example.com"));
        assert!(!domain.allows_host("other.com"));
    }
}
