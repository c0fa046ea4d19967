use std::env;
use std::path::PathBuf;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres
    pub database_url: String,

    // Lock store
    pub redis_url: String,

    // Headless-browser renderer
    pub browserless_url: String,
    pub browserless_token: Option<String>,

    // Raw content spool
    pub raw_content_dir: PathBuf,

    // Crawl session
    pub crawl_page_limit: usize,
    pub request_delay_ms: u64,

    // Recrawl priority
    pub hours_per_link: f64,
    pub min_interval_minutes: i64,
    pub max_interval_days: i64,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            redis_url: required_env("REDIS_URL"),
            browserless_url: env::var("BROWSERLESS_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            browserless_token: env::var("BROWSERLESS_TOKEN").ok(),
            raw_content_dir: env::var("RAW_CONTENT_DIR")
                .unwrap_or_else(|_| "./data/raw".to_string())
                .into(),
            crawl_page_limit: parsed_env("CRAWL_PAGE_LIMIT", 100),
            request_delay_ms: parsed_env("CRAWL_REQUEST_DELAY_MS", 0),
            hours_per_link: parsed_env("RECRAWL_HOURS_PER_LINK", 1.0),
            min_interval_minutes: parsed_env("RECRAWL_MIN_INTERVAL_MINUTES", 20),
            max_interval_days: parsed_env("RECRAWL_MAX_INTERVAL_DAYS", 20),
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a number")),
        Err(_) => default,
    }
}
