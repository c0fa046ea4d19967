//! Relational persistence for the page/link graph.
//!
//! Both upserts here are single conditional statements, not read-then-write
//! pairs; concurrent crawl workers targeting the same `(domain_id, url_hash)`
//! or `(source, target)` must not lose updates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use shopsignal_common::{Domain, Page, Stage};

use crate::error::{Result, StoreError};

/// Storage port for domains, pages, and link edges. The crawl core only
/// talks to this trait; Postgres and the in-memory test double both
/// implement it.
#[async_trait]
pub trait PageStore: Send + Sync {
    // Domains
    async fn insert_domain(&self, domain: &Domain) -> Result<()>;
    async fn active_domains(&self) -> Result<Vec<Domain>>;
    async fn domain_by_host(&self, host: &str) -> Result<Option<Domain>>;
    async fn touch_domain_crawled(&self, domain_id: Uuid, at: DateTime<Utc>) -> Result<()>;

    // Pages
    async fn page_count(&self, domain_id: Uuid) -> Result<u64>;
    /// Count of pages never fetched: the remaining frontier.
    async fn frontier_count(&self, domain_id: Uuid) -> Result<u64>;
    async fn pages_for_domain(&self, domain_id: Uuid) -> Result<Vec<Page>>;
    async fn page_by_hash(&self, domain_id: Uuid, url_hash: &str) -> Result<Option<Page>>;
    async fn get_page(&self, page_id: Uuid) -> Result<Option<Page>>;

    /// Atomic insert-or-update of a fetched page. `depth = None` inserts 0
    /// for a brand-new row (crawl root) but preserves the existing depth on
    /// a refetch.
    async fn record_fetch(
        &self,
        domain_id: Uuid,
        url: &str,
        url_hash: &str,
        raw_content_ref: &str,
        depth: Option<i32>,
        fetched_at: DateTime<Utc>,
    ) -> Result<Page>;

    /// Create a discovered-but-unfetched page. A concurrent creation of the
    /// same `(domain_id, url_hash)` wins silently; the surviving row is
    /// returned either way.
    async fn create_frontier_page(
        &self,
        domain_id: Uuid,
        url: &str,
        url_hash: &str,
        depth: i32,
        discovered_at: DateTime<Utc>,
    ) -> Result<Page>;

    async fn set_stage_completed(&self, page_id: Uuid, stage: Stage, at: DateTime<Utc>)
        -> Result<()>;

    // Links
    /// Upsert the directed edge source → target. Last writer wins on anchor
    /// text; concurrent discovery of the same edge is harmless.
    async fn upsert_link(
        &self,
        source_page_id: Uuid,
        target_page_id: Uuid,
        anchor_text: Option<&str>,
    ) -> Result<()>;

    /// Bulk-recompute every page's inbound-link count for one domain.
    /// Idempotent; runs once at session end rather than per edge.
    async fn recompute_inbound_counts(&self, domain_id: Uuid) -> Result<()>;
}

// --- Postgres implementation ---

pub struct PgPageStore {
    pool: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct DomainRow {
    id: Uuid,
    host: String,
    allowed_subdomains: Vec<String>,
    protocol: String,
    last_crawled_at: Option<DateTime<Utc>>,
    active: bool,
    request_delay_ms: Option<i64>,
    page_budget: Option<i32>,
    render_js: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<DomainRow> for Domain {
    type Error = StoreError;

    fn try_from(row: DomainRow) -> Result<Domain> {
        Ok(Domain {
            id: row.id,
            host: row.host,
            allowed_subdomains: row.allowed_subdomains,
            protocol: row.protocol.parse().map_err(StoreError::Decode)?,
            last_crawled_at: row.last_crawled_at,
            active: row.active,
            request_delay_ms: row.request_delay_ms.map(|v| v as u64),
            page_budget: row.page_budget.map(|v| v as u32),
            render_js: row.render_js,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PageRow {
    id: Uuid,
    domain_id: Uuid,
    url: String,
    url_hash: String,
    depth: i32,
    last_crawled_at: Option<DateTime<Utc>>,
    inbound_links: i32,
    raw_content_ref: Option<String>,
    discovered_at: DateTime<Utc>,
    screenshot_at: Option<DateTime<Utc>>,
    analyzed_at: Option<DateTime<Utc>>,
    embedded_at: Option<DateTime<Utc>>,
    attributes_at: Option<DateTime<Utc>>,
}

impl From<PageRow> for Page {
    fn from(row: PageRow) -> Page {
        Page {
            id: row.id,
            domain_id: row.domain_id,
            url: row.url,
            url_hash: row.url_hash,
            depth: row.depth,
            last_crawled_at: row.last_crawled_at,
            inbound_links: row.inbound_links,
            raw_content_ref: row.raw_content_ref,
            discovered_at: row.discovered_at,
            screenshot_at: row.screenshot_at,
            analyzed_at: row.analyzed_at,
            embedded_at: row.embedded_at,
            attributes_at: row.attributes_at,
        }
    }
}

impl PgPageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl PageStore for PgPageStore {
    async fn insert_domain(&self, domain: &Domain) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO domains
                (id, host, allowed_subdomains, protocol, last_crawled_at, active,
                 request_delay_ms, page_budget, render_js, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (host) DO NOTHING
            "#,
        )
        .bind(domain.id)
        .bind(&domain.host)
        .bind(&domain.allowed_subdomains)
        .bind(domain.protocol.as_str())
        .bind(domain.last_crawled_at)
        .bind(domain.active)
        .bind(domain.request_delay_ms.map(|v| v as i64))
        .bind(domain.page_budget.map(|v| v as i32))
        .bind(domain.render_js)
        .bind(domain.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn active_domains(&self) -> Result<Vec<Domain>> {
        let rows = sqlx::query_as::<_, DomainRow>(
            "SELECT * FROM domains WHERE active ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Domain::try_from).collect()
    }

    async fn domain_by_host(&self, host: &str) -> Result<Option<Domain>> {
        let row = sqlx::query_as::<_, DomainRow>("SELECT * FROM domains WHERE host = $1")
            .bind(host)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Domain::try_from).transpose()
    }

    async fn touch_domain_crawled(&self, domain_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE domains SET last_crawled_at = $1 WHERE id = $2")
            .bind(at)
            .bind(domain_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn page_count(&self, domain_id: Uuid) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pages WHERE domain_id = $1")
            .bind(domain_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn frontier_count(&self, domain_id: Uuid) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM pages WHERE domain_id = $1 AND last_crawled_at IS NULL",
        )
        .bind(domain_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    async fn pages_for_domain(&self, domain_id: Uuid) -> Result<Vec<Page>> {
        let rows = sqlx::query_as::<_, PageRow>(
            "SELECT * FROM pages WHERE domain_id = $1 ORDER BY discovered_at ASC",
        )
        .bind(domain_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Page::from).collect())
    }

    async fn page_by_hash(&self, domain_id: Uuid, url_hash: &str) -> Result<Option<Page>> {
        let row = sqlx::query_as::<_, PageRow>(
            "SELECT * FROM pages WHERE domain_id = $1 AND url_hash = $2",
        )
        .bind(domain_id)
        .bind(url_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Page::from))
    }

    async fn get_page(&self, page_id: Uuid) -> Result<Option<Page>> {
        let row = sqlx::query_as::<_, PageRow>("SELECT * FROM pages WHERE id = $1")
            .bind(page_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Page::from))
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
        let row = sqlx::query_as::<_, PageRow>(
            r#"
            INSERT INTO pages
                (id, domain_id, url, url_hash, depth, last_crawled_at,
                 inbound_links, raw_content_ref, discovered_at)
            VALUES ($1, $2, $3, $4, COALESCE($5, 0), $6, 0, $7, $6)
            ON CONFLICT (domain_id, url_hash) DO UPDATE SET
                raw_content_ref = EXCLUDED.raw_content_ref,
                last_crawled_at = EXCLUDED.last_crawled_at,
                depth = COALESCE($5, pages.depth)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(domain_id)
        .bind(url)
        .bind(url_hash)
        .bind(depth)
        .bind(fetched_at)
        .bind(raw_content_ref)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn create_frontier_page(
        &self,
        domain_id: Uuid,
        url: &str,
        url_hash: &str,
        depth: i32,
        discovered_at: DateTime<Utc>,
    ) -> Result<Page> {
        let inserted = sqlx::query_as::<_, PageRow>(
            r#"
            INSERT INTO pages
                (id, domain_id, url, url_hash, depth, last_crawled_at,
                 inbound_links, discovered_at)
            VALUES ($1, $2, $3, $4, $5, NULL, 0, $6)
            ON CONFLICT (domain_id, url_hash) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(domain_id)
        .bind(url)
        .bind(url_hash)
        .bind(depth)
        .bind(discovered_at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok(row.into());
        }

        // Lost the insert race; a concurrent worker created the same page.
        self.page_by_hash(domain_id, url_hash)
            .await?
            .ok_or_else(|| StoreError::Decode(format!("page vanished after upsert: {url}")))
    }

    async fn set_stage_completed(
        &self,
        page_id: Uuid,
        stage: Stage,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let column = match stage {
            Stage::Screenshot => "screenshot_at",
            Stage::Analysis => "analyzed_at",
            Stage::Embedding => "embedded_at",
            Stage::Attributes => "attributes_at",
        };
        let sql = format!("UPDATE pages SET {column} = $1 WHERE id = $2");
        sqlx::query(&sql)
            .bind(at)
            .bind(page_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_link(
        &self,
        source_page_id: Uuid,
        target_page_id: Uuid,
        anchor_text: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO page_links (source_page_id, target_page_id, anchor_text, created_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (source_page_id, target_page_id) DO UPDATE SET
                anchor_text = EXCLUDED.anchor_text
            "#,
        )
        .bind(source_page_id)
        .bind(target_page_id)
        .bind(anchor_text)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            // Concurrent discovery of the same edge is expected, not an error.
            Err(e) if is_unique_violation(&e) => {
                debug!(%source_page_id, %target_page_id, "Edge already recorded by another worker");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn recompute_inbound_counts(&self, domain_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE pages
            SET inbound_links = sub.cnt
            FROM (
                SELECT p.id, COUNT(l.source_page_id)::int AS cnt
                FROM pages p
                LEFT JOIN page_links l ON l.target_page_id = p.id
                WHERE p.domain_id = $1
                GROUP BY p.id
            ) sub
            WHERE pages.id = sub.id
            "#,
        )
        .bind(domain_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false)
}
