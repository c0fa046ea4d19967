use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use browserless_client::BrowserlessClient;
use shopsignal_common::Config;
use shopsignal_crawler::fetch::{BrowserlessFetcher, HttpFetcher};
use shopsignal_crawler::notify::ChannelSink;
use shopsignal_crawler::raw_store::{FsRawStore, RawContentStore};
use shopsignal_crawler::stages::{ScreenshotProcessor, StageWorker};
use shopsignal_crawler::{
    CrawlOptions, CrawlOrchestrator, PageLockService, RecrawlPolicy, RecrawlScheduler,
    RedisLockStore,
};
use shopsignal_store::{PageStore, PgPageStore};

#[derive(Parser)]
#[command(name = "shopsignal-crawler", about = "Scheduled domain crawl runner")]
struct Cli {
    /// Restrict the run to a single domain host
    #[arg(long)]
    domain: Option<String>,

    /// Run-wide page budget (overrides CRAWL_PAGE_LIMIT)
    #[arg(long)]
    limit: Option<usize>,

    /// Only fetch never-crawled frontier pages
    #[arg(long)]
    new_only: bool,

    /// Recrawl everything, ignoring the due formula
    #[arg(long)]
    force: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("shopsignal=info".parse()?))
        .init();

    info!("ShopSignal crawler starting...");

    let cli = Cli::parse();
    let config = Config::from_env();

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(8)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to Postgres")?;
    let pg = PgPageStore::new(pool);
    pg.migrate().await.context("Failed to run migrations")?;
    let store: Arc<dyn PageStore> = Arc::new(pg);

    let raw_store: Arc<dyn RawContentStore> =
        Arc::new(FsRawStore::new(config.raw_content_dir.clone()));
    let browserless = Arc::new(BrowserlessClient::new(
        &config.browserless_url,
        config.browserless_token.as_deref(),
    ));

    let scheduler = RecrawlScheduler::new(RecrawlPolicy {
        hours_per_link: config.hours_per_link,
        min_interval_minutes: config.min_interval_minutes,
        max_interval_days: config.max_interval_days,
    });

    let (sink, events) = ChannelSink::new();
    let orchestrator = CrawlOrchestrator::new(
        store.clone(),
        raw_store.clone(),
        scheduler,
        Arc::new(HttpFetcher::new()),
        Arc::new(sink),
        config.crawl_page_limit,
        config.request_delay_ms,
    )
    .with_render_fetcher(Arc::new(BrowserlessFetcher::new(browserless.clone())));

    // The screenshot stage runs in-process; analysis, embedding, and
    // attribute extraction consume the same events from their own services.
    let locks = PageLockService::new(Arc::new(
        RedisLockStore::connect(&config.redis_url)
            .await
            .context("Failed to connect to lock store")?,
    ));
    let worker = StageWorker::new(
        store,
        locks,
        vec![Arc::new(ScreenshotProcessor::new(browserless, raw_store))],
    );
    let worker_task = tokio::spawn(async move { worker.run(events).await });

    let opts = CrawlOptions {
        domain: cli.domain,
        limit: cli.limit,
        new_only: cli.new_only,
        force: cli.force,
    };
    let stats = orchestrator.run(&opts).await?;

    // Dropping the orchestrator closes the content-ready channel; the stage
    // worker drains what's left and exits.
    drop(orchestrator);
    if let Err(e) = worker_task.await {
        warn!(error = %e, "Stage worker task failed");
    }

    info!("Crawl run complete. {stats}");
    Ok(())
}
