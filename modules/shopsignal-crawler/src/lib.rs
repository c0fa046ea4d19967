pub mod bookkeeper;
pub mod fetch;
pub mod links;
pub mod locks;
pub mod notify;
pub mod raw_store;
pub mod scheduling;
pub mod session;
pub mod stages;
#[cfg(any(test, feature = "test-support"))]
pub mod testutil;

pub use bookkeeper::{LinkGraphBookkeeper, SessionCache};
pub use locks::{LockStore, PageLockService, RedisLockStore};
pub use scheduling::scheduler::{CandidateOpts, RecrawlPolicy, RecrawlScheduler};
pub use session::{CrawlOptions, CrawlOrchestrator, CrawlStats, DomainReport};
