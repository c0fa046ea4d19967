//! Short-TTL mutual exclusion for per-page processing stages.
//!
//! Keys are `(entity id, stage)`; values are acquisition timestamps in a
//! cache-tier key-value store. Staleness is computed here against the wall
//! clock, not by store-side expiry. There is no ownership token: any caller
//! holding the key name can release or take over a stale lock, so two workers
//! racing the same stale lock can both believe they won. Stage jobs must stay
//! idempotent enough to absorb the rare double-run.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::debug;
use uuid::Uuid;

use shopsignal_common::Stage;

pub type LockResult<T> = std::result::Result<T, LockError>;

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Lock store error: {0}")]
    Store(#[from] redis::RedisError),

    #[error("Lock store unavailable: {0}")]
    Unavailable(String),
}

/// Key-value port for the lock store: plain GET/SET/DEL of millisecond
/// timestamps. No store-side TTL is relied on.
#[async_trait]
pub trait LockStore: Send + Sync {
    async fn get(&self, key: &str) -> LockResult<Option<i64>>;
    async fn set(&self, key: &str, value: i64) -> LockResult<()>;
    async fn del(&self, key: &str) -> LockResult<()>;
}

// --- Redis implementation ---

pub struct RedisLockStore {
    conn: ConnectionManager,
}

impl RedisLockStore {
    pub async fn connect(redis_url: &str) -> LockResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn get(&self, key: &str) -> LockResult<Option<i64>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: i64) -> LockResult<()> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> LockResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }
}

// --- Lock service ---

const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(10);

/// Prevents two workers from running the same stage on the same page at the
/// same time, without serializing across stages or pages. Not a linearizable
/// mutex: two callers observing the same stale lock can both "acquire" it,
/// last writer wins.
pub struct PageLockService {
    store: Arc<dyn LockStore>,
    ttl: Duration,
}

impl PageLockService {
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self::with_ttl(store, DEFAULT_LOCK_TTL)
    }

    pub fn with_ttl(store: Arc<dyn LockStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// The fixed TTL after which a held lock goes stale. Callers use this to
    /// pick their polling cadence.
    pub fn lock_timeout(&self) -> Duration {
        self.ttl
    }

    fn key(entity_id: Uuid, stage: Stage) -> String {
        format!("lock:{stage}:{entity_id}")
    }

    /// Try to claim the `(entity, stage)` lock. Returns false while another
    /// worker holds a fresh lock; silently takes over a stale one.
    pub async fn acquire(&self, entity_id: Uuid, stage: Stage) -> LockResult<bool> {
        let key = Self::key(entity_id, stage);
        let now = Utc::now().timestamp_millis();

        match self.store.get(&key).await? {
            Some(held_at) if now - held_at < self.ttl.as_millis() as i64 => Ok(false),
            Some(held_at) => {
                debug!(%entity_id, %stage, held_ms = now - held_at, "Taking over stale lock");
                self.store.set(&key, now).await?;
                Ok(true)
            }
            None => {
                self.store.set(&key, now).await?;
                Ok(true)
            }
        }
    }

    /// Delete the lock unconditionally. No effect if absent.
    pub async fn release(&self, entity_id: Uuid, stage: Stage) -> LockResult<()> {
        self.store.del(&Self::key(entity_id, stage)).await
    }

    /// Read-only check with the same staleness rule as `acquire`.
    pub async fn is_locked(&self, entity_id: Uuid, stage: Stage) -> LockResult<bool> {
        let now = Utc::now().timestamp_millis();
        match self.store.get(&Self::key(entity_id, stage)).await? {
            Some(held_at) => Ok(now - held_at < self.ttl.as_millis() as i64),
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MemoryLockStore;

    fn service(ttl: Duration) -> PageLockService {
        PageLockService::with_ttl(Arc::new(MemoryLockStore::new()), ttl)
    }

    #[tokio::test]
    async fn second_acquire_is_denied_while_held() {
        let locks = service(Duration::from_secs(10));
        let page = Uuid::new_v4();

        assert!(locks.acquire(page, Stage::Analysis).await.unwrap());
        assert!(!locks.acquire(page, Stage::Analysis).await.unwrap());
    }

    #[tokio::test]
    async fn stale_lock_is_taken_over_after_ttl() {
        let locks = service(Duration::from_millis(50));
        let page = Uuid::new_v4();

        assert!(locks.acquire(page, Stage::Embedding).await.unwrap());
        assert!(!locks.acquire(page, Stage::Embedding).await.unwrap());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(locks.acquire(page, Stage::Embedding).await.unwrap());
    }

    #[tokio::test]
    async fn release_allows_reacquire() {
        let locks = service(Duration::from_secs(10));
        let page = Uuid::new_v4();

        assert!(locks.acquire(page, Stage::Screenshot).await.unwrap());
        locks.release(page, Stage::Screenshot).await.unwrap();
        assert!(locks.acquire(page, Stage::Screenshot).await.unwrap());
    }

    #[tokio::test]
    async fn is_locked_reports_without_mutating() {
        let locks = service(Duration::from_millis(50));
        let page = Uuid::new_v4();

        assert!(!locks.is_locked(page, Stage::Attributes).await.unwrap());
        locks.acquire(page, Stage::Attributes).await.unwrap();
        assert!(locks.is_locked(page, Stage::Attributes).await.unwrap());

        // After the TTL the lock reads as free, but is_locked must not have
        // overwritten it: a fresh acquire still succeeds.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!locks.is_locked(page, Stage::Attributes).await.unwrap());
        assert!(locks.acquire(page, Stage::Attributes).await.unwrap());
    }

    #[tokio::test]
    async fn stages_do_not_contend_with_each_other() {
        let locks = service(Duration::from_secs(10));
        let page = Uuid::new_v4();

        assert!(locks.acquire(page, Stage::Screenshot).await.unwrap());
        assert!(locks.acquire(page, Stage::Analysis).await.unwrap());
        assert!(locks.acquire(page, Stage::Embedding).await.unwrap());
    }

    #[tokio::test]
    async fn entities_do_not_contend_with_each_other() {
        let locks = service(Duration::from_secs(10));

        assert!(locks.acquire(Uuid::new_v4(), Stage::Analysis).await.unwrap());
        assert!(locks.acquire(Uuid::new_v4(), Stage::Analysis).await.unwrap());
    }

    #[tokio::test]
    async fn default_ttl_is_ten_seconds() {
        let locks = PageLockService::new(Arc::new(MemoryLockStore::new()));
        assert_eq!(locks.lock_timeout(), Duration::from_secs(10));
    }
}
