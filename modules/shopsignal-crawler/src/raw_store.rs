//! Raw-content storage boundary.
//!
//! The crawl core never keeps page bodies inline; it stores an opaque handle
//! and hands the bytes to this port. Production deployments point the
//! filesystem implementation at a mounted bucket.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait RawContentStore: Send + Sync {
    /// Store one asset and return the opaque reference recorded on the page.
    async fn put(&self, domain_id: Uuid, name: &str, bytes: &[u8]) -> Result<String>;
}

/// Filesystem spool: `{root}/{domain_id}/{name}`.
pub struct FsRawStore {
    root: PathBuf,
}

impl FsRawStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl RawContentStore for FsRawStore {
    async fn put(&self, domain_id: Uuid, name: &str, bytes: &[u8]) -> Result<String> {
        let dir = self.root.join(domain_id.to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create raw-content dir {}", dir.display()))?;
        let path = dir.join(name);
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write raw content {}", path.display()))?;
        Ok(format!("{domain_id}/{name}"))
    }
}
