//! Content-ready notification delivery.
//!
//! Downstream stages consume these events from their own work queues; the
//! crawl core only knows this one-way sink.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;

use shopsignal_common::CrawlEvent;

#[async_trait]
pub trait ContentSink: Send + Sync {
    async fn emit(&self, event: CrawlEvent) -> Result<()>;
}

/// Sink backed by an unbounded tokio channel. The receiving half feeds the
/// stage dispatch loop; dropping every sender closes the channel and ends
/// the consumer.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<CrawlEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CrawlEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ContentSink for ChannelSink {
    async fn emit(&self, event: CrawlEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|_| anyhow!("content-ready channel closed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn emitted_events_arrive_in_order() {
        let (sink, mut rx) = ChannelSink::new();
        for i in 0..3 {
            sink.emit(CrawlEvent::ContentReady {
                page_id: Uuid::new_v4(),
                raw_content_ref: format!("ref/{i}"),
                was_rendered: false,
                discovered_links: vec![],
            })
            .await
            .unwrap();
        }
        drop(sink);

        let mut refs = Vec::new();
        while let Some(CrawlEvent::ContentReady { raw_content_ref, .. }) = rx.recv().await {
            refs.push(raw_content_ref);
        }
        assert_eq!(refs, vec!["ref/0", "ref/1", "ref/2"]);
    }
}
