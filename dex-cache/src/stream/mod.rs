//! Live ingestion: sources of [`IngestEvent`]s and the service that drains them into a cache.

use crate::stream::event::IngestEvent;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Generic arrival shape shared by every adapter.
pub mod event;

/// Owned start/stop lifecycle around a consumption task.
pub mod service;

/// Reconnecting WebSocket adapter.
pub mod websocket;

/// Anything that can yield ingest events.
#[async_trait]
pub trait IngestSource: Send {
    /// Next event, or `None` once the source is exhausted.
    ///
    /// Implementations must be cancel safe: the service races this against shutdown.
    async fn next_event(&mut self) -> Option<IngestEvent>;
}

/// In-process source fed through a bounded channel.
#[derive(Debug)]
pub struct ChannelSource {
    rx: mpsc::Receiver<IngestEvent>,
}

impl ChannelSource {
    /// Create a source plus the sender producers push events into.
    pub fn channel(buffer: usize) -> (mpsc::Sender<IngestEvent>, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (tx, Self { rx })
    }
}

#[async_trait]
impl IngestSource for ChannelSource {
    async fn next_event(&mut self) -> Option<IngestEvent> {
        self.rx.recv().await
    }
}
