use crate::{
    cache::{DexCache, IngestOutcome},
    error::CacheError,
    stream::IngestSource,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use tokio::{
    sync::{Mutex, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

/// Point-in-time view of a [`StreamService`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StreamStatus {
    pub running: bool,
    pub events_applied: u64,
    /// Events that were stale or failed validation.
    pub events_rejected: u64,
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct StreamCounters {
    applied: AtomicU64,
    rejected: AtomicU64,
}

struct Running {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<Box<dyn IngestSource>>,
    started_at: DateTime<Utc>,
}

struct Inner {
    /// Present whenever no consumption task owns it.
    source: Option<Box<dyn IngestSource>>,
    running: Option<Running>,
}

/// Single owned instance driving one [`IngestSource`] into a [`DexCache`].
///
/// `start` and `stop` are idempotent: starting a running service or stopping a stopped one is a
/// no-op that reports the current status.
pub struct StreamService {
    cache: Arc<DexCache>,
    inner: Mutex<Inner>,
    counters: Arc<StreamCounters>,
}

impl std::fmt::Debug for StreamService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamService")
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

impl StreamService {
    pub fn new<S>(cache: Arc<DexCache>, source: S) -> Self
    where
        S: IngestSource + 'static,
    {
        Self {
            cache,
            inner: Mutex::new(Inner {
                source: Some(Box::new(source)),
                running: None,
            }),
            counters: Arc::new(StreamCounters::default()),
        }
    }

    pub fn cache(&self) -> &Arc<DexCache> {
        &self.cache
    }

    /// Spawn the consumption task if it is not already running.
    pub async fn start(&self) -> Result<StreamStatus, CacheError> {
        let mut inner = self.inner.lock().await;

        if let Some(running) = &inner.running {
            if !running.handle.is_finished() {
                debug!("stream already running");
                return Ok(self.status_of(&inner));
            }
        }

        // Reclaim the source from a task that ended on its own
        if let Some(finished) = inner.running.take() {
            reclaim(&mut inner, finished.handle).await;
        }

        let source = inner
            .source
            .take()
            .ok_or_else(|| CacheError::Stream("ingest source lost by a failed task".to_string()))?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(consume(
            Arc::clone(&self.cache),
            source,
            shutdown_rx,
            Arc::clone(&self.counters),
        ));

        inner.running = Some(Running {
            shutdown,
            handle,
            started_at: Utc::now(),
        });
        info!("stream started");

        Ok(self.status_of(&inner))
    }

    /// Signal the consumption task to finish and wait for it.
    pub async fn stop(&self) -> StreamStatus {
        let mut inner = self.inner.lock().await;

        match inner.running.take() {
            Some(running) => {
                let _ = running.shutdown.send(true);
                reclaim(&mut inner, running.handle).await;
                info!("stream stopped");
            }
            None => debug!("stream already stopped"),
        }

        self.status_of(&inner)
    }

    pub async fn status(&self) -> StreamStatus {
        let inner = self.inner.lock().await;
        self.status_of(&inner)
    }

    fn status_of(&self, inner: &Inner) -> StreamStatus {
        let running = inner
            .running
            .as_ref()
            .filter(|running| !running.handle.is_finished());

        StreamStatus {
            running: running.is_some(),
            events_applied: self.counters.applied.load(Ordering::Relaxed),
            events_rejected: self.counters.rejected.load(Ordering::Relaxed),
            started_at: running.map(|running| running.started_at),
        }
    }
}

async fn reclaim(inner: &mut Inner, handle: JoinHandle<Box<dyn IngestSource>>) {
    match handle.await {
        Ok(source) => inner.source = Some(source),
        Err(error) => warn!(%error, "stream task failed, ingest source dropped"),
    }
}

async fn consume(
    cache: Arc<DexCache>,
    mut source: Box<dyn IngestSource>,
    mut shutdown: watch::Receiver<bool>,
    counters: Arc<StreamCounters>,
) -> Box<dyn IngestSource> {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            event = source.next_event() => {
                let Some(event) = event else {
                    info!("ingest source exhausted");
                    break;
                };

                match cache.apply(event) {
                    Ok(IngestOutcome::Applied(())) => {
                        counters.applied.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(IngestOutcome::Stale) => {
                        counters.rejected.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(error) => {
                        counters.rejected.fetch_add(1, Ordering::Relaxed);
                        warn!(%error, "rejected stream event");
                    }
                }
            }
        }
    }

    source
}
