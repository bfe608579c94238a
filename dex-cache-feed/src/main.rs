use dex_cache::{
    CacheConfig, DexCache, Timeframe,
    stream::{
        service::StreamService,
        websocket::{WebSocketConfig, WebSocketSource},
    },
};
use std::{sync::Arc, time::Duration};
use tokio::time::interval;
use tracing::{error, info, warn};

/// Leaderboard size logged on every report tick.
const REPORT_TOP_N: usize = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    init_logging();

    info!("Starting dex-cache feed");

    // Cache thresholds from DEX_CACHE_* env vars
    let config = CacheConfig::from_env()?;
    info!(?config, "cache configuration");
    let cache = Arc::new(DexCache::try_new(config)?);

    // Optional CSV preload via DEX_FEED_CSV
    if let Ok(path) = std::env::var("DEX_FEED_CSV") {
        match std::fs::File::open(&path) {
            Ok(file) => {
                let report = cache.bulk_load(file)?;
                info!(
                    %path,
                    pairs_added = report.pairs_added,
                    rows_rejected = report.rows_rejected,
                    "preloaded pairs"
                );
            }
            Err(e) => error!(%path, "Failed to open pairs CSV: {}", e),
        }
    }

    // Configurable via DEX_FEED_URL env var (default: ws://127.0.0.1:9001)
    let url = std::env::var("DEX_FEED_URL").unwrap_or_else(|_| "ws://127.0.0.1:9001".to_string());

    // Configurable via DEX_FEED_REPORT_SECS env var (default: 30)
    let report_secs = std::env::var("DEX_FEED_REPORT_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|secs: &u64| *secs > 0)
        .unwrap_or(30);

    let source = WebSocketSource::connect(WebSocketConfig::new(url));
    let service = StreamService::new(Arc::clone(&cache), source);
    let status = service.start().await?;
    info!(?status, "feed attached");

    let mut report = interval(Duration::from_secs(report_secs));
    loop {
        tokio::select! {
            _ = report.tick() => log_report(&cache, &service).await,
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Failed to listen for shutdown signal: {}", e);
                }
                break;
            }
        }
    }

    let status = service.stop().await;
    info!(
        events_applied = status.events_applied,
        events_rejected = status.events_rejected,
        "feed stopped"
    );

    Ok(())
}

async fn log_report(cache: &DexCache, service: &StreamService) {
    let stats = cache.stats();
    let status = service.status().await;
    info!(
        pairs = stats.total_pairs,
        tokens = stats.tokens,
        candles = stats.total_candles_stored,
        stale = stats.stale_ingests,
        applied = status.events_applied,
        rejected = status.events_rejected,
        last_ingest = ?stats.last_ingest_timestamp,
        "cache stats"
    );

    if let Ok(top) = cache.top_pairs_by_volume(REPORT_TOP_N) {
        for (rank, snapshot) in top.iter().enumerate() {
            info!(
                rank = rank + 1,
                pair = %snapshot.pair_address,
                volume_24h_usd = ?snapshot.volume_24h_usd,
                "top volume"
            );
        }
    }

    if let Ok(gainers) = cache.top_gainers(REPORT_TOP_N, Timeframe::OneHour) {
        for gainer in gainers {
            info!(pair = %gainer.pair_address, change_1h = gainer.change, "top gainer");
        }
    }

    for spike in cache.detect_volume_spikes().into_iter().take(REPORT_TOP_N) {
        warn!(
            pair = %spike.pair_address,
            ratio = spike.spike_ratio,
            current_volume = spike.current_volume,
            baseline_volume = spike.baseline_volume,
            "volume spike"
        );
    }
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // DEX_FEED_LOG_JSON=1 switches to one JSON object per line
    if std::env::var("DEX_FEED_LOG_JSON").is_ok_and(|v| v == "1") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
