#![forbid(unsafe_code)]
#![warn(unused, clippy::cloned_instead_of_copied, missing_debug_implementations)]

//! # Dex Cache
//! Process-resident analytics cache for decentralised exchange pairs.
//!
//! Ingests new-pair, candle and price snapshot events from any number of producers and serves
//! latency-sensitive queries from incrementally maintained state:
//! - Top gainers / losers over 1h and 24h.
//! - Top pairs by volume and liquidity.
//! - Turnover momentum over a caller-supplied window.
//! - Volume spikes against a trailing baseline.
//! - Per-pair OHLCV history and per-token aggregates.
//! - A deterministic composite "gem" score.
//!
//! Everything goes through [`DexCache`]. Live feeds are attached with a
//! [`StreamService`](stream::service::StreamService), files with [`DexCache::bulk_load`].

/// All [`Error`](std::error::Error)s generated in Dex Cache.
pub mod error;

/// Addresses, tokens, pairs, candles and snapshots.
pub mod model;

/// Thresholds and windows, with `DEX_CACHE_*` environment overrides.
pub mod config;

/// Canonical pairs and tokens.
pub mod registry;

/// Bounded per-pair candle history.
pub mod candle;

/// Current snapshot per pair with rolling 1h / 24h price changes.
pub mod snapshot;

/// Incrementally maintained top-N views.
pub mod ranking;

pub mod momentum;
pub mod spike;
pub mod gem;

/// Facade composing every store.
pub mod cache;

/// CSV bulk import.
pub mod bulk;

/// Live ingestion sources and the streaming service.
pub mod stream;

/// Infrastructure provider registry and benchmark history.
pub mod provider;

pub use cache::{CacheStats, DexCache, IngestOutcome, RankedChange, TokenSummary};
pub use config::CacheConfig;
pub use error::CacheError;
pub use model::{Address, Candle, Pair, PairMetricsSnapshot, Timeframe, Token};
pub use snapshot::MetricsUpdate;
pub use stream::event::IngestEvent;
