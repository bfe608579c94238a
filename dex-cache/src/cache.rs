//! [`DexCache`] facade: the only entry point for ingestion and queries.
//!
//! A write is fully applied (registry, then snapshot or candle store, then ranking views) before
//! the call returns, so a query issued after a write always observes it. Registering a pair is
//! the only structural change and is serialised on its own lock; steady-state updates only take
//! the per-pair lock of the pair they touch.

use crate::{
    bulk::{BulkLoadReport, read_pairs_csv},
    candle::{CandleIngest, CandleStore},
    config::CacheConfig,
    error::CacheError,
    gem::{GemScore, GemScorer},
    momentum::{self, MomentumEntry},
    model::{Address, Candle, Pair, PairMetricsSnapshot, Timeframe, Token},
    ranking::{Direction, Metric, RankingIndex},
    registry::{AddPair, PairRegistry},
    snapshot::{MetricsUpdate, PriceSnapshotTracker},
    spike::{SpikeDetector, VolumeSpike, sort_spikes},
    stream::event::IngestEvent,
};
use chrono::{DateTime, TimeDelta, Utc};
use fnv::FnvHashMap;
use itertools::Itertools;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    io::Read,
    sync::{
        Arc,
        atomic::{AtomicI64, AtomicU64, Ordering},
    },
};
use tracing::{debug, info, trace, warn};

/// Result of an ingest call that was not rejected outright.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome<T> {
    Applied(T),
    /// Older than the pair's cursor: dropped and counted.
    Stale,
}

impl<T> IngestOutcome<T> {
    pub fn is_applied(&self) -> bool {
        matches!(self, IngestOutcome::Applied(_))
    }
}

/// Price change of one pair over a gainers/losers timeframe, clamped to `>= -100%`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RankedChange {
    pub pair_address: Address,
    pub change: f64,
}

/// Per-token aggregate across every pair trading it.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TokenSummary {
    pub token: Token,
    pub pair_count: usize,
    pub volume_24h_usd: f64,
    pub liquidity_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CacheStats {
    pub total_pairs: usize,
    pub total_candles_stored: usize,
    pub last_ingest_timestamp: Option<DateTime<Utc>>,
    pub tokens: usize,
    pub stale_ingests: u64,
}

const UNSET: i64 = i64::MIN;

#[derive(Debug)]
struct IngestClock {
    stale_ingests: AtomicU64,
    /// Newest timestamp carried by any ingested event.
    last_ingest_ms: AtomicI64,
    /// End of the newest candle bucket seen for any pair.
    candle_cursor_ms: AtomicI64,
}

impl Default for IngestClock {
    fn default() -> Self {
        Self {
            stale_ingests: AtomicU64::new(0),
            last_ingest_ms: AtomicI64::new(UNSET),
            candle_cursor_ms: AtomicI64::new(UNSET),
        }
    }
}

impl IngestClock {
    fn observe(&self, time: DateTime<Utc>) {
        self.last_ingest_ms
            .fetch_max(time.timestamp_millis(), Ordering::AcqRel);
    }

    fn advance_cursor(&self, cursor: DateTime<Utc>) {
        self.candle_cursor_ms
            .fetch_max(cursor.timestamp_millis(), Ordering::AcqRel);
    }

    fn load(value: &AtomicI64) -> Option<DateTime<Utc>> {
        match value.load(Ordering::Acquire) {
            UNSET => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }

    fn last_ingest(&self) -> Option<DateTime<Utc>> {
        Self::load(&self.last_ingest_ms)
    }

    fn candle_cursor(&self) -> Option<DateTime<Utc>> {
        Self::load(&self.candle_cursor_ms)
    }
}

/// Process-resident DEX pair analytics cache.
#[derive(Debug)]
pub struct DexCache {
    config: CacheConfig,
    registry: PairRegistry,
    candles: CandleStore,
    snapshots: PriceSnapshotTracker,
    rankings: RankingIndex,
    structural: Mutex<()>,
    clock: IngestClock,
}

impl Default for DexCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl DexCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            candles: CandleStore::new(config.candle_capacity, config.candle_resolution),
            snapshots: PriceSnapshotTracker::new(config.sample_interval, config.sample_capacity),
            registry: PairRegistry::new(),
            rankings: RankingIndex::new(),
            structural: Mutex::new(()),
            clock: IngestClock::default(),
            config,
        }
    }

    /// Construct after validating the configuration.
    pub fn try_new(config: CacheConfig) -> Result<Self, CacheError> {
        config.validate()?;
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Register a pair. Per-pair stores are initialised before the pair becomes visible in the
    /// registry, so no reader ever sees a partially known pair.
    pub fn add_new_pair(&self, pair: Pair) -> AddPair {
        let _structural = self.structural.lock();

        if let Some(existing) = self.registry.get_pair(&pair.address) {
            return AddPair {
                is_new: false,
                pair: existing,
            };
        }

        self.candles.init_pair(&pair.address);
        self.snapshots.init_pair(&pair.address);
        self.clock.observe(pair.created_at);

        let added = self.registry.add_pair(pair);
        debug!(
            pair = %added.pair.address,
            token0 = %added.pair.token0.symbol,
            token1 = %added.pair.token1.symbol,
            dex = %added.pair.dex_name,
            "registered new pair"
        );
        added
    }

    /// Append or merge a candle. Candles older than the pair's open bucket are counted and dropped.
    pub fn ingest_candle(
        &self,
        pair: &str,
        candle: Candle,
    ) -> Result<IngestOutcome<CandleIngest>, CacheError> {
        let pair = self.known_pair(pair)?;

        match self.candles.ingest(&pair, candle) {
            Ok(outcome) => {
                self.clock.observe(candle.bucket_start);
                if let Ok(Some(cursor)) = self.candles.with_series(&pair, |series| series.cursor()) {
                    self.clock.advance_cursor(cursor);
                }
                Ok(IngestOutcome::Applied(outcome))
            }
            Err(error) => self.recover(error),
        }
    }

    /// Replace a pair's snapshot and reposition it in every ranking view.
    pub fn update_snapshot(
        &self,
        pair: &str,
        update: MetricsUpdate,
    ) -> Result<IngestOutcome<PairMetricsSnapshot>, CacheError> {
        let pair = self.known_pair(pair)?;

        let result = self
            .snapshots
            .update(&pair, update, |_, next| self.rankings.apply(next));

        match result {
            Ok(snapshot) => {
                self.clock.observe(update.timestamp);
                Ok(IngestOutcome::Applied(snapshot))
            }
            Err(error) => self.recover(error),
        }
    }

    /// Route a generic ingest event.
    pub fn apply(&self, event: IngestEvent) -> Result<IngestOutcome<()>, CacheError> {
        match event {
            IngestEvent::NewPair(pair) => {
                self.add_new_pair(pair);
                Ok(IngestOutcome::Applied(()))
            }
            IngestEvent::Candle {
                pair_address,
                candle,
            } => self
                .ingest_candle(pair_address.as_str(), candle)
                .map(|outcome| match outcome {
                    IngestOutcome::Applied(_) => IngestOutcome::Applied(()),
                    IngestOutcome::Stale => IngestOutcome::Stale,
                }),
            IngestEvent::Snapshot {
                pair_address,
                price_usd,
                volume_24h_usd,
                liquidity_usd,
                timestamp,
            } => self
                .update_snapshot(
                    pair_address.as_str(),
                    MetricsUpdate {
                        price_usd,
                        volume_24h_usd,
                        liquidity_usd,
                        timestamp,
                    },
                )
                .map(|outcome| match outcome {
                    IngestOutcome::Applied(_) => IngestOutcome::Applied(()),
                    IngestOutcome::Stale => IngestOutcome::Stale,
                }),
        }
    }

    /// Load a pairs CSV in file order. Malformed rows are skipped and counted.
    pub fn bulk_load<R: Read>(&self, reader: R) -> Result<BulkLoadReport, CacheError> {
        let mut report = BulkLoadReport::default();

        for row in read_pairs_csv(reader)? {
            let row = match row {
                Ok(row) => row,
                Err(error) => {
                    warn!(%error, "rejected pairs CSV row");
                    report.rows_rejected += 1;
                    continue;
                }
            };

            for event in row.events {
                match event {
                    IngestEvent::NewPair(pair) => {
                        if self.add_new_pair(pair).is_new {
                            report.pairs_added += 1;
                        }
                    }
                    event => match self.apply(event) {
                        Ok(IngestOutcome::Applied(())) => report.snapshots_applied += 1,
                        Ok(IngestOutcome::Stale) => {}
                        Err(error) => {
                            warn!(line = row.line, %error, "rejected pairs CSV metrics");
                            report.rows_rejected += 1;
                        }
                    },
                }
            }
        }

        info!(
            pairs_added = report.pairs_added,
            snapshots_applied = report.snapshots_applied,
            rows_rejected = report.rows_rejected,
            "bulk load complete"
        );
        Ok(report)
    }

    /// Explicitly overwrite a token's symbol and decimals.
    pub fn correct_token(&self, token: Token) -> Result<(), CacheError> {
        let _structural = self.structural.lock();
        self.registry.correct_token(token)
    }

    pub fn top_gainers(
        &self,
        limit: usize,
        timeframe: Timeframe,
    ) -> Result<Vec<RankedChange>, CacheError> {
        self.ranked_changes(limit, timeframe, Direction::Descending)
    }

    pub fn top_losers(
        &self,
        limit: usize,
        timeframe: Timeframe,
    ) -> Result<Vec<RankedChange>, CacheError> {
        self.ranked_changes(limit, timeframe, Direction::Ascending)
    }

    pub fn top_pairs_by_volume(&self, limit: usize) -> Result<Vec<PairMetricsSnapshot>, CacheError> {
        self.ranked_snapshots(Metric::Volume24h, limit)
    }

    pub fn top_pairs_by_liquidity(
        &self,
        limit: usize,
    ) -> Result<Vec<PairMetricsSnapshot>, CacheError> {
        self.ranked_snapshots(Metric::Liquidity, limit)
    }

    /// Pairs ranked by candle volume in the trailing `window_ms` relative to their liquidity.
    /// The window ends at the newest candle bucket seen by the cache.
    pub fn top_momentum_pairs(
        &self,
        limit: usize,
        window_ms: i64,
    ) -> Result<Vec<MomentumEntry>, CacheError> {
        check_limit(limit)?;
        if window_ms <= 0 {
            return Err(CacheError::InvalidInput(format!(
                "momentum window must be positive, got {window_ms}ms"
            )));
        }

        let Some(end) = self.clock.candle_cursor() else {
            return Ok(Vec::new());
        };
        let from = end
            .checked_sub_signed(TimeDelta::milliseconds(window_ms))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let liquidity: FnvHashMap<Address, Option<f64>> = self
            .snapshots
            .all_current()
            .into_iter()
            .map(|snapshot| (snapshot.pair_address, snapshot.liquidity_usd))
            .collect();

        let mut entries = Vec::new();
        self.candles.for_each(|pair, series| {
            let liquidity = liquidity.get(pair).copied().flatten();
            if let Some(entry) =
                momentum::evaluate(pair, series, from, liquidity, self.config.epsilon)
            {
                entries.push(entry);
            }
        });

        momentum::sort_momentum(&mut entries);
        entries.truncate(limit);
        Ok(entries)
    }

    /// Pairs whose newest bucket volume exceeds their trailing baseline. Pairs without enough
    /// baseline history are omitted.
    pub fn detect_volume_spikes(&self) -> Vec<VolumeSpike> {
        let detector = SpikeDetector {
            baseline_window: self.config.spike_baseline_window,
            min_baseline_candles: self.config.spike_min_baseline_candles,
            ratio_threshold: self.config.spike_ratio_threshold,
            volume_floor: self.config.spike_volume_floor,
            epsilon: self.config.epsilon,
        };

        let mut spikes = Vec::new();
        self.candles
            .for_each(|pair, series| match detector.evaluate(pair, series) {
                Ok(Some(spike)) => spikes.push(spike),
                Ok(None) => {}
                Err(error) => trace!(%pair, %error, "pair skipped for spike detection"),
            });

        sort_spikes(&mut spikes);
        spikes
    }

    /// Most recently created pairs first.
    pub fn recent_new_pairs(&self, limit: usize) -> Result<Vec<Arc<Pair>>, CacheError> {
        check_limit(limit)?;
        Ok(self
            .registry
            .all_pairs()
            .into_iter()
            .sorted_by(|a, b| {
                b.created_at
                    .cmp(&a.created_at)
                    .then_with(|| a.address.cmp(&b.address))
            })
            .take(limit)
            .collect())
    }

    /// Up to `points` most recent candles, oldest first.
    pub fn ohlcv_history(&self, pair: &str, points: usize) -> Result<Vec<Candle>, CacheError> {
        check_limit(points)?;
        let pair = self.known_pair(pair)?;
        self.candles.history(&pair, points)
    }

    pub fn pairs_for_token(&self, token: &str) -> Result<Vec<Arc<Pair>>, CacheError> {
        self.registry.pairs_for_token(&Address::parse(token)?)
    }

    /// Every known token with totals across its pairs, ordered by symbol then address. Totals are
    /// composed from per-pair snapshots read one at a time.
    pub fn unique_tokens(&self) -> Vec<TokenSummary> {
        let snapshots: FnvHashMap<Address, PairMetricsSnapshot> = self
            .snapshots
            .all_current()
            .into_iter()
            .map(|snapshot| (snapshot.pair_address.clone(), snapshot))
            .collect();

        let mut summaries: FnvHashMap<Address, TokenSummary> = self
            .registry
            .tokens()
            .into_iter()
            .map(|token| {
                let summary = TokenSummary {
                    token: token.clone(),
                    pair_count: 0,
                    volume_24h_usd: 0.0,
                    liquidity_usd: 0.0,
                };
                (token.address, summary)
            })
            .collect();

        for pair in self.registry.all_pairs() {
            let snapshot = snapshots.get(&pair.address);
            for token in [&pair.token0.address, &pair.token1.address] {
                if let Some(summary) = summaries.get_mut(token) {
                    summary.pair_count += 1;
                    if let Some(snapshot) = snapshot {
                        summary.volume_24h_usd += snapshot.volume_24h_usd.unwrap_or(0.0);
                        summary.liquidity_usd += snapshot.liquidity_usd.unwrap_or(0.0);
                    }
                }
            }
        }

        summaries
            .into_values()
            .sorted_by(|a, b| {
                a.token
                    .symbol
                    .cmp(&b.token.symbol)
                    .then_with(|| a.token.address.cmp(&b.token.address))
            })
            .collect()
    }

    /// Every pair in registration order.
    pub fn all_pairs(&self) -> Vec<Arc<Pair>> {
        self.registry.all_pairs()
    }

    pub fn pair(&self, pair: &str) -> Result<Arc<Pair>, CacheError> {
        let address = Address::parse(pair)?;
        self.registry
            .get_pair(&address)
            .ok_or_else(|| CacheError::pair_not_found(address.as_str()))
    }

    pub fn snapshot(&self, pair: &str) -> Result<PairMetricsSnapshot, CacheError> {
        let pair = self.known_pair(pair)?;
        self.snapshots.current(&pair)
    }

    /// Deterministic composite score in `[0, 100]`. Age is measured against the newest ingested
    /// timestamp rather than the wall clock.
    pub fn gem_score(&self, pair: &str) -> Result<GemScore, CacheError> {
        let pair = self.pair(pair)?;
        let snapshot = self.snapshots.current(&pair.address)?;
        let recent = self
            .candles
            .history(&pair.address, crate::gem::VOLATILITY_LOOKBACK)?;
        let now = self.clock.last_ingest().unwrap_or(pair.created_at);

        let scorer = GemScorer::new(self.config.gem_weights, self.config.epsilon);
        Ok(scorer.score(&snapshot, pair.created_at, &recent, now))
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            total_pairs: self.registry.len(),
            total_candles_stored: self.candles.total_candles(),
            last_ingest_timestamp: self.clock.last_ingest(),
            tokens: self.registry.token_count(),
            stale_ingests: self.clock.stale_ingests.load(Ordering::Relaxed),
        }
    }

    fn known_pair(&self, pair: &str) -> Result<Address, CacheError> {
        let address = Address::parse(pair)?;
        if self.registry.contains(&address) {
            Ok(address)
        } else {
            Err(CacheError::pair_not_found(address.as_str()))
        }
    }

    /// Count and swallow stale ingests, propagate everything else.
    fn recover<T>(&self, error: CacheError) -> Result<IngestOutcome<T>, CacheError> {
        match error {
            CacheError::StaleIngest {
                ref pair,
                cursor,
                received,
            } => {
                self.clock.stale_ingests.fetch_add(1, Ordering::Relaxed);
                debug!(%pair, cursor, received, "dropped stale ingest");
                Ok(IngestOutcome::Stale)
            }
            error => Err(error),
        }
    }

    fn ranked_changes(
        &self,
        limit: usize,
        timeframe: Timeframe,
        direction: Direction,
    ) -> Result<Vec<RankedChange>, CacheError> {
        check_limit(limit)?;
        let metric = Metric::PriceChange(timeframe);

        Ok(self
            .rankings
            .top_n(metric, direction, limit)
            .into_iter()
            .filter_map(|pair| {
                let snapshot = self.snapshots.current(&pair).ok()?;
                let change = metric.value(&snapshot)?;
                Some(RankedChange {
                    pair_address: pair,
                    change: change.max(-100.0),
                })
            })
            .collect())
    }

    fn ranked_snapshots(
        &self,
        metric: Metric,
        limit: usize,
    ) -> Result<Vec<PairMetricsSnapshot>, CacheError> {
        check_limit(limit)?;
        Ok(self
            .rankings
            .top_n(metric, Direction::Descending, limit)
            .into_iter()
            .filter_map(|pair| self.snapshots.current(&pair).ok())
            .collect())
    }
}

fn check_limit(limit: usize) -> Result<(), CacheError> {
    if limit == 0 {
        Err(CacheError::InvalidInput("limit must be positive".to_string()))
    } else {
        Ok(())
    }
}
