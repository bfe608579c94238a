//! Current metrics per pair, plus the rolling price samples needed to derive 1h and 24h changes.

use crate::{
    error::CacheError,
    model::{Address, PairMetricsSnapshot, Timeframe},
};
use chrono::{DateTime, TimeDelta, Utc};
use fnv::FnvHashMap;
use parking_lot::{Mutex, RwLock};
use std::{collections::VecDeque, sync::Arc, time::Duration};

/// Raw price/volume/liquidity observation for one pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsUpdate {
    pub price_usd: f64,
    pub volume_24h_usd: f64,
    pub liquidity_usd: f64,
    pub timestamp: DateTime<Utc>,
}

impl MetricsUpdate {
    fn validate(&self) -> Result<(), CacheError> {
        let fields = [
            ("price_usd", self.price_usd),
            ("volume_24h_usd", self.volume_24h_usd),
            ("liquidity_usd", self.liquidity_usd),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(CacheError::InvalidInput(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct PriceSample {
    time: DateTime<Utc>,
    price: f64,
}

#[derive(Debug)]
struct PairSamples {
    snapshot: PairMetricsSnapshot,
    samples: VecDeque<PriceSample>,
}

impl PairSamples {
    /// Newest sample at or before `time - window`, provided it is not older than the tolerance.
    fn change_over(&self, now: DateTime<Utc>, price: f64, window: TimeDelta) -> Option<f64> {
        let cutoff = now - window;
        let idx = self.samples.partition_point(|sample| sample.time <= cutoff);
        let reference = self.samples.get(idx.checked_sub(1)?)?;

        if reference.time < cutoff - tolerance(window) || reference.price <= 0.0 {
            return None;
        }

        Some((price - reference.price) / reference.price * 100.0)
    }

    fn record(&mut self, sample: PriceSample, interval: TimeDelta, capacity: usize) {
        let due = self
            .samples
            .back()
            .is_none_or(|last| sample.time - last.time >= interval);
        if due {
            self.samples.push_back(sample);
        }

        // Keep the newest sample at or before the 24h cutoff, drop anything older
        let window = Timeframe::OneDay.duration();
        let cutoff = sample.time - window;
        let horizon = cutoff - tolerance(window);
        while let Some(front) = self.samples.front() {
            let superseded = self
                .samples
                .get(1)
                .is_some_and(|next| next.time <= cutoff);
            if front.time < horizon || superseded {
                self.samples.pop_front();
            } else {
                break;
            }
        }

        while self.samples.len() > capacity {
            self.samples.pop_front();
        }
    }
}

/// How far before a lookback cutoff a reference sample may sit and still count.
fn tolerance(window: TimeDelta) -> TimeDelta {
    window / 12
}

/// Span of samples a pair must be able to retain for the 24h change to resolve.
pub(crate) fn required_sample_span() -> TimeDelta {
    let window = Timeframe::OneDay.duration();
    window + tolerance(window)
}

/// Tracks the current [`PairMetricsSnapshot`] for every registered pair.
#[derive(Debug)]
pub struct PriceSnapshotTracker {
    entries: RwLock<FnvHashMap<Address, Arc<Mutex<PairSamples>>>>,
    sample_interval: TimeDelta,
    sample_capacity: usize,
}

impl PriceSnapshotTracker {
    pub fn new(sample_interval: Duration, sample_capacity: usize) -> Self {
        Self {
            entries: RwLock::new(FnvHashMap::default()),
            sample_interval: TimeDelta::from_std(sample_interval).unwrap_or(TimeDelta::zero()),
            sample_capacity,
        }
    }

    /// Create the empty snapshot for a newly registered pair.
    pub fn init_pair(&self, pair: &Address) {
        self.entries.write().entry(pair.clone()).or_insert_with(|| {
            Arc::new(Mutex::new(PairSamples {
                snapshot: PairMetricsSnapshot::empty(pair.clone()),
                samples: VecDeque::new(),
            }))
        });
    }

    fn get(&self, pair: &Address) -> Result<Arc<Mutex<PairSamples>>, CacheError> {
        self.entries
            .read()
            .get(pair)
            .cloned()
            .ok_or_else(|| CacheError::pair_not_found(pair.as_str()))
    }

    /// Apply an update and publish the new snapshot.
    ///
    /// `publish` runs after the snapshot is replaced but before the pair lock is released, so
    /// every consumer notified for this pair observes updates in the order they were applied.
    pub fn update<F>(
        &self,
        pair: &Address,
        update: MetricsUpdate,
        publish: F,
    ) -> Result<PairMetricsSnapshot, CacheError>
    where
        F: FnOnce(&PairMetricsSnapshot, &PairMetricsSnapshot),
    {
        update.validate()?;
        let entry = self.get(pair)?;
        let mut entry = entry.lock();

        if let Some(last) = entry.snapshot.last_updated {
            if update.timestamp < last {
                return Err(CacheError::StaleIngest {
                    pair: pair.to_string(),
                    cursor: last.timestamp_millis(),
                    received: update.timestamp.timestamp_millis(),
                });
            }
        }

        entry.record(
            PriceSample {
                time: update.timestamp,
                price: update.price_usd,
            },
            self.sample_interval,
            self.sample_capacity,
        );

        let next = PairMetricsSnapshot {
            pair_address: pair.clone(),
            price_usd: Some(update.price_usd),
            volume_24h_usd: Some(update.volume_24h_usd),
            liquidity_usd: Some(update.liquidity_usd),
            price_change_1h: entry.change_over(
                update.timestamp,
                update.price_usd,
                Timeframe::OneHour.duration(),
            ),
            price_change_24h: entry.change_over(
                update.timestamp,
                update.price_usd,
                Timeframe::OneDay.duration(),
            ),
            last_updated: Some(update.timestamp),
        };

        let previous = std::mem::replace(&mut entry.snapshot, next.clone());
        publish(&previous, &next);

        Ok(next)
    }

    pub fn current(&self, pair: &Address) -> Result<PairMetricsSnapshot, CacheError> {
        Ok(self.get(pair)?.lock().snapshot.clone())
    }

    /// Every snapshot. Each is individually consistent; the set is not taken atomically.
    pub fn all_current(&self) -> Vec<PairMetricsSnapshot> {
        let entries: Vec<_> = self.entries.read().values().cloned().collect();
        entries
            .iter()
            .map(|entry| entry.lock().snapshot.clone())
            .collect()
    }
}
