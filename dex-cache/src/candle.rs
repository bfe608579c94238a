//! Per-pair bounded OHLCV history.
//!
//! Bucket boundaries come from the candle timestamps, never the wall clock, so backfilled and
//! live candles land in the same buckets.

use crate::{
    error::CacheError,
    model::{Address, Candle},
};
use chrono::{DateTime, TimeDelta, Utc};
use fnv::FnvHashMap;
use parking_lot::{Mutex, RwLock};
use std::{collections::VecDeque, sync::Arc, time::Duration};

/// What [`CandleSeries::ingest`] did with an incoming candle.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CandleIngest {
    /// A new bucket was opened.
    Opened,
    /// The candle merged into the current open bucket.
    Merged,
    /// A new bucket was opened and the oldest bucket evicted to stay within capacity.
    Evicted,
}

/// Ring buffer of candles for a single pair, oldest first.
#[derive(Debug, Clone)]
pub struct CandleSeries {
    candles: VecDeque<Candle>,
    capacity: usize,
    resolution_ms: i64,
}

impl CandleSeries {
    pub fn new(capacity: usize, resolution: Duration) -> Self {
        Self {
            candles: VecDeque::with_capacity(capacity),
            capacity,
            resolution_ms: (resolution.as_millis() as i64).max(1),
        }
    }

    /// Align a timestamp to the start of its bucket.
    #[inline]
    fn align(&self, time: DateTime<Utc>) -> DateTime<Utc> {
        let ms = time.timestamp_millis();
        let aligned = ms.div_euclid(self.resolution_ms) * self.resolution_ms;
        DateTime::from_timestamp_millis(aligned).unwrap_or(time)
    }

    /// Append or merge a candle. Buckets older than the current open bucket are rejected.
    pub fn ingest(&mut self, pair: &Address, candle: Candle) -> Result<CandleIngest, CacheError> {
        candle.validate()?;
        let bucket_start = self.align(candle.bucket_start);

        let current_start = self.candles.back().map(|current| current.bucket_start);

        match current_start {
            Some(current_start) if bucket_start < current_start => Err(CacheError::StaleIngest {
                pair: pair.to_string(),
                cursor: current_start.timestamp_millis(),
                received: bucket_start.timestamp_millis(),
            }),
            Some(current_start) if bucket_start == current_start => {
                if let Some(current) = self.candles.back_mut() {
                    current.high = current.high.max(candle.high).max(candle.close);
                    current.low = current.low.min(candle.low).min(candle.close);
                    current.close = candle.close;
                    current.volume += candle.volume;
                }
                Ok(CandleIngest::Merged)
            }
            _ => {
                let evicted = if self.candles.len() >= self.capacity {
                    self.candles.pop_front();
                    true
                } else {
                    false
                };

                self.candles.push_back(Candle {
                    bucket_start,
                    open: candle.open,
                    high: candle.high.max(candle.open).max(candle.close),
                    low: candle.low.min(candle.open).min(candle.close),
                    close: candle.close,
                    volume: candle.volume,
                });

                Ok(if evicted {
                    CandleIngest::Evicted
                } else {
                    CandleIngest::Opened
                })
            }
        }
    }

    /// Up to `max_points` most recent candles, oldest first.
    pub fn last_n(&self, max_points: usize) -> Vec<Candle> {
        let start = self.candles.len().saturating_sub(max_points);
        self.candles.range(start..).copied().collect()
    }

    /// Candles whose bucket starts at or after `since`, oldest first.
    pub fn since(&self, since: DateTime<Utc>) -> impl Iterator<Item = &Candle> {
        let start = self.candles.partition_point(|candle| candle.bucket_start < since);
        self.candles.range(start..)
    }

    /// Candles whose bucket starts within `[from, to)`.
    pub fn between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> impl Iterator<Item = &Candle> {
        self.since(from).take_while(move |candle| candle.bucket_start < to)
    }

    pub fn latest(&self) -> Option<&Candle> {
        self.candles.back()
    }

    /// End of the most recent bucket.
    pub fn cursor(&self) -> Option<DateTime<Utc>> {
        self.latest()
            .map(|candle| candle.bucket_start + TimeDelta::milliseconds(self.resolution_ms))
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }
}

/// Per-pair candle series. The outer map only changes when a pair is registered, so steady-state
/// ingestion takes the outer lock for reading and serialises on the pair's own mutex.
#[derive(Debug)]
pub struct CandleStore {
    series: RwLock<FnvHashMap<Address, Arc<Mutex<CandleSeries>>>>,
    capacity: usize,
    resolution: Duration,
}

impl CandleStore {
    pub fn new(capacity: usize, resolution: Duration) -> Self {
        Self {
            series: RwLock::new(FnvHashMap::default()),
            capacity,
            resolution,
        }
    }

    /// Create an empty series for a newly registered pair.
    pub fn init_pair(&self, pair: &Address) {
        self.series
            .write()
            .entry(pair.clone())
            .or_insert_with(|| Arc::new(Mutex::new(CandleSeries::new(self.capacity, self.resolution))));
    }

    fn get(&self, pair: &Address) -> Result<Arc<Mutex<CandleSeries>>, CacheError> {
        self.series
            .read()
            .get(pair)
            .cloned()
            .ok_or_else(|| CacheError::pair_not_found(pair.as_str()))
    }

    pub fn ingest(&self, pair: &Address, candle: Candle) -> Result<CandleIngest, CacheError> {
        self.get(pair)?.lock().ingest(pair, candle)
    }

    /// Ordered history, oldest first, of length `min(stored, max_points)`.
    pub fn history(&self, pair: &Address, max_points: usize) -> Result<Vec<Candle>, CacheError> {
        Ok(self.get(pair)?.lock().last_n(max_points))
    }

    /// Run `f` against a pair's series while holding its lock.
    pub fn with_series<F, T>(&self, pair: &Address, f: F) -> Result<T, CacheError>
    where
        F: FnOnce(&CandleSeries) -> T,
    {
        let series = self.get(pair)?;
        let guard = series.lock();
        Ok(f(&guard))
    }

    /// Run `f` against every series, one pair lock at a time.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&Address, &CandleSeries),
    {
        let series: Vec<_> = self
            .series
            .read()
            .iter()
            .map(|(address, series)| (address.clone(), Arc::clone(series)))
            .collect();

        for (address, series) in series {
            f(&address, &series.lock());
        }
    }

    pub fn total_candles(&self) -> usize {
        let mut total = 0;
        self.for_each(|_, series| total += series.len());
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(minute: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Candle {
        Candle {
            bucket_start: DateTime::from_timestamp(minute * 60, 0).unwrap(),
            open,
            high,
            low,
            close,
            volume,
        }
    }

    fn pair() -> Address {
        Address::parse("0xpair").unwrap()
    }

    #[test]
    fn test_merge_within_bucket() {
        let mut series = CandleSeries::new(10, Duration::from_secs(60));

        assert_eq!(
            series.ingest(&pair(), candle(1, 100.0, 101.0, 99.0, 100.5, 10.0)),
            Ok(CandleIngest::Opened)
        );

        // Same minute, 30s later: aligned into the open bucket
        let mut update = candle(1, 100.5, 104.0, 98.0, 103.0, 5.0);
        update.bucket_start += TimeDelta::seconds(30);
        assert_eq!(series.ingest(&pair(), update), Ok(CandleIngest::Merged));

        let merged = series.latest().copied().unwrap();
        assert_eq!(merged.open, 100.0);
        assert_eq!(merged.high, 104.0);
        assert_eq!(merged.low, 98.0);
        assert_eq!(merged.close, 103.0);
        assert_eq!(merged.volume, 15.0);
        assert_eq!(series.len(), 1);
    }

    #[test]
    fn test_stale_bucket_rejected() {
        let mut series = CandleSeries::new(10, Duration::from_secs(60));
        series
            .ingest(&pair(), candle(5, 1.0, 1.0, 1.0, 1.0, 1.0))
            .unwrap();

        let actual = series.ingest(&pair(), candle(4, 1.0, 1.0, 1.0, 1.0, 1.0));
        assert_eq!(
            actual,
            Err(CacheError::StaleIngest {
                pair: "0xpair".to_string(),
                cursor: 300_000,
                received: 240_000,
            })
        );
        assert_eq!(series.len(), 1);
    }

    #[test]
    fn test_ring_buffer_evicts_oldest() {
        let mut series = CandleSeries::new(3, Duration::from_secs(60));

        let outcomes: Vec<_> = (0..5)
            .map(|minute| {
                series
                    .ingest(&pair(), candle(minute, 1.0, 1.0, 1.0, 1.0, minute as f64))
                    .unwrap()
            })
            .collect();

        assert_eq!(
            outcomes,
            vec![
                CandleIngest::Opened,
                CandleIngest::Opened,
                CandleIngest::Opened,
                CandleIngest::Evicted,
                CandleIngest::Evicted,
            ]
        );
        assert_eq!(series.len(), 3);
        let volumes: Vec<_> = series.last_n(10).iter().map(|c| c.volume).collect();
        assert_eq!(volumes, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_new_bucket_widens_high_low() {
        let mut series = CandleSeries::new(3, Duration::from_secs(60));
        // Feed reports high/low that do not cover open/close
        series
            .ingest(&pair(), candle(0, 10.0, 9.0, 11.0, 12.0, 1.0))
            .unwrap();

        let stored = series.latest().copied().unwrap();
        assert_eq!(stored.high, 12.0);
        assert_eq!(stored.low, 9.0);
        assert!(stored.high >= stored.open.max(stored.close));
        assert!(stored.low <= stored.open.min(stored.close));
    }

    #[test]
    fn test_history_bounded_and_ordered() {
        let store = CandleStore::new(500, Duration::from_secs(60));
        store.init_pair(&pair());
        for minute in 0..10 {
            store
                .ingest(&pair(), candle(minute, 1.0, 2.0, 0.5, 1.5, 1.0))
                .unwrap();
        }

        let history = store.history(&pair(), 4).unwrap();
        assert_eq!(history.len(), 4);
        assert!(
            history
                .windows(2)
                .all(|w| w[0].bucket_start < w[1].bucket_start)
        );
        assert_eq!(
            history.last().unwrap().bucket_start,
            DateTime::from_timestamp(9 * 60, 0).unwrap()
        );

        assert_eq!(store.history(&pair(), 100).unwrap().len(), 10);
        assert_eq!(store.total_candles(), 10);
    }

    #[test]
    fn test_unknown_pair() {
        let store = CandleStore::new(10, Duration::from_secs(60));
        assert!(matches!(
            store.history(&pair(), 10),
            Err(CacheError::NotFound { .. })
        ));
    }

    #[test]
    fn test_between_window() {
        let mut series = CandleSeries::new(10, Duration::from_secs(60));
        for minute in 0..6 {
            series
                .ingest(&pair(), candle(minute, 1.0, 1.0, 1.0, 1.0, minute as f64))
                .unwrap();
        }

        let from = DateTime::from_timestamp(2 * 60, 0).unwrap();
        let to = DateTime::from_timestamp(5 * 60, 0).unwrap();
        let volumes: Vec<_> = series.between(from, to).map(|c| c.volume).collect();
        assert_eq!(volumes, vec![2.0, 3.0, 4.0]);
        assert_eq!(
            series.cursor(),
            Some(DateTime::from_timestamp(6 * 60, 0).unwrap())
        );
    }
}
