use crate::provider::BlockHeightSample;
use chrono::{DateTime, TimeDelta, Utc};
use fnv::{FnvHashMap, FnvHasher};
use parking_lot::RwLock;
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use std::{
    collections::VecDeque,
    hash::{Hash, Hasher},
};

/// Upper bound on points generated per call, one week of minutes.
pub const MAX_SYNTHETIC_POINTS: usize = 7 * 24 * 60;

/// One historical benchmark point for a provider.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    pub block_height: Option<u64>,
    pub latency_ms: f64,
}

/// Source of per-provider history. Callers depend only on this trait so the backing store can be
/// swapped without touching them.
pub trait MetricsHistory: Send + Sync {
    /// Up to `points` most recent points for `provider`, oldest first.
    fn history(&self, provider: &str, points: usize) -> Vec<MetricPoint>;
}

/// Deterministic generated history, for demos and UI development.
///
/// The same seed and provider name always produce the same series.
#[derive(Debug, Clone)]
pub struct SyntheticHistory {
    seed: u64,
    end: DateTime<Utc>,
    interval: TimeDelta,
}

impl SyntheticHistory {
    pub fn new(seed: u64, end: DateTime<Utc>, interval: TimeDelta) -> Self {
        Self {
            seed,
            end,
            interval,
        }
    }

    fn rng_for(&self, provider: &str) -> StdRng {
        let mut hasher = FnvHasher::default();
        provider.hash(&mut hasher);
        StdRng::seed_from_u64(self.seed ^ hasher.finish())
    }
}

impl MetricsHistory for SyntheticHistory {
    fn history(&self, provider: &str, points: usize) -> Vec<MetricPoint> {
        let points = points.min(MAX_SYNTHETIC_POINTS);
        let mut rng = self.rng_for(provider);
        let base_latency = rng.random_range(40.0..200.0);
        let mut height: u64 = rng.random_range(18_000_000..22_000_000);

        (0..points)
            .filter_map(|index| {
                height += rng.random_range(0..3);
                let latency_ms = base_latency * rng.random_range(0.7..1.6);

                // Points whose timestamp would fall outside chrono's range are dropped
                let steps_back = i32::try_from(points - 1 - index).ok()?;
                let timestamp = self
                    .end
                    .checked_sub_signed(self.interval.checked_mul(steps_back)?)?;
                Some(MetricPoint {
                    timestamp,
                    block_height: Some(height),
                    latency_ms,
                })
            })
            .collect()
    }
}

/// History recorded from live block height polls, bounded per provider.
#[derive(Debug)]
pub struct RecordedHistory {
    capacity: usize,
    series: RwLock<FnvHashMap<String, VecDeque<MetricPoint>>>,
}

impl RecordedHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            series: RwLock::new(FnvHashMap::default()),
        }
    }

    /// Append a batch of poll results. Failed polls are kept with no height.
    pub fn record(&self, samples: &[BlockHeightSample]) {
        let mut series = self.series.write();
        for sample in samples {
            let points = series.entry(sample.provider.clone()).or_default();
            points.push_back(MetricPoint {
                timestamp: sample.observed_at,
                block_height: sample.height.as_ref().ok().copied(),
                latency_ms: sample.latency.as_secs_f64() * 1_000.0,
            });
            while points.len() > self.capacity {
                points.pop_front();
            }
        }
    }
}

impl MetricsHistory for RecordedHistory {
    fn history(&self, provider: &str, points: usize) -> Vec<MetricPoint> {
        self.series
            .read()
            .get(provider)
            .map(|series| {
                let start = series.len().saturating_sub(points);
                series.range(start..).cloned().collect()
            })
            .unwrap_or_default()
    }
}
