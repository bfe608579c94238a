//! Incrementally maintained top-N views over the current snapshots.
//!
//! Each view is an ordered set keyed by `(score, address)`, so a query walks the first K entries
//! and an update is one removal plus one insertion. Ties always resolve by address ascending.

use crate::model::{Address, PairMetricsSnapshot, Timeframe};
use fnv::FnvHashMap;
use parking_lot::RwLock;
use std::{cmp::Ordering, collections::BTreeSet};

/// Snapshot metric a view is ordered by.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Metric {
    Volume24h,
    Liquidity,
    PriceChange(Timeframe),
}

impl Metric {
    /// Observed value of this metric, `None` if the pair has no data for it.
    pub fn value(&self, snapshot: &PairMetricsSnapshot) -> Option<f64> {
        match self {
            Metric::Volume24h => snapshot.volume_24h_usd,
            Metric::Liquidity => snapshot.liquidity_usd,
            Metric::PriceChange(Timeframe::OneHour) => snapshot.price_change_1h,
            Metric::PriceChange(Timeframe::OneDay) => snapshot.price_change_24h,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Totally ordered finite `f64`, pre-negated for descending views so the set is always walked
/// front to back.
#[derive(Debug, Copy, Clone)]
struct Score(f64);

impl Score {
    fn keyed(value: f64, direction: Direction) -> Self {
        match direction {
            Direction::Ascending => Score(value + 0.0),
            // + 0.0 folds -0.0 into 0.0 so equal scores tie on address
            Direction::Descending => Score(-value + 0.0),
        }
    }
}

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Default)]
struct View {
    entries: BTreeSet<(Score, Address)>,
    keys: FnvHashMap<Address, Score>,
}

impl View {
    fn upsert(&mut self, pair: &Address, score: Option<Score>) {
        if let Some(previous) = self.keys.remove(pair) {
            self.entries.remove(&(previous, pair.clone()));
        }
        if let Some(score) = score {
            self.entries.insert((score, pair.clone()));
            self.keys.insert(pair.clone(), score);
        }
    }

    fn top(&self, limit: usize) -> Vec<Address> {
        self.entries
            .iter()
            .take(limit)
            .map(|(_, address)| address.clone())
            .collect()
    }
}

/// Every maintained (metric, direction) view.
const VIEWS: [(Metric, Direction); 6] = [
    (Metric::Volume24h, Direction::Descending),
    (Metric::Liquidity, Direction::Descending),
    (Metric::PriceChange(Timeframe::OneHour), Direction::Descending),
    (Metric::PriceChange(Timeframe::OneHour), Direction::Ascending),
    (Metric::PriceChange(Timeframe::OneDay), Direction::Descending),
    (Metric::PriceChange(Timeframe::OneDay), Direction::Ascending),
];

/// Sorted views over snapshot metrics. Holds keys only: values are re-read from the snapshot
/// tracker when a query needs them.
#[derive(Debug)]
pub struct RankingIndex {
    views: Vec<((Metric, Direction), RwLock<View>)>,
}

impl Default for RankingIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl RankingIndex {
    pub fn new() -> Self {
        Self {
            views: VIEWS
                .iter()
                .map(|key| (*key, RwLock::new(View::default())))
                .collect(),
        }
    }

    fn view(&self, metric: Metric, direction: Direction) -> Option<&RwLock<View>> {
        self.views
            .iter()
            .find(|(key, _)| *key == (metric, direction))
            .map(|(_, view)| view)
    }

    /// Reposition a pair in every view to match its latest snapshot.
    pub fn apply(&self, snapshot: &PairMetricsSnapshot) {
        for ((metric, direction), view) in &self.views {
            let score = metric
                .value(snapshot)
                .filter(|value| value.is_finite())
                .map(|value| Score::keyed(value, *direction));
            view.write().upsert(&snapshot.pair_address, score);
        }
    }

    /// Up to `limit` pairs ordered by `metric` in `direction`. Pairs without data for the metric
    /// are excluded.
    pub fn top_n(&self, metric: Metric, direction: Direction, limit: usize) -> Vec<Address> {
        match self.view(metric, direction) {
            Some(view) => view.read().top(limit),
            None => Vec::new(),
        }
    }

    /// Number of pairs ranked by `metric`.
    pub fn ranked(&self, metric: Metric) -> usize {
        self.views
            .iter()
            .find(|((candidate, _), _)| *candidate == metric)
            .map(|(_, view)| view.read().keys.len())
            .unwrap_or(0)
    }

    pub fn is_maintained(metric: Metric, direction: Direction) -> bool {
        VIEWS.contains(&(metric, direction))
    }
}
