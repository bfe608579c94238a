//! Turnover momentum: recent candle volume normalised by pool liquidity.

use crate::{candle::CandleSeries, model::Address};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MomentumEntry {
    pub pair_address: Address,
    pub score: f64,
    pub window_volume: f64,
}

/// Score one pair over candles starting at or after `from`. Pairs with no volume in the window
/// or no observed liquidity are not ranked.
pub fn evaluate(
    pair: &Address,
    series: &CandleSeries,
    from: DateTime<Utc>,
    liquidity: Option<f64>,
    epsilon: f64,
) -> Option<MomentumEntry> {
    let liquidity = liquidity?;
    let window_volume: f64 = series.since(from).map(|candle| candle.volume).sum();

    if window_volume <= 0.0 {
        return None;
    }

    Some(MomentumEntry {
        pair_address: pair.clone(),
        score: window_volume / liquidity.max(epsilon),
        window_volume,
    })
}

/// Order by score descending, then raw window volume descending, then address ascending.
pub fn sort_momentum(entries: &mut [MomentumEntry]) {
    entries.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                b.window_volume
                    .partial_cmp(&a.window_volume)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.pair_address.cmp(&b.pair_address))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Candle;
    use std::time::Duration;

    fn series(volumes: &[(i64, f64)]) -> CandleSeries {
        let pair = Address::parse("0xpair").unwrap();
        let mut series = CandleSeries::new(500, Duration::from_secs(60));
        for (minute, volume) in volumes {
            series
                .ingest(
                    &pair,
                    Candle {
                        bucket_start: DateTime::from_timestamp(minute * 60, 0).unwrap(),
                        open: 1.0,
                        high: 1.0,
                        low: 1.0,
                        close: 1.0,
                        volume: *volume,
                    },
                )
                .unwrap();
        }
        series
    }

    #[test]
    fn test_evaluate() {
        struct TestCase {
            volumes: Vec<(i64, f64)>,
            from_minute: i64,
            liquidity: Option<f64>,
            expected: Option<(f64, f64)>,
        }

        let tests = vec![
            TestCase {
                // TC0: only candles inside the window count
                volumes: vec![(0, 100.0), (5, 200.0), (6, 300.0)],
                from_minute: 5,
                liquidity: Some(1_000.0),
                expected: Some((0.5, 500.0)),
            },
            TestCase {
                // TC1: zero liquidity is floored at epsilon
                volumes: vec![(0, 10.0)],
                from_minute: 0,
                liquidity: Some(0.0),
                expected: Some((10.0, 10.0)),
            },
            TestCase {
                // TC2: unobserved liquidity is not ranked
                volumes: vec![(0, 10.0)],
                from_minute: 0,
                liquidity: None,
                expected: None,
            },
            TestCase {
                // TC3: nothing traded inside the window
                volumes: vec![(0, 10.0)],
                from_minute: 1,
                liquidity: Some(1.0),
                expected: None,
            },
        ];

        let pair = Address::parse("0xpair").unwrap();
        for (index, test) in tests.into_iter().enumerate() {
            let from = DateTime::from_timestamp(test.from_minute * 60, 0).unwrap();
            let actual = evaluate(&pair, &series(&test.volumes), from, test.liquidity, 1.0)
                .map(|entry| (entry.score, entry.window_volume));
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_sort_momentum_tie_breaks() {
        let entry = |address: &str, score: f64, window_volume: f64| MomentumEntry {
            pair_address: Address::parse(address).unwrap(),
            score,
            window_volume,
        };

        let mut entries = vec![
            entry("0xd", 1.0, 10.0),
            entry("0xc", 2.0, 5.0),
            entry("0xb", 1.0, 50.0),
            entry("0xa", 1.0, 10.0),
        ];
        sort_momentum(&mut entries);

        let order: Vec<_> = entries.iter().map(|e| e.pair_address.to_string()).collect();
        assert_eq!(order, vec!["0xc", "0xb", "0xa", "0xd"]);
    }
}
