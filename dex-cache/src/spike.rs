//! Volume spike detection against a trailing per-pair baseline.

use crate::{candle::CandleSeries, error::CacheError, model::Address};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, time::Duration};

/// Pair whose latest bucket volume broke away from its baseline.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct VolumeSpike {
    pub pair_address: Address,
    pub baseline_volume: f64,
    pub current_volume: f64,
    pub spike_ratio: f64,
}

/// Thresholds applied by [`SpikeDetector`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpikeDetector {
    pub baseline_window: Duration,
    pub min_baseline_candles: usize,
    pub ratio_threshold: f64,
    pub volume_floor: f64,
    pub epsilon: f64,
}

impl SpikeDetector {
    /// Evaluate one pair. Pairs without enough baseline candles yield
    /// [`CacheError::InsufficientHistory`]; pairs below threshold yield `Ok(None)`.
    pub fn evaluate(
        &self,
        pair: &Address,
        series: &CandleSeries,
    ) -> Result<Option<VolumeSpike>, CacheError> {
        let insufficient = |available| CacheError::InsufficientHistory {
            pair: pair.to_string(),
            required: self.min_baseline_candles.max(1),
            available,
        };

        let current = series.latest().ok_or_else(|| insufficient(0))?;
        let window = TimeDelta::from_std(self.baseline_window).unwrap_or(TimeDelta::MAX);
        let from = current
            .bucket_start
            .checked_sub_signed(window)
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC);

        let (count, total) = series
            .between(from, current.bucket_start)
            .fold((0usize, 0.0), |(count, total), candle| {
                (count + 1, total + candle.volume)
            });

        if count == 0 || count < self.min_baseline_candles {
            return Err(insufficient(count));
        }

        let baseline_volume = total / count as f64;
        let current_volume = current.volume;
        let spike_ratio = current_volume / baseline_volume.max(self.epsilon);

        if spike_ratio > self.ratio_threshold && current_volume > self.volume_floor {
            Ok(Some(VolumeSpike {
                pair_address: pair.clone(),
                baseline_volume,
                current_volume,
                spike_ratio,
            }))
        } else {
            Ok(None)
        }
    }
}

/// Order spikes by ratio descending, then address ascending.
pub fn sort_spikes(spikes: &mut [VolumeSpike]) {
    spikes.sort_by(|a, b| {
        b.spike_ratio
            .partial_cmp(&a.spike_ratio)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.pair_address.cmp(&b.pair_address))
    });
}
