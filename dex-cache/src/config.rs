//! Tunable thresholds and windows for the cache.
//!
//! Defaults are reasonable for one-minute candles on an EVM DEX feed. Every field can be
//! overridden from a `DEX_CACHE_*` environment variable via [`CacheConfig::from_env`].

use crate::{error::CacheError, snapshot::required_sample_span};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Weights applied to each gem score component. Must sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct GemWeights {
    pub liquidity: f64,
    pub turnover: f64,
    pub age: f64,
    pub volatility: f64,
}

impl Default for GemWeights {
    fn default() -> Self {
        Self {
            liquidity: 0.35,
            turnover: 0.25,
            age: 0.15,
            volatility: 0.25,
        }
    }
}

impl GemWeights {
    pub fn total(&self) -> f64 {
        self.liquidity + self.turnover + self.age + self.volatility
    }
}

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Width of one candle bucket
    pub candle_resolution: Duration,
    /// Buckets retained per pair before the oldest is evicted
    pub candle_capacity: usize,
    /// Minimum spacing between retained price samples
    pub sample_interval: Duration,
    /// Hard cap on retained price samples per pair
    pub sample_capacity: usize,
    /// Lookback preceding the current bucket used to compute the volume baseline
    pub spike_baseline_window: Duration,
    /// Baseline candles required before a pair is eligible for spike detection
    pub spike_min_baseline_candles: usize,
    /// Ratio of current to baseline volume above which a spike is reported
    pub spike_ratio_threshold: f64,
    /// Absolute current volume (USD) below which spikes are ignored
    pub spike_volume_floor: f64,
    /// Lower bound applied to liquidity and baselines before dividing
    pub epsilon: f64,
    pub gem_weights: GemWeights,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            candle_resolution: Duration::from_secs(60),
            candle_capacity: 500,
            sample_interval: Duration::from_secs(30),
            sample_capacity: 3_200,
            spike_baseline_window: Duration::from_secs(10 * 60),
            spike_min_baseline_candles: 1,
            spike_ratio_threshold: 3.0,
            spike_volume_floor: 1_000.0,
            epsilon: 1.0,
            gem_weights: GemWeights::default(),
        }
    }
}

impl CacheConfig {
    /// Build a configuration from `DEX_CACHE_*` environment variables, falling back to defaults
    pub fn from_env() -> Result<Self, CacheError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup, falling back to defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CacheError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| -> Result<Duration, CacheError> {
            parse_var::<u64, _>(&lookup, key)
                .map(|value| value.map(Duration::from_secs).unwrap_or(default))
        };

        let config = Self {
            candle_resolution: secs(
                "DEX_CACHE_CANDLE_RESOLUTION_SECS",
                defaults.candle_resolution,
            )?,
            candle_capacity: parse_var(&lookup, "DEX_CACHE_CANDLE_CAPACITY")?
                .unwrap_or(defaults.candle_capacity),
            sample_interval: secs("DEX_CACHE_SAMPLE_INTERVAL_SECS", defaults.sample_interval)?,
            sample_capacity: parse_var(&lookup, "DEX_CACHE_SAMPLE_CAPACITY")?
                .unwrap_or(defaults.sample_capacity),
            spike_baseline_window: secs(
                "DEX_CACHE_SPIKE_BASELINE_SECS",
                defaults.spike_baseline_window,
            )?,
            spike_min_baseline_candles: parse_var(&lookup, "DEX_CACHE_SPIKE_MIN_BASELINE")?
                .unwrap_or(defaults.spike_min_baseline_candles),
            spike_ratio_threshold: parse_var(&lookup, "DEX_CACHE_SPIKE_RATIO")?
                .unwrap_or(defaults.spike_ratio_threshold),
            spike_volume_floor: parse_var(&lookup, "DEX_CACHE_SPIKE_VOLUME_FLOOR")?
                .unwrap_or(defaults.spike_volume_floor),
            epsilon: parse_var(&lookup, "DEX_CACHE_EPSILON")?.unwrap_or(defaults.epsilon),
            gem_weights: defaults.gem_weights,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would break the cache invariants
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.candle_resolution.is_zero() {
            return Err(CacheError::InvalidInput(
                "candle_resolution must be positive".to_string(),
            ));
        }
        if self.candle_capacity == 0 || self.sample_capacity == 0 {
            return Err(CacheError::InvalidInput(
                "candle_capacity and sample_capacity must be positive".to_string(),
            ));
        }
        if self.sample_interval.is_zero() {
            return Err(CacheError::InvalidInput(
                "sample_interval must be positive".to_string(),
            ));
        }
        let retained = self.sample_interval.as_secs_f64() * self.sample_capacity as f64;
        let required = required_sample_span().num_seconds() as f64;
        if retained < required {
            return Err(CacheError::InvalidInput(format!(
                "sample_interval * sample_capacity covers {retained}s, price changes need {required}s"
            )));
        }
        if !(self.spike_ratio_threshold.is_finite() && self.spike_ratio_threshold > 0.0) {
            return Err(CacheError::InvalidInput(format!(
                "spike_ratio_threshold must be positive, got {}",
                self.spike_ratio_threshold
            )));
        }
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(CacheError::InvalidInput(format!(
                "epsilon must be positive, got {}",
                self.epsilon
            )));
        }
        if (self.gem_weights.total() - 1.0).abs() > 1e-6 {
            return Err(CacheError::InvalidInput(format!(
                "gem weights must sum to 1, got {}",
                self.gem_weights.total()
            )));
        }
        Ok(())
    }

    /// Set candle bucket width
    pub fn with_candle_resolution(mut self, resolution: Duration) -> Self {
        self.candle_resolution = resolution;
        self
    }

    /// Set candle ring buffer capacity
    pub fn with_candle_capacity(mut self, capacity: usize) -> Self {
        self.candle_capacity = capacity;
        self
    }

    /// Set price sample spacing
    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    /// Set price sample cap per pair
    pub fn with_sample_capacity(mut self, capacity: usize) -> Self {
        self.sample_capacity = capacity;
        self
    }

    /// Set spike baseline lookback
    pub fn with_spike_baseline_window(mut self, window: Duration) -> Self {
        self.spike_baseline_window = window;
        self
    }

    /// Set spike ratio threshold
    pub fn with_spike_ratio_threshold(mut self, threshold: f64) -> Self {
        self.spike_ratio_threshold = threshold;
        self
    }

    /// Set spike absolute volume floor
    pub fn with_spike_volume_floor(mut self, floor: f64) -> Self {
        self.spike_volume_floor = floor;
        self
    }

    /// Set gem score component weights
    pub fn with_gem_weights(mut self, weights: GemWeights) -> Self {
        self.gem_weights = weights;
        self
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, CacheError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| CacheError::InvalidInput(format!("{key} has invalid value: {raw}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.candle_resolution, Duration::from_secs(60));
        assert_eq!(config.candle_capacity, 500);
        assert_eq!(config.spike_ratio_threshold, 3.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = CacheConfig::default()
            .with_candle_resolution(Duration::from_secs(300))
            .with_candle_capacity(100)
            .with_spike_ratio_threshold(5.0)
            .with_spike_volume_floor(0.0);

        assert_eq!(config.candle_resolution, Duration::from_secs(300));
        assert_eq!(config.candle_capacity, 100);
        assert_eq!(config.spike_ratio_threshold, 5.0);
        assert_eq!(config.spike_volume_floor, 0.0);
    }

    #[test]
    fn test_config_from_lookup() {
        struct TestCase {
            vars: Vec<(&'static str, &'static str)>,
            expected: Result<(usize, f64), ()>,
        }

        let tests = vec![
            TestCase {
                // TC0: no overrides yields defaults
                vars: vec![],
                expected: Ok((500, 3.0)),
            },
            TestCase {
                // TC1: overrides are applied
                vars: vec![
                    ("DEX_CACHE_CANDLE_CAPACITY", "50"),
                    ("DEX_CACHE_SPIKE_RATIO", " 4.5 "),
                ],
                expected: Ok((50, 4.5)),
            },
            TestCase {
                // TC2: unparsable value is rejected
                vars: vec![("DEX_CACHE_CANDLE_CAPACITY", "many")],
                expected: Err(()),
            },
            TestCase {
                // TC3: parsable but invalid value fails validation
                vars: vec![("DEX_CACHE_CANDLE_CAPACITY", "0")],
                expected: Err(()),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = CacheConfig::from_lookup(lookup(&test.vars));
            match (actual, test.expected) {
                (Ok(config), Ok((capacity, ratio))) => {
                    assert_eq!(config.candle_capacity, capacity, "TC{} failed", index);
                    assert_eq!(config.spike_ratio_threshold, ratio, "TC{} failed", index);
                }
                (Err(CacheError::InvalidInput(_)), Err(())) => {}
                (actual, expected) => {
                    panic!(
                        "TC{index} failed because actual != expected. \nActual: {actual:?}\nExpected: {expected:?}\n"
                    );
                }
            }
        }
    }

    #[test]
    fn test_validate_sample_retention() {
        struct TestCase {
            interval: Duration,
            capacity: usize,
            expected_ok: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: defaults cover 24h plus tolerance
                interval: Duration::from_secs(30),
                capacity: 3_200,
                expected_ok: true,
            },
            TestCase {
                // TC1: zero spacing lets a fast feed flush the buffer
                interval: Duration::ZERO,
                capacity: 3_200,
                expected_ok: false,
            },
            TestCase {
                // TC2: 25h of samples misses the 26h reference span
                interval: Duration::from_secs(30),
                capacity: 3_000,
                expected_ok: false,
            },
            TestCase {
                // TC3: exactly 26h
                interval: Duration::from_secs(60),
                capacity: 26 * 60,
                expected_ok: true,
            },
            TestCase {
                // TC4: sparse sampling with a small cap
                interval: Duration::from_secs(3600),
                capacity: 26,
                expected_ok: true,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let config = CacheConfig::default()
                .with_sample_interval(test.interval)
                .with_sample_capacity(test.capacity);
            match config.validate() {
                Ok(()) => assert!(test.expected_ok, "TC{} failed", index),
                Err(CacheError::InvalidInput(_)) => assert!(!test.expected_ok, "TC{} failed", index),
                Err(other) => panic!("TC{index} failed with unexpected error: {other:?}"),
            }
        }
    }

    #[test]
    fn test_validate_sample_interval_from_env() {
        let config = CacheConfig::from_lookup(lookup(&[("DEX_CACHE_SAMPLE_INTERVAL_SECS", "0")]));
        assert!(matches!(config, Err(CacheError::InvalidInput(_))));
    }

    #[test]
    fn test_validate_gem_weights() {
        let config = CacheConfig::default().with_gem_weights(GemWeights {
            liquidity: 0.5,
            turnover: 0.5,
            age: 0.5,
            volatility: 0.0,
        });
        assert!(config.validate().is_err());
    }
}
