//! Composite "gem" heuristic: liquidity depth, turnover, age and volatility folded into a single
//! deterministic score in `[0, 100]`.

use crate::{
    config::GemWeights,
    model::{Candle, PairMetricsSnapshot},
};
use chrono::{DateTime, TimeDelta, Utc};
use derive_more::Constructor;
use serde::{Deserialize, Serialize};

/// Candles considered when measuring the recent high/low swing.
pub const VOLATILITY_LOOKBACK: usize = 60;

/// Liquidity at which the log-scaled depth component saturates (10^7 USD).
const LIQUIDITY_SATURATION_LOG10: f64 = 7.0;

/// Each normalised component, in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize, Serialize)]
pub struct GemComponents {
    pub liquidity: f64,
    pub turnover: f64,
    pub age: f64,
    pub volatility: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct GemScore {
    pub score: u8,
    pub components: GemComponents,
}

/// Scores pairs against fixed component weights.
#[derive(Debug, Clone, Copy, PartialEq, Constructor)]
pub struct GemScorer {
    pub weights: GemWeights,
    pub epsilon: f64,
}

impl GemScorer {
    /// Score a pair. `now` must come from ingested data, never the wall clock, so identical cache
    /// state always yields the identical score.
    pub fn score(
        &self,
        snapshot: &PairMetricsSnapshot,
        created_at: DateTime<Utc>,
        recent: &[Candle],
        now: DateTime<Utc>,
    ) -> GemScore {
        let liquidity = snapshot.liquidity_usd.unwrap_or(0.0);
        let volume = snapshot.volume_24h_usd.unwrap_or(0.0);

        let components = GemComponents {
            liquidity: liquidity_score(liquidity),
            turnover: turnover_score(volume / liquidity.max(self.epsilon)),
            age: age_score(now - created_at),
            volatility: change_score(snapshot.price_change_24h) * swing_dampener(recent),
        };

        let weighted = components.liquidity * self.weights.liquidity
            + components.turnover * self.weights.turnover
            + components.age * self.weights.age
            + components.volatility * self.weights.volatility;

        GemScore {
            score: (weighted * 100.0).round().clamp(0.0, 100.0) as u8,
            components,
        }
    }
}

fn liquidity_score(liquidity: f64) -> f64 {
    ((1.0 + liquidity.max(0.0)).log10() / LIQUIDITY_SATURATION_LOG10).clamp(0.0, 1.0)
}

/// Moderate turnover is healthy; very high turnover on thin depth is a risk signal.
fn turnover_score(turnover: f64) -> f64 {
    if !turnover.is_finite() || turnover <= 0.0 {
        0.0
    } else if turnover < 0.5 {
        turnover / 0.5
    } else if turnover <= 2.0 {
        1.0
    } else {
        2.0 / turnover
    }
}

/// Full bonus for the first day, decaying linearly to nothing at 30 days.
fn age_score(age: TimeDelta) -> f64 {
    let full = TimeDelta::hours(24);
    let horizon = TimeDelta::days(30);

    if age <= full {
        1.0
    } else if age >= horizon {
        0.0
    } else {
        let remaining = (horizon - age).num_seconds() as f64;
        let span = (horizon - full).num_seconds() as f64;
        remaining / span
    }
}

/// Favours moderate positive 24h moves over flat, falling or parabolic ones.
fn change_score(change: Option<f64>) -> f64 {
    let Some(change) = change.filter(|c| c.is_finite()) else {
        return 0.25;
    };

    let score = if change < 0.0 {
        0.3 * (1.0 + change / 100.0)
    } else if change < 20.0 {
        change / 20.0
    } else if change <= 50.0 {
        1.0
    } else {
        1.0 - (change - 50.0) / 150.0
    };
    score.clamp(0.0, 1.0)
}

/// Shrinks the volatility component when recent candles swing by more than 25% of price.
fn swing_dampener(recent: &[Candle]) -> f64 {
    let Some(last) = recent.last() else {
        return 1.0;
    };
    if last.close <= 0.0 {
        return 1.0;
    }

    let window = &recent[recent.len().saturating_sub(VOLATILITY_LOOKBACK)..];
    let high = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let low = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    let range = (high - low) / last.close;

    if range <= 0.0 {
        1.0
    } else {
        (0.25 / range).min(1.0)
    }
}
