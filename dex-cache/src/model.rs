//! Core data model shared by every store in the cache.
//!
//! Addresses are normalised at construction so every downstream map can compare them
//! byte-for-byte.

use crate::error::CacheError;
use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Deserializer, Serialize};
use smol_str::SmolStr;

/// Longest address accepted at any boundary.
pub const MAX_ADDRESS_LEN: usize = 128;

/// Lowercased on-chain address of a pair or token.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Display, Serialize)]
pub struct Address(SmolStr);

impl Address {
    /// Trim, lowercase and validate a raw address.
    pub fn parse(raw: &str) -> Result<Self, CacheError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(CacheError::InvalidInput("address is empty".to_string()));
        }
        if trimmed.len() > MAX_ADDRESS_LEN {
            return Err(CacheError::InvalidInput(format!(
                "address exceeds {MAX_ADDRESS_LEN} chars: {trimmed}"
            )));
        }
        if !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CacheError::InvalidInput(format!(
                "address contains invalid characters: {trimmed}"
            )));
        }

        Ok(Self(SmolStr::new(trimmed.to_ascii_lowercase())))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Address::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Token metadata, fixed by the first sighting of its address.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Token {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
}

/// Tradable token0/token1 combination on a specific DEX.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Pair {
    pub address: Address,
    pub token0: Token,
    pub token1: Token,
    pub dex_name: String,
    pub created_at: DateTime<Utc>,
}

impl Pair {
    /// Does either side of the pair trade the provided token.
    pub fn trades(&self, token: &Address) -> bool {
        &self.token0.address == token || &self.token1.address == token
    }
}

/// Open/high/low/close/volume summary for one fixed time bucket.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Candle {
    pub bucket_start: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub(crate) fn validate(&self) -> Result<(), CacheError> {
        let fields = [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
            ("volume", self.volume),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(CacheError::InvalidInput(format!(
                    "candle {name} must be finite and non-negative, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Current metrics view of a pair, replaced in place on every update.
///
/// Every metric is `None` until observed; a price change is `None` when no sample old enough
/// exists, which is distinct from a real change of zero.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PairMetricsSnapshot {
    pub pair_address: Address,
    pub price_usd: Option<f64>,
    pub volume_24h_usd: Option<f64>,
    pub liquidity_usd: Option<f64>,
    pub price_change_1h: Option<f64>,
    pub price_change_24h: Option<f64>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl PairMetricsSnapshot {
    pub fn empty(pair: Address) -> Self {
        Self {
            pair_address: pair,
            price_usd: None,
            volume_24h_usd: None,
            liquidity_usd: None,
            price_change_1h: None,
            price_change_24h: None,
            last_updated: None,
        }
    }
}

/// Price change lookback used by gainers and losers queries.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Display)]
pub enum Timeframe {
    #[serde(rename = "1h")]
    #[display("1h")]
    OneHour,
    #[serde(rename = "24h")]
    #[display("24h")]
    OneDay,
}

impl Timeframe {
    pub fn duration(&self) -> chrono::Duration {
        match self {
            Timeframe::OneHour => chrono::Duration::hours(1),
            Timeframe::OneDay => chrono::Duration::hours(24),
        }
    }
}

impl std::str::FromStr for Timeframe {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1h" => Ok(Timeframe::OneHour),
            "24h" => Ok(Timeframe::OneDay),
            other => Err(CacheError::InvalidInput(format!(
                "unsupported timeframe: {other}"
            ))),
        }
    }
}
