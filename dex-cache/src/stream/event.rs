use crate::{
    model::{Address, Candle, Pair},
    snapshot::MetricsUpdate,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Generic arrival shape produced by every upstream adapter (stream or bulk file).
///
/// ```json
/// {"type":"snapshot","pair_address":"0xabc","price_usd":1.2,"volume_24h_usd":10.0,
///  "liquidity_usd":500.0,"timestamp":"2024-01-01T00:00:00Z"}
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IngestEvent {
    NewPair(Pair),
    Candle {
        pair_address: Address,
        candle: Candle,
    },
    Snapshot {
        pair_address: Address,
        price_usd: f64,
        volume_24h_usd: f64,
        liquidity_usd: f64,
        timestamp: DateTime<Utc>,
    },
}

impl IngestEvent {
    /// Pair the event refers to.
    pub fn pair_address(&self) -> &Address {
        match self {
            IngestEvent::NewPair(pair) => &pair.address,
            IngestEvent::Candle { pair_address, .. } => pair_address,
            IngestEvent::Snapshot { pair_address, .. } => pair_address,
        }
    }

    pub fn snapshot(pair_address: Address, update: MetricsUpdate) -> Self {
        IngestEvent::Snapshot {
            pair_address,
            price_usd: update.price_usd,
            volume_24h_usd: update.volume_24h_usd,
            liquidity_usd: update.liquidity_usd,
            timestamp: update.timestamp,
        }
    }
}
