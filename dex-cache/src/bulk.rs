//! CSV bulk import of pairs and their last known metrics.
//!
//! Rows produce the same [`IngestEvent`]s as the live stream, so the cache does not know which
//! source a pair arrived from.

use crate::{
    error::CacheError,
    model::{Address, Pair, Token},
    stream::event::IngestEvent,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Read;

/// Columns every pairs file must carry. Metric columns may be left empty.
pub const REQUIRED_COLUMNS: [&str; 9] = [
    "pair_address",
    "token0_address",
    "token0_symbol",
    "token0_decimals",
    "token1_address",
    "token1_symbol",
    "token1_decimals",
    "dex_name",
    "created_at",
];

#[derive(Debug, Deserialize)]
struct PairRow {
    pair_address: String,
    token0_address: String,
    token0_symbol: String,
    token0_decimals: u8,
    token1_address: String,
    token1_symbol: String,
    token1_decimals: u8,
    dex_name: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    price_usd: Option<f64>,
    #[serde(default)]
    volume_24h_usd: Option<f64>,
    #[serde(default)]
    liquidity_usd: Option<f64>,
}

impl PairRow {
    fn into_events(self) -> Result<Vec<IngestEvent>, CacheError> {
        let pair = Pair {
            address: Address::parse(&self.pair_address)?,
            token0: Token {
                address: Address::parse(&self.token0_address)?,
                symbol: self.token0_symbol,
                decimals: self.token0_decimals,
            },
            token1: Token {
                address: Address::parse(&self.token1_address)?,
                symbol: self.token1_symbol,
                decimals: self.token1_decimals,
            },
            dex_name: self.dex_name,
            created_at: self.created_at,
        };

        let snapshot = match (self.price_usd, self.volume_24h_usd, self.liquidity_usd) {
            (Some(price_usd), Some(volume_24h_usd), Some(liquidity_usd)) => {
                Some(IngestEvent::Snapshot {
                    pair_address: pair.address.clone(),
                    price_usd,
                    volume_24h_usd,
                    liquidity_usd,
                    timestamp: self.created_at,
                })
            }
            _ => None,
        };

        Ok(std::iter::once(IngestEvent::NewPair(pair))
            .chain(snapshot)
            .collect())
    }
}

/// One parsed data row.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvRow {
    /// 1-based line number in the source file, header included.
    pub line: u64,
    pub events: Vec<IngestEvent>,
}

/// Outcome of [`crate::DexCache::bulk_load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct BulkLoadReport {
    pub pairs_added: usize,
    pub snapshots_applied: usize,
    pub rows_rejected: usize,
}

/// Parse a pairs CSV in file order. A bad header fails the whole file; a bad row only fails
/// that row.
pub fn read_pairs_csv<R: Read>(reader: R) -> Result<Vec<Result<CsvRow, CacheError>>, CacheError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    // Column names match case-insensitively, so rows deserialise against lowercased headers
    let headers: csv::StringRecord = reader
        .headers()?
        .iter()
        .map(str::to_ascii_lowercase)
        .collect();
    reader.set_headers(headers.clone());

    let missing: Vec<_> = REQUIRED_COLUMNS
        .iter()
        .filter(|column| !headers.iter().any(|header| header == **column))
        .collect();
    if !missing.is_empty() {
        return Err(CacheError::InvalidInput(format!(
            "pairs CSV missing columns: {missing:?}"
        )));
    }

    Ok(reader
        .deserialize::<PairRow>()
        .enumerate()
        .map(|(index, row)| {
            let line = index as u64 + 2;
            let events = row
                .map_err(CacheError::from)
                .and_then(PairRow::into_events)
                .map_err(|error| CacheError::Csv(format!("line {line}: {error}")))?;
            Ok(CsvRow { line, events })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "pair_address,token0_address,token0_symbol,token0_decimals,token1_address,token1_symbol,token1_decimals,dex_name,created_at,price_usd,volume_24h_usd,liquidity_usd";

    #[test]
    fn test_read_pairs_csv() {
        let input = format!(
            "{HEADER}\n\
             0xP1,0xWETH,WETH,18,0xusdc,USDC,6,uniswap_v2,2024-01-01T00:00:00Z,1.5,1000,20000\n\
             0xp2,0xpepe,PEPE,18,0xweth,WETH,18,uniswap_v3,2024-01-02T00:00:00Z,,,\n\
             bad address,0xa,A,18,0xb,B,18,dex,2024-01-02T00:00:00Z,,,\n\
             0xp3,0xa,A,nope,0xb,B,18,dex,2024-01-02T00:00:00Z,,,\n"
        );

        let rows = read_pairs_csv(input.as_bytes()).unwrap();
        assert_eq!(rows.len(), 4);

        struct TestCase {
            expected: Result<(u64, usize), ()>,
        }

        let tests = vec![
            TestCase {
                // TC0: pair plus snapshot
                expected: Ok((2, 2)),
            },
            TestCase {
                // TC1: pair without metrics
                expected: Ok((3, 1)),
            },
            TestCase {
                // TC2: invalid address
                expected: Err(()),
            },
            TestCase {
                // TC3: non-numeric decimals
                expected: Err(()),
            },
        ];

        for (index, (row, test)) in rows.into_iter().zip(tests).enumerate() {
            match (row, test.expected) {
                (Ok(row), Ok((line, events))) => {
                    assert_eq!(row.line, line, "TC{} failed", index);
                    assert_eq!(row.events.len(), events, "TC{} failed", index);
                }
                (Err(CacheError::Csv(_)), Err(())) => {}
                (actual, expected) => {
                    panic!(
                        "TC{index} failed because actual != expected. \nActual: {actual:?}\nExpected: {expected:?}\n"
                    );
                }
            }
        }
    }

    #[test]
    fn test_first_row_normalised() {
        let input = format!(
            "{HEADER}\n0xP1,0xWETH,WETH,18,0xusdc,USDC,6,uniswap_v2,2024-01-01T00:00:00Z,1.5,1000,20000\n"
        );
        let rows = read_pairs_csv(input.as_bytes()).unwrap();
        let row = rows.into_iter().next().unwrap().unwrap();

        match &row.events[0] {
            IngestEvent::NewPair(pair) => {
                assert_eq!(pair.address.as_str(), "0xp1");
                assert_eq!(pair.token0.address.as_str(), "0xweth");
                assert_eq!(pair.token1.decimals, 6);
            }
            other => panic!("expected NewPair, got {other:?}"),
        }
        assert!(matches!(
            &row.events[1],
            IngestEvent::Snapshot { liquidity_usd, .. } if *liquidity_usd == 20_000.0
        ));
    }

    #[test]
    fn test_mixed_case_header() {
        let input = "Pair_Address,TOKEN0_ADDRESS,Token0_Symbol,token0_decimals,Token1_Address,token1_symbol,Token1_Decimals,Dex_Name,Created_At,Price_USD,Volume_24h_USD,Liquidity_USD\n\
                     0xp1,0xweth,WETH,18,0xusdc,USDC,6,uniswap_v2,2024-01-01T00:00:00Z,1.5,1000,20000\n";

        let rows = read_pairs_csv(input.as_bytes()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].as_ref().map(|row| row.events.len()), Ok(2));

        let cache = crate::DexCache::default();
        let report = cache.bulk_load(input.as_bytes()).unwrap();
        assert_eq!(
            report,
            BulkLoadReport {
                pairs_added: 1,
                snapshots_applied: 1,
                rows_rejected: 0,
            }
        );
        assert_eq!(cache.all_pairs().len(), 1);
    }

    #[test]
    fn test_missing_columns_rejected() {
        let input = "pair_address,token0_address\n0xp1,0xa\n";
        assert!(matches!(
            read_pairs_csv(input.as_bytes()),
            Err(CacheError::InvalidInput(_))
        ));
    }
}
