use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors generated in `dex-cache`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Error)]
pub enum CacheError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: Entity, key: String },

    #[error("stale ingest for pair {pair}: received {received} is older than cursor {cursor}")]
    StaleIngest {
        pair: String,
        cursor: i64,
        received: i64,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(
        "\
        insufficient history for pair {pair}: {available} samples available, \
        {required} required \
    "
    )]
    InsufficientHistory {
        pair: String,
        required: usize,
        available: usize,
    },

    #[error("CSV error: {0}")]
    Csv(String),

    #[error("stream error: {0}")]
    Stream(String),
}

/// Kind of entity a [`CacheError::NotFound`] refers to.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, derive_more::Display)]
pub enum Entity {
    #[display("pair")]
    Pair,
    #[display("token")]
    Token,
}

impl CacheError {
    pub fn pair_not_found(key: impl Into<String>) -> Self {
        Self::NotFound {
            entity: Entity::Pair,
            key: key.into(),
        }
    }

    pub fn token_not_found(key: impl Into<String>) -> Self {
        Self::NotFound {
            entity: Entity::Token,
            key: key.into(),
        }
    }

    /// Determine if an error belongs to the ingest path and must be counted and dropped rather
    /// than surfaced to the producer.
    #[allow(clippy::match_like_matches_macro)]
    pub fn is_recoverable(&self) -> bool {
        match self {
            CacheError::StaleIngest { .. } | CacheError::InsufficientHistory { .. } => true,
            _ => false,
        }
    }
}

impl From<csv::Error> for CacheError {
    fn from(value: csv::Error) -> Self {
        Self::Csv(value.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(value: serde_json::Error) -> Self {
        Self::Stream(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_error_is_recoverable() {
        struct TestCase {
            input: CacheError,
            expected: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: stale ingest is dropped and counted
                input: CacheError::StaleIngest {
                    pair: "0xabc".to_string(),
                    cursor: 120_000,
                    received: 60_000,
                },
                expected: true,
            },
            TestCase {
                // TC1: insufficient history omits the pair
                input: CacheError::InsufficientHistory {
                    pair: "0xabc".to_string(),
                    required: 2,
                    available: 1,
                },
                expected: true,
            },
            TestCase {
                // TC2: unknown pair is surfaced to the caller
                input: CacheError::pair_not_found("0xabc"),
                expected: false,
            },
            TestCase {
                // TC3: bad query parameter is surfaced to the caller
                input: CacheError::InvalidInput("limit must be positive".to_string()),
                expected: false,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = test.input.is_recoverable();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_not_found_display() {
        assert_eq!(
            CacheError::token_not_found("0xdead").to_string(),
            "token not found: 0xdead"
        );
        assert_eq!(
            CacheError::pair_not_found("0xbeef").to_string(),
            "pair not found: 0xbeef"
        );
    }
}
