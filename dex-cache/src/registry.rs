//! Canonical set of known pairs and tokens.

use crate::{
    error::CacheError,
    model::{Address, Pair, Token},
};
use fnv::FnvHashMap;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Outcome of [`PairRegistry::add_pair`].
#[derive(Debug, Clone)]
pub struct AddPair {
    pub is_new: bool,
    pub pair: Arc<Pair>,
}

#[derive(Debug, Default)]
struct RegistryState {
    /// Pairs in insertion order.
    pairs: IndexMap<Address, Arc<Pair>>,
    tokens: FnvHashMap<Address, Token>,
    /// Token address -> pairs trading it, in insertion order.
    token_pairs: FnvHashMap<Address, Vec<Address>>,
}

impl RegistryState {
    /// Return the canonical token for this address, recording it on first sighting.
    fn canonical_token(&mut self, token: Token) -> Token {
        match self.tokens.get(&token.address) {
            Some(known) => {
                if known.symbol != token.symbol || known.decimals != token.decimals {
                    debug!(
                        token = %token.address,
                        known_symbol = %known.symbol,
                        seen_symbol = %token.symbol,
                        "ignoring conflicting token metadata"
                    );
                }
                known.clone()
            }
            None => {
                self.tokens.insert(token.address.clone(), token.clone());
                token
            }
        }
    }
}

/// Owns every [`Pair`] and [`Token`] the cache has seen. Entries live for the process lifetime.
#[derive(Debug, Default)]
pub struct PairRegistry {
    state: RwLock<RegistryState>,
}

impl PairRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pair. Re-adding a known address is a no-op reporting `is_new = false`.
    pub fn add_pair(&self, pair: Pair) -> AddPair {
        let mut state = self.state.write();

        if let Some(existing) = state.pairs.get(&pair.address) {
            return AddPair {
                is_new: false,
                pair: Arc::clone(existing),
            };
        }

        let token0 = state.canonical_token(pair.token0);
        let token1 = state.canonical_token(pair.token1);
        let pair = Arc::new(Pair {
            token0,
            token1,
            ..pair
        });

        for token in [&pair.token0.address, &pair.token1.address] {
            let entry = state.token_pairs.entry(token.clone()).or_default();
            if !entry.contains(&pair.address) {
                entry.push(pair.address.clone());
            }
        }
        state.pairs.insert(pair.address.clone(), Arc::clone(&pair));

        AddPair { is_new: true, pair }
    }

    pub fn get_pair(&self, address: &Address) -> Option<Arc<Pair>> {
        self.state.read().pairs.get(address).cloned()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.state.read().pairs.contains_key(address)
    }

    /// Snapshot of every pair in insertion order.
    pub fn all_pairs(&self) -> Vec<Arc<Pair>> {
        self.state.read().pairs.values().cloned().collect()
    }

    /// Pairs where either side trades `token`, in insertion order.
    pub fn pairs_for_token(&self, token: &Address) -> Result<Vec<Arc<Pair>>, CacheError> {
        let state = self.state.read();
        let addresses = state
            .token_pairs
            .get(token)
            .ok_or_else(|| CacheError::token_not_found(token.as_str()))?;

        Ok(addresses
            .iter()
            .filter_map(|address| state.pairs.get(address).cloned())
            .collect())
    }

    pub fn token(&self, address: &Address) -> Option<Token> {
        self.state.read().tokens.get(address).cloned()
    }

    pub fn tokens(&self) -> Vec<Token> {
        self.state.read().tokens.values().cloned().collect()
    }

    /// Explicitly overwrite a known token's symbol/decimals, propagating to every pair trading it.
    pub fn correct_token(&self, token: Token) -> Result<(), CacheError> {
        let mut state = self.state.write();
        if !state.tokens.contains_key(&token.address) {
            return Err(CacheError::token_not_found(token.address.as_str()));
        }

        let affected = state
            .token_pairs
            .get(&token.address)
            .cloned()
            .unwrap_or_default();

        for address in affected {
            if let Some(pair) = state.pairs.get_mut(&address) {
                let mut corrected = Pair::clone(pair);
                if corrected.token0.address == token.address {
                    corrected.token0 = token.clone();
                }
                if corrected.token1.address == token.address {
                    corrected.token1 = token.clone();
                }
                *pair = Arc::new(corrected);
            }
        }

        debug!(token = %token.address, symbol = %token.symbol, "token metadata corrected");
        state.tokens.insert(token.address.clone(), token);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.state.read().pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn token_count(&self) -> usize {
        self.state.read().tokens.len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    pub(crate) fn token(address: &str, symbol: &str) -> Token {
        Token {
            address: Address::parse(address).unwrap(),
            symbol: symbol.to_string(),
            decimals: 18,
        }
    }

    pub(crate) fn pair(address: &str, token0: Token, token1: Token) -> Pair {
        Pair {
            address: Address::parse(address).unwrap(),
            token0,
            token1,
            dex_name: "uniswap_v2".to_string(),
            created_at: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn test_add_pair_is_idempotent() {
        let registry = PairRegistry::new();
        let weth = token("0xweth", "WETH");
        let usdc = token("0xusdc", "USDC");

        let first = registry.add_pair(pair("0xp1", weth.clone(), usdc.clone()));
        let second = registry.add_pair(pair("0xP1", weth, usdc));

        assert!(first.is_new);
        assert!(!second.is_new);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_all_pairs_insertion_order() {
        let registry = PairRegistry::new();
        let a = token("0xa", "A");
        let b = token("0xb", "B");
        let c = token("0xc", "C");

        registry.add_pair(pair("0xp3", a.clone(), b.clone()));
        registry.add_pair(pair("0xp1", b.clone(), c.clone()));
        registry.add_pair(pair("0xp2", a.clone(), c.clone()));

        let order: Vec<_> = registry
            .all_pairs()
            .iter()
            .map(|pair| pair.address.to_string())
            .collect();
        assert_eq!(order, vec!["0xp3", "0xp1", "0xp2"]);
    }

    #[test]
    fn test_pairs_for_token() {
        let registry = PairRegistry::new();
        let weth = token("0xweth", "WETH");
        let usdc = token("0xusdc", "USDC");
        let pepe = token("0xpepe", "PEPE");

        registry.add_pair(pair("0xp1", weth.clone(), usdc.clone()));
        registry.add_pair(pair("0xp2", pepe.clone(), weth.clone()));

        struct TestCase {
            input: &'static str,
            expected: Result<Vec<&'static str>, ()>,
        }

        let tests = vec![
            TestCase {
                // TC0: token on both sides of different pairs
                input: "0xweth",
                expected: Ok(vec!["0xp1", "0xp2"]),
            },
            TestCase {
                // TC1: token matched case-insensitively after normalisation
                input: "0xPEPE",
                expected: Ok(vec!["0xp2"]),
            },
            TestCase {
                // TC2: unknown token is not found
                input: "0xnope",
                expected: Err(()),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let address = Address::parse(test.input).unwrap();
            match (registry.pairs_for_token(&address), test.expected) {
                (Ok(actual), Ok(expected)) => {
                    let actual: Vec<_> = actual.iter().map(|p| p.address.to_string()).collect();
                    assert_eq!(actual, expected, "TC{} failed", index);
                }
                (Err(CacheError::NotFound { .. }), Err(())) => {}
                (actual, expected) => {
                    panic!(
                        "TC{index} failed because actual != expected. \nActual: {actual:?}\nExpected: {expected:?}\n"
                    );
                }
            }
        }
    }

    #[test]
    fn test_first_token_sighting_wins() {
        let registry = PairRegistry::new();
        registry.add_pair(pair("0xp1", token("0xt", "REAL"), token("0xu", "USDC")));
        let added = registry.add_pair(pair("0xp2", token("0xt", "FAKE"), token("0xu", "USDC")));

        assert_eq!(added.pair.token0.symbol, "REAL");
        assert_eq!(
            registry
                .token(&Address::parse("0xt").unwrap())
                .unwrap()
                .symbol,
            "REAL"
        );
    }

    #[test]
    fn test_correct_token_updates_pairs() {
        let registry = PairRegistry::new();
        registry.add_pair(pair("0xp1", token("0xt", "OLD"), token("0xu", "USDC")));

        let mut corrected = token("0xt", "NEW");
        corrected.decimals = 9;
        registry.correct_token(corrected).unwrap();

        let pair = registry.get_pair(&Address::parse("0xp1").unwrap()).unwrap();
        assert_eq!(pair.token0.symbol, "NEW");
        assert_eq!(pair.token0.decimals, 9);

        assert!(registry.correct_token(token("0xzz", "ZZ")).is_err());
    }
}
