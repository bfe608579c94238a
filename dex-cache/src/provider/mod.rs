//! Infrastructure provider registry with capability-based discovery.
//!
//! Capabilities are separate traits. A provider is enumerated for a capability only if it was
//! registered through that capability's method, so discovery never inspects a provider's shape at
//! runtime.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::{debug, warn};

/// Swappable source of per-provider historical metrics.
pub mod history;

/// All errors generated by provider calls.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("provider returned status {0}")]
    Status(u16),

    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("failed to decode provider response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(value: reqwest::Error) -> Self {
        Self::Http(value.to_string())
    }
}

/// Identity shared by every infrastructure provider.
pub trait InfraProvider: Send + Sync {
    fn name(&self) -> &str;
    fn chain(&self) -> &str;
}

/// Capability: report the chain head block height.
#[async_trait]
pub trait BlockHeightProvider: InfraProvider {
    async fn block_height(&self) -> Result<u64, ProviderError>;
}

/// One benchmark observation of a [`BlockHeightProvider`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BlockHeightSample {
    pub provider: String,
    pub chain: String,
    pub height: Result<u64, ProviderError>,
    pub latency: Duration,
    pub observed_at: DateTime<Utc>,
}

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn InfraProvider>>,
    block_height: Vec<Arc<dyn BlockHeightProvider>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .field("block_height", &self.block_height.len())
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider with no optional capabilities.
    pub fn register(&mut self, provider: Arc<dyn InfraProvider>) {
        debug!(provider = provider.name(), chain = provider.chain(), "registered provider");
        self.providers.push(provider);
    }

    /// Register a provider that can report block height.
    pub fn register_block_height<P>(&mut self, provider: Arc<P>)
    where
        P: BlockHeightProvider + 'static,
    {
        self.register(Arc::clone(&provider) as Arc<dyn InfraProvider>);
        self.block_height.push(provider);
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(|provider| provider.name()).collect()
    }

    pub fn providers(&self) -> &[Arc<dyn InfraProvider>] {
        &self.providers
    }

    /// Only the providers registered with the block height capability.
    pub fn block_height_providers(&self) -> &[Arc<dyn BlockHeightProvider>] {
        &self.block_height
    }

    /// Query every block height provider concurrently, capturing failures per provider.
    pub async fn poll_block_heights(&self) -> Vec<BlockHeightSample> {
        let polls = self.block_height.iter().map(|provider| async move {
            let started = Instant::now();
            let height = provider.block_height().await;
            let latency = started.elapsed();

            if let Err(error) = &height {
                warn!(provider = provider.name(), %error, "block height poll failed");
            }

            BlockHeightSample {
                provider: provider.name().to_string(),
                chain: provider.chain().to_string(),
                height,
                latency,
                observed_at: Utc::now(),
            }
        });

        join_all(polls).await
    }
}

/// Ethereum-style JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct JsonRpcProvider {
    name: String,
    chain: String,
    url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl JsonRpcProvider {
    pub fn new(name: impl Into<String>, chain: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            chain: chain.into(),
            url: url.into(),
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Set request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl InfraProvider for JsonRpcProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn chain(&self) -> &str {
        &self.chain
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<String>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[async_trait]
impl BlockHeightProvider for JsonRpcProvider {
    async fn block_height(&self) -> Result<u64, ProviderError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_blockNumber",
            "params": [],
        });

        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::Status(response.status().as_u16()));
        }

        let response: RpcResponse = response.json().await?;
        parse_rpc_response(response)
    }
}

fn parse_rpc_response(response: RpcResponse) -> Result<u64, ProviderError> {
    if let Some(error) = response.error {
        return Err(ProviderError::Rpc {
            code: error.code,
            message: error.message,
        });
    }

    let hex = response
        .result
        .ok_or_else(|| ProviderError::Decode("missing result".to_string()))?;
    parse_quantity(&hex)
}

/// Decode a `0x`-prefixed hex quantity.
fn parse_quantity(hex: &str) -> Result<u64, ProviderError> {
    let digits = hex
        .strip_prefix("0x")
        .ok_or_else(|| ProviderError::Decode(format!("quantity missing 0x prefix: {hex}")))?;
    u64::from_str_radix(digits, 16)
        .map_err(|error| ProviderError::Decode(format!("invalid quantity {hex}: {error}")))
}
