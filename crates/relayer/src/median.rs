//! On-chain median oracle client interface

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use tracing::warn;

use oracle_core::{Price, RetryConfig};

/// Client for one pair's median contract
#[async_trait]
pub trait Median: Send + Sync {
    /// Contract address, for logging
    fn address(&self) -> Address;

    /// Time of the current on-chain price
    async fn age(&self) -> anyhow::Result<DateTime<Utc>>;

    /// Number of signatures a poke must carry
    async fn bar(&self) -> anyhow::Result<u64>;

    /// Current on-chain WAD price
    async fn price(&self) -> anyhow::Result<U256>;

    /// Feeders authorized on-chain
    async fn feeds(&self) -> anyhow::Result<Vec<Address>>;

    /// Submit `prices`, sorted ascending by value. Returns the transaction hash.
    async fn poke(&self, prices: &[Price], simulate: bool) -> anyhow::Result<B256>;
}

/// Median decorator that retries reads with a fixed delay.
/// Pokes go through exactly once.
pub struct RetryingMedian<M> {
    inner: M,
    config: RetryConfig,
}

impl<M: Median> RetryingMedian<M> {
    pub fn new(inner: M, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    pub fn inner(&self) -> &M {
        &self.inner
    }

    async fn retry<T, F, Fut>(&self, call: &'static str, mut read: F) -> anyhow::Result<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<T>> + Send,
        T: Send,
    {
        let mut attempt = 0u32;
        loop {
            match read().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(
                        "Median {} {} failed: {:#}, retrying in {:?} (attempt {}/{})",
                        self.inner.address(),
                        call,
                        e,
                        self.config.retry_delay(),
                        attempt,
                        self.config.max_retries
                    );
                    tokio::time::sleep(self.config.retry_delay()).await;
                }
                Err(e) => {
                    return Err(e.context(format!("{call} failed after {} attempts", attempt + 1)))
                }
            }
        }
    }
}

#[async_trait]
impl<M: Median> Median for RetryingMedian<M> {
    fn address(&self) -> Address {
        self.inner.address()
    }

    async fn age(&self) -> anyhow::Result<DateTime<Utc>> {
        self.retry("age", || self.inner.age()).await
    }

    async fn bar(&self) -> anyhow::Result<u64> {
        self.retry("bar", || self.inner.bar()).await
    }

    async fn price(&self) -> anyhow::Result<U256> {
        self.retry("price", || self.inner.price()).await
    }

    async fn feeds(&self) -> anyhow::Result<Vec<Address>> {
        self.retry("feeds", || self.inner.feeds()).await
    }

    async fn poke(&self, prices: &[Price], simulate: bool) -> anyhow::Result<B256> {
        self.inner.poke(prices, simulate).await
    }
}
