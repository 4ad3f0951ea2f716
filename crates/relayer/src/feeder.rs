//! Feeder side: sign observations and gossip them to relayers

use alloy_primitives::{Address, U256};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

use oracle_core::{format_wad, AssetPair, Price, PriceMessage, PriceSigner, PRICE_TOPIC};
use oracle_store::StoreError;

use crate::transport::{broadcast_message, Transport};
use crate::{RelayError, RelayResult};

/// Publishes signed prices on the price topic
pub struct Feeder {
    signer: PriceSigner,
    transport: Arc<dyn Transport>,
}

impl Feeder {
    pub fn new(signer: PriceSigner, transport: Arc<dyn Transport>) -> Self {
        Self { signer, transport }
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Sign and broadcast an observation; returns the signed price
    pub async fn publish(
        &self,
        asset_pair: impl Into<AssetPair>,
        val: U256,
        age: DateTime<Utc>,
    ) -> RelayResult<Price> {
        self.publish_with_trace(asset_pair, val, age, None).await
    }

    /// Like [`Feeder::publish`], attaching the per-origin prices behind `val`
    pub async fn publish_with_trace(
        &self,
        asset_pair: impl Into<AssetPair>,
        val: U256,
        age: DateTime<Utc>,
        trace: Option<serde_json::Value>,
    ) -> RelayResult<Price> {
        let asset_pair = asset_pair.into();
        if val.is_zero() {
            return Err(RelayError::Store(StoreError::NonPositivePrice {
                asset_pair,
                address: self.address(),
            }));
        }

        let mut price = Price::new(asset_pair, val, age);
        self.signer.sign(&mut price)?;

        let mut message = PriceMessage::new(price.clone());
        message.trace = trace;
        broadcast_message(self.transport.as_ref(), PRICE_TOPIC, &message).await?;

        debug!(
            "Published {} = {} from {}",
            price.asset_pair,
            format_wad(price.val),
            self.address()
        );
        Ok(price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LocalBus, LocalTransport};
    use oracle_core::{wad, Message};

    #[tokio::test]
    async fn test_published_price_is_signed_and_decodable() {
        let bus = LocalBus::default();
        let listener = LocalTransport::new(bus.clone());
        listener.subscribe(PRICE_TOPIC).await.unwrap();

        let signer = PriceSigner::from_slice(&[3u8; 32]).unwrap();
        let feeder = Feeder::new(signer, Arc::new(LocalTransport::new(bus)));
        let sent = feeder
            .publish_with_trace("ETHUSD", wad(2000), Utc::now(), Some(serde_json::json!({"kraken": "2000"})))
            .await
            .unwrap();

        let payload = listener.wait_for(PRICE_TOPIC).await.unwrap();
        let received = PriceMessage::unmarshal(&payload).unwrap();

        assert_eq!(received.price.signer_address().unwrap(), feeder.address());
        assert_eq!(received.price.val, sent.val);
        assert!(received.trace.is_some());
    }

    #[tokio::test]
    async fn test_zero_value_not_published() {
        let signer = PriceSigner::from_slice(&[3u8; 32]).unwrap();
        let feeder = Feeder::new(signer, Arc::new(LocalTransport::new(LocalBus::default())));

        let err = feeder.publish("ETHUSD", U256::ZERO, Utc::now()).await.unwrap_err();
        assert!(matches!(err, RelayError::Store(StoreError::NonPositivePrice { .. })));
    }
}
