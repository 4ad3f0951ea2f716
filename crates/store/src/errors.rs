//! Store error types

use alloy_primitives::Address;
use oracle_core::{AssetPair, SignerError};
use thiserror::Error;

/// Reasons a price is refused by a [`crate::PriceStore`]
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid signature on {asset_pair} price: {source}")]
    InvalidSignature {
        asset_pair: AssetPair,
        #[source]
        source: SignerError,
    },

    #[error("Feeder {address} is not authorized for {asset_pair}")]
    NotAuthorized {
        asset_pair: AssetPair,
        address: Address,
    },

    #[error("Non-positive {asset_pair} price from {address}")]
    NonPositivePrice {
        asset_pair: AssetPair,
        address: Address,
    },

    #[error("Price for {got} sent to the {expected} store")]
    PairMismatch { expected: AssetPair, got: AssetPair },
}

pub type StoreResult<T> = Result<T, StoreError>;
