//! Relayer error and event types

use alloy_primitives::{B256, U256};
use oracle_core::{AssetPair, ConfigError, MessageError, SignerError};
use oracle_store::StoreError;
use thiserror::Error;

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Not subscribed to topic {0}")]
    NotSubscribed(String),

    #[error("Transport closed")]
    Closed,

    #[error("Transport failure: {0}")]
    Backend(String),
}

/// Relayer errors
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Asset pair {0} is not configured")]
    PairNotConfigured(AssetPair),

    #[error("Asset pair {0} is already registered")]
    DuplicatePair(AssetPair),

    #[error("Insufficient quorum for {asset_pair}: have {have}, want {want}")]
    InsufficientQuorum {
        asset_pair: AssetPair,
        have: usize,
        want: usize,
    },

    #[error("On-chain quorum for {0} is zero")]
    InvalidQuorum(AssetPair),

    #[error("{call} failed for {asset_pair}: {source:#}")]
    OnChain {
        asset_pair: AssetPair,
        call: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("Relayer already started")]
    AlreadyStarted,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Signer(#[from] SignerError),

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl RelayError {
    /// Rejections that happen in normal operation, e.g. during feeder rotation
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            RelayError::InsufficientQuorum { .. }
                | RelayError::PairNotConfigured(_)
                | RelayError::Store(StoreError::NotAuthorized { .. })
        )
    }
}

/// Outcome reported to the relayer's owner
#[derive(Debug)]
pub enum RelayEvent {
    /// A poke transaction was submitted
    Poked {
        asset_pair: AssetPair,
        tx_hash: B256,
        median: U256,
        signatures: usize,
    },
    /// Non-fatal failure of a single price or relay cycle
    Failed(RelayError),
}

pub type TransportResult<T> = Result<T, TransportError>;
pub type RelayResult<T> = Result<T, RelayError>;
