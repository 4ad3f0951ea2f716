//! Core type definitions

use alloy_primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::signer;
use crate::SignerResult;

/// Offset added to the recovery id so that `v` matches the on-chain verifier
pub const SIGNATURE_V_OFFSET: u8 = 27;

/// Asset pair identifier, e.g. `ETHUSD`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetPair(String);

impl AssetPair {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Left-aligned, zero-padded 32 byte form used by the canonical hash.
    /// Names longer than 32 bytes keep their first 32 bytes.
    pub fn to_word(&self) -> B256 {
        let mut word = [0u8; 32];
        let bytes = self.0.as_bytes();
        let len = bytes.len().min(32);
        word[..len].copy_from_slice(&bytes[..len]);
        B256::from(word)
    }
}

impl fmt::Display for AssetPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AssetPair {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for AssetPair {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// A signed observation of one asset pair's value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Price {
    pub asset_pair: AssetPair,
    /// WAD fixed-point value (1.0 == 10^18)
    pub val: U256,
    /// Time the feeder observed the value, not arrival time
    pub age: DateTime<Utc>,
    pub v: u8,
    pub r: B256,
    pub s: B256,
}

impl Price {
    /// Unsigned price, ready to be passed to a [`crate::PriceSigner`]
    pub fn new(asset_pair: impl Into<AssetPair>, val: U256, age: DateTime<Utc>) -> Self {
        Self {
            asset_pair: asset_pair.into(),
            val,
            age,
            v: 0,
            r: B256::ZERO,
            s: B256::ZERO,
        }
    }

    /// Address of the key that signed this price
    pub fn signer_address(&self) -> SignerResult<Address> {
        signer::recover_signer(self)
    }

    /// Canonical digest of `val`, `age` and `asset_pair`
    pub fn hash(&self) -> B256 {
        signer::canonical_hash(self)
    }

    /// Unix seconds of the observation as encoded in the canonical hash.
    /// Pre-epoch ages clamp to zero; they can be neither signed nor recovered.
    pub fn age_unix(&self) -> u64 {
        u64::try_from(self.age.timestamp()).unwrap_or(0)
    }

    pub fn is_pre_epoch(&self) -> bool {
        self.age.timestamp() < 0
    }

    pub fn is_signed(&self) -> bool {
        self.v != 0
    }

    /// The 65 byte `r || s || v` signature
    pub fn signature_bytes(&self) -> [u8; 65] {
        let mut bytes = [0u8; 65];
        bytes[..32].copy_from_slice(self.r.as_slice());
        bytes[32..64].copy_from_slice(self.s.as_slice());
        bytes[64] = self.v;
        bytes
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} @ {}", self.asset_pair, self.val, self.age.timestamp())
    }
}
