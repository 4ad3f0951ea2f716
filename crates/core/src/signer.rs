//! Canonical price hashing, signing and signer recovery
//!
//! The on-chain median contract hashes the *textual* hex encoding of
//! `abi.encodePacked(val, age, wat)` and verifies an Ethereum signed-message
//! signature over that digest. Both stages are reproduced here byte for byte.

use alloy_primitives::{eip191_hash_message, hex, keccak256, Address, B256, U256};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};

use crate::{Price, SignerError, SignerResult, SIGNATURE_V_OFFSET};

/// `"0x"` followed by three 64 character hex words
pub const CANONICAL_MESSAGE_LEN: usize = 2 + 3 * 64;

/// ASCII preimage of the canonical hash
pub fn canonical_message(price: &Price) -> String {
    let val = price.val.to_be_bytes::<32>();
    let age = U256::from(price.age_unix()).to_be_bytes::<32>();
    let wat = price.asset_pair.to_word();

    let mut message = String::with_capacity(CANONICAL_MESSAGE_LEN);
    message.push_str("0x");
    message.push_str(&hex::encode(val));
    message.push_str(&hex::encode(age));
    message.push_str(&hex::encode(wat));
    message
}

/// Keccak-256 of the canonical message's ASCII bytes
pub fn canonical_hash(price: &Price) -> B256 {
    keccak256(canonical_message(price).as_bytes())
}

/// Digest that is actually signed: the prefixed-message hash of the canonical hash
pub fn signing_hash(price: &Price) -> B256 {
    eip191_hash_message(canonical_hash(price).as_slice())
}

/// Ethereum address of a secp256k1 public key
pub fn address_of(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    // Skip the 0x04 uncompressed-point tag
    Address::from_raw_public_key(&point.as_bytes()[1..])
}

/// Recover the address that signed `price`
pub fn recover_signer(price: &Price) -> SignerResult<Address> {
    if price.v != SIGNATURE_V_OFFSET && price.v != SIGNATURE_V_OFFSET + 1 {
        return Err(SignerError::InvalidSignature(format!(
            "v must be 27 or 28, got {}",
            price.v
        )));
    }

    if price.is_pre_epoch() {
        return Err(SignerError::InvalidSignature(format!(
            "age {} is before the unix epoch",
            price.age
        )));
    }

    let mut recovery_id = RecoveryId::from_byte(price.v - SIGNATURE_V_OFFSET)
        .ok_or_else(|| SignerError::InvalidSignature(format!("bad recovery id {}", price.v)))?;

    let bytes = price.signature_bytes();
    let mut signature = Signature::from_slice(&bytes[..64])
        .map_err(|e| SignerError::InvalidSignature(e.to_string()))?;

    // ecrecover accepts high-S signatures; k256 only verifies the low-S form,
    // which recovers the same key under the opposite y parity
    if let Some(normalized) = signature.normalize_s() {
        signature = normalized;
        recovery_id = RecoveryId::new(!recovery_id.is_y_odd(), recovery_id.is_x_reduced());
    }

    let hash = signing_hash(price);
    let key = VerifyingKey::recover_from_prehash(hash.as_slice(), &signature, recovery_id)
        .map_err(|e| SignerError::RecoveryFailed(e.to_string()))?;

    Ok(address_of(&key))
}

/// Signs prices with a feeder's private key
#[derive(Clone)]
pub struct PriceSigner {
    key: SigningKey,
    address: Address,
}

impl PriceSigner {
    pub fn new(key: SigningKey) -> Self {
        let address = address_of(key.verifying_key());
        Self { key, address }
    }

    /// Build from a 32 byte big-endian secret scalar
    pub fn from_slice(secret: &[u8]) -> SignerResult<Self> {
        let key = SigningKey::from_slice(secret)
            .map_err(|e| SignerError::InvalidKey(e.to_string()))?;
        Ok(Self::new(key))
    }

    /// Build from a hex secret, with or without `0x`
    pub fn from_hex(secret: &str) -> SignerResult<Self> {
        let bytes = hex::decode(secret.trim().trim_start_matches("0x"))
            .map_err(|e| SignerError::InvalidKey(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Sign `price` in place, overwriting `v`, `r` and `s`
    pub fn sign(&self, price: &mut Price) -> SignerResult<()> {
        if price.is_pre_epoch() {
            return Err(SignerError::SigningFailed(format!(
                "age {} is before the unix epoch",
                price.age
            )));
        }

        let hash = signing_hash(price);
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(hash.as_slice())
            .map_err(|e| SignerError::SigningFailed(e.to_string()))?;

        let (r, s) = signature.split_bytes();
        price.r = B256::from_slice(&r);
        price.s = B256::from_slice(&s);
        price.v = recovery_id.to_byte() + SIGNATURE_V_OFFSET;
        Ok(())
    }
}

impl std::fmt::Debug for PriceSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceSigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}
