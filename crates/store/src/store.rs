//! Latest-price-per-feeder storage for a single asset pair
//!
//! Keyed by the recovered feeder address, so a feeder can only ever
//! contribute one observation to an aggregate.

use alloy_primitives::{Address, U256};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use oracle_core::{u256_to_f64, AssetPair, Price};

use crate::{StoreError, StoreResult};

/// Price store for one asset pair
#[derive(Debug)]
pub struct PriceStore {
    asset_pair: AssetPair,

    /// Feeder allow-list
    feeds: Arc<HashSet<Address>>,

    /// Most recent price per feeder
    prices: HashMap<Address, Price>,

    /// Source for quorum truncation
    rng: StdRng,
}

impl PriceStore {
    pub fn new(asset_pair: AssetPair, feeds: Arc<HashSet<Address>>) -> Self {
        Self::with_rng(asset_pair, feeds, StdRng::from_entropy())
    }

    /// Store whose truncation is reproducible for a given seed
    pub fn with_seed(asset_pair: AssetPair, feeds: Arc<HashSet<Address>>, seed: u64) -> Self {
        Self::with_rng(asset_pair, feeds, StdRng::seed_from_u64(seed))
    }

    pub fn with_rng(asset_pair: AssetPair, feeds: Arc<HashSet<Address>>, rng: StdRng) -> Self {
        Self {
            asset_pair,
            feeds,
            prices: HashMap::new(),
            rng,
        }
    }

    pub fn asset_pair(&self) -> &AssetPair {
        &self.asset_pair
    }

    /// Validate and insert a price.
    ///
    /// Returns the feeder address and whether the price was kept. A price
    /// older than the one already held for the same feeder is ignored.
    pub fn add(&mut self, price: Price) -> StoreResult<(Address, bool)> {
        if price.asset_pair != self.asset_pair {
            return Err(StoreError::PairMismatch {
                expected: self.asset_pair.clone(),
                got: price.asset_pair,
            });
        }

        let address = price
            .signer_address()
            .map_err(|source| StoreError::InvalidSignature {
                asset_pair: self.asset_pair.clone(),
                source,
            })?;

        if !self.feeds.contains(&address) {
            return Err(StoreError::NotAuthorized {
                asset_pair: self.asset_pair.clone(),
                address,
            });
        }

        if price.val.is_zero() {
            return Err(StoreError::NonPositivePrice {
                asset_pair: self.asset_pair.clone(),
                address,
            });
        }

        match self.prices.entry(address) {
            Entry::Occupied(mut held) => {
                if price.age > held.get().age {
                    held.insert(price);
                    Ok((address, true))
                } else {
                    debug!(
                        "Ignoring {} price from {}: not newer than held observation",
                        self.asset_pair, address
                    );
                    Ok((address, false))
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(price);
                Ok((address, true))
            }
        }
    }

    /// Snapshot of retained prices, one per feeder, in no particular order
    pub fn prices(&self) -> Vec<Price> {
        self.prices.values().cloned().collect()
    }

    /// Retained prices ordered ascending by value, as the median contract expects
    pub fn sorted_prices(&self) -> Vec<Price> {
        let mut prices = self.prices();
        prices.sort_by(|a, b| a.val.cmp(&b.val));
        prices
    }

    pub fn count(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// Median of retained values; the floor of the mean of the two middle
    /// values for even counts, zero when empty
    pub fn median(&self) -> U256 {
        let mut vals: Vec<U256> = self.prices.values().map(|p| p.val).collect();
        if vals.is_empty() {
            return U256::ZERO;
        }
        vals.sort_unstable();

        let mid = vals.len() / 2;
        if vals.len() % 2 == 1 {
            return vals[mid];
        }

        let (a, b) = (vals[mid - 1], vals[mid]);
        let two = U256::from(2u8);
        // floor((a + b) / 2) without overflowing
        a / two + b / two + (a % two + b % two) / two
    }

    /// Percentage deviation of the median from `reference`.
    ///
    /// A zero reference yields `+inf`.
    pub fn spread(&self, reference: U256) -> f64 {
        if reference.is_zero() {
            return f64::INFINITY;
        }

        let median = self.median();
        let (diff, sign) = if median >= reference {
            (median - reference, 1.0)
        } else {
            (reference - median, -1.0)
        };

        sign * u256_to_f64(diff) * 100.0 / u256_to_f64(reference)
    }

    /// Remove prices observed strictly before `cutoff`; returns the number removed
    pub fn prune_older_than(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.prices.len();
        self.prices.retain(|_, p| p.age >= cutoff);
        before - self.prices.len()
    }

    /// Remove prices observed at or before `cutoff`; returns the number removed
    pub fn prune_not_newer_than(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.prices.len();
        self.prices.retain(|_, p| p.age > cutoff);
        before - self.prices.len()
    }

    /// Keep a uniformly random subset of `quorum` prices
    pub fn truncate_to_quorum(&mut self, quorum: usize) {
        if self.prices.len() <= quorum {
            return;
        }

        // Fixed candidate order so a seeded rng gives a reproducible pick
        let mut addresses: Vec<Address> = self.prices.keys().copied().collect();
        addresses.sort_unstable();

        let keep: HashSet<Address> = addresses
            .choose_multiple(&mut self.rng, quorum)
            .copied()
            .collect();
        self.prices.retain(|address, _| keep.contains(address));
    }

    pub fn clear(&mut self) {
        self.prices.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use oracle_core::{wad, PriceSigner};

    fn signers(n: u8) -> Vec<PriceSigner> {
        (1..=n)
            .map(|i| PriceSigner::from_slice(&[i; 32]).unwrap())
            .collect()
    }

    fn store_for(signers: &[PriceSigner]) -> PriceStore {
        let feeds = signers.iter().map(|s| s.address()).collect();
        PriceStore::with_seed(AssetPair::new("ETHUSD"), Arc::new(feeds), 42)
    }

    fn signed(signer: &PriceSigner, val: U256, age: DateTime<Utc>) -> Price {
        let mut price = Price::new("ETHUSD", val, age);
        signer.sign(&mut price).unwrap();
        price
    }

    #[test]
    fn test_dedup_keeps_newest_in_either_order() {
        let signers = signers(1);
        let now = Utc::now();
        let old = signed(&signers[0], wad(1), now - Duration::seconds(10));
        let new = signed(&signers[0], wad(2), now);

        let mut forward = store_for(&signers);
        forward.add(old.clone()).unwrap();
        forward.add(new.clone()).unwrap();

        let mut backward = store_for(&signers);
        backward.add(new.clone()).unwrap();
        let (_, kept) = backward.add(old).unwrap();

        assert!(!kept);
        assert_eq!(forward.prices(), vec![new.clone()]);
        assert_eq!(backward.prices(), vec![new]);
    }

    #[test]
    fn test_same_age_does_not_replace() {
        let signers = signers(1);
        let now = Utc::now();
        let mut store = store_for(&signers);
        store.add(signed(&signers[0], wad(1), now)).unwrap();
        store.add(signed(&signers[0], wad(9), now)).unwrap();

        assert_eq!(store.count(), 1);
        assert_eq!(store.median(), wad(1));
    }

    #[test]
    fn test_unauthorized_feeder_rejected() {
        let signers = signers(2);
        let mut store = store_for(&signers[..1]);
        let err = store.add(signed(&signers[1], wad(1), Utc::now())).unwrap_err();

        assert!(matches!(err, StoreError::NotAuthorized { address, .. } if address == signers[1].address()));
        assert!(store.prices().is_empty());
    }

    #[test]
    fn test_zero_price_rejected() {
        let signers = signers(1);
        let mut store = store_for(&signers);
        let err = store.add(signed(&signers[0], U256::ZERO, Utc::now())).unwrap_err();
        assert!(matches!(err, StoreError::NonPositivePrice { .. }));
    }

    #[test]
    fn test_bad_signature_rejected() {
        let signers = signers(1);
        let mut store = store_for(&signers);
        let mut price = signed(&signers[0], wad(1), Utc::now());
        price.v = 30;

        assert!(matches!(
            store.add(price),
            Err(StoreError::InvalidSignature { .. })
        ));
    }

    #[test]
    fn test_other_pair_rejected() {
        let signers = signers(1);
        let mut store = store_for(&signers);
        let mut price = Price::new("BTCUSD", wad(1), Utc::now());
        signers[0].sign(&mut price).unwrap();

        assert!(matches!(store.add(price), Err(StoreError::PairMismatch { .. })));
    }

    #[test]
    fn test_median_odd_and_even() {
        let signers = signers(4);
        let now = Utc::now();

        let mut store = store_for(&signers);
        assert_eq!(store.median(), U256::ZERO);

        for (signer, units) in signers.iter().zip([5u64, 1, 3]) {
            store.add(signed(signer, wad(units), now)).unwrap();
        }
        assert_eq!(store.median(), wad(3));

        let mut store = store_for(&signers);
        for (signer, units) in signers.iter().zip([4u64, 2, 1, 3]) {
            store.add(signed(signer, U256::from(units), now)).unwrap();
        }
        assert_eq!(store.median(), U256::from(2u64));

        let mut store = store_for(&signers);
        for (signer, units) in signers.iter().zip([4u64, 2, 1, 3]) {
            store.add(signed(signer, wad(units), now)).unwrap();
        }
        assert_eq!(store.median(), wad(2) + wad(1) / U256::from(2u64));
    }

    #[test]
    fn test_median_of_huge_values_does_not_overflow() {
        let signers = signers(2);
        let now = Utc::now();
        let mut store = store_for(&signers);
        store.add(signed(&signers[0], U256::MAX, now)).unwrap();
        store.add(signed(&signers[1], U256::MAX - U256::from(2u64), now)).unwrap();

        assert_eq!(store.median(), U256::MAX - U256::from(1u64));
    }

    #[test]
    fn test_spread() {
        let signers = signers(3);
        let now = Utc::now();
        let mut store = store_for(&signers);
        for (signer, units) in signers.iter().zip([101u64, 102, 103]) {
            store.add(signed(signer, wad(units), now)).unwrap();
        }

        assert_eq!(store.spread(wad(100)), 2.0);
        assert!(store.spread(wad(104)) < 0.0);
        assert_eq!(store.spread(wad(102)), 0.0);
        assert!(store.spread(U256::ZERO).is_infinite());
    }

    #[test]
    fn test_truncate_to_quorum() {
        let signers = signers(10);
        let now = Utc::now();
        let mut store = store_for(&signers);
        for (i, signer) in signers.iter().enumerate() {
            store.add(signed(signer, wad(i as u64 + 1), now)).unwrap();
        }
        let original = store.prices();

        store.truncate_to_quorum(4);

        let kept = store.prices();
        assert_eq!(kept.len(), 4);
        assert!(kept.iter().all(|p| original.contains(p)));
        let addresses: HashSet<_> = kept.iter().map(|p| p.signer_address().unwrap()).collect();
        assert_eq!(addresses.len(), 4);
    }

    #[test]
    fn test_truncate_is_reproducible_with_seed() {
        let signers = signers(10);
        let now = Utc::now();
        let fill = || {
            let mut store = store_for(&signers);
            for signer in &signers {
                store.add(signed(signer, wad(1), now)).unwrap();
            }
            store.truncate_to_quorum(3);
            let mut kept: Vec<_> = store.prices().iter().map(|p| p.signer_address().unwrap()).collect();
            kept.sort();
            kept
        };

        assert_eq!(fill(), fill());
    }

    #[test]
    fn test_truncate_below_quorum_is_noop() {
        let signers = signers(3);
        let mut store = store_for(&signers);
        for signer in &signers {
            store.add(signed(signer, wad(1), Utc::now())).unwrap();
        }
        store.truncate_to_quorum(5);
        assert_eq!(store.count(), 3);
    }

    #[test]
    fn test_pruning() {
        let signers = signers(3);
        let now = Utc::now();
        let mut store = store_for(&signers);
        store.add(signed(&signers[0], wad(1), now - Duration::seconds(100))).unwrap();
        store.add(signed(&signers[1], wad(1), now - Duration::seconds(20))).unwrap();
        store.add(signed(&signers[2], wad(1), now)).unwrap();

        assert_eq!(store.prune_older_than(now - Duration::seconds(60)), 1);
        assert_eq!(store.count(), 2);

        // at-or-before: the price exactly at the cutoff goes too
        assert_eq!(store.prune_not_newer_than(now - Duration::seconds(20)), 1);
        assert_eq!(store.count(), 1);

        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn test_sorted_prices_ascending() {
        let signers = signers(3);
        let now = Utc::now();
        let mut store = store_for(&signers);
        for (signer, units) in signers.iter().zip([7u64, 3, 5]) {
            store.add(signed(signer, wad(units), now)).unwrap();
        }
        let vals: Vec<_> = store.sorted_prices().iter().map(|p| p.val).collect();
        assert_eq!(vals, vec![wad(3), wad(5), wad(7)]);
    }
}
