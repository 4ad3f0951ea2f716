//! Per asset pair price store
//!
//! Features:
//! - One price per feeder address, newest observation wins
//! - Signer recovery and allow-list check on insertion
//! - Expiry pruning and random quorum truncation
//! - Median and spread aggregation

pub mod errors;
pub mod store;

pub use errors::{StoreError, StoreResult};
pub use store::PriceStore;
