//! Core types and utilities for the price oracle relay
//!
//! This crate provides shared types used across all components:
//! - Signed price observations and their wire message
//! - Canonical price hashing, signing and signer recovery
//! - WAD fixed-point helpers
//! - Relayer and pair configuration

pub mod types;
pub mod signer;
pub mod message;
pub mod wad;
pub mod config;
pub mod errors;

pub use types::*;
pub use signer::*;
pub use message::*;
pub use wad::*;
pub use config::*;
pub use errors::*;
