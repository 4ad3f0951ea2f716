//! Error types

use thiserror::Error;

/// Signing and signer-recovery errors
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Public key recovery failed: {0}")]
    RecoveryFailed(String),

    #[error("Invalid private key: {0}")]
    InvalidKey(String),

    #[error("Signing failed: {0}")]
    SigningFailed(String),
}

/// Wire message errors
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("Failed to decode message: {0}")]
    Decode(String),

    #[error("Failed to encode message: {0}")]
    Encode(String),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Duplicate asset pair in configuration: {0}")]
    DuplicatePair(String),
}

/// Result type alias
pub type SignerResult<T> = Result<T, SignerError>;
pub type MessageResult<T> = Result<T, MessageError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
