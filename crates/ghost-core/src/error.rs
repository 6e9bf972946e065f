//! Error types for the Ghost core library

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Insufficient shares: {provided} provided, {required} required")]
    InsufficientShares { required: usize, provided: usize },

    #[error("Duplicate share index: {0}")]
    DuplicateShareIndex(u8),

    #[error("Invalid share index: {0}")]
    InvalidShareIndex(u8),

    #[error("Share length mismatch: expected {expected} bytes, found {found}")]
    ShareLengthMismatch { expected: usize, found: usize },

    #[error("Invalid sharing parameters: threshold {threshold} of {total} shares")]
    InvalidParameters { threshold: u8, total: u8 },

    #[error("Authentication tag mismatch")]
    AuthenticationTagMismatch,

    #[error("Malformed encrypted payload: {0}")]
    MalformedPayload(String),

    #[error("Payload too large for a single nonce: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Invalid key length: expected {expected} bytes, found {found}")]
    InvalidKeyLength { expected: usize, found: usize },

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
