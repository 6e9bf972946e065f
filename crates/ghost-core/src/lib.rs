//! Ghost Core - Threshold key material, payload cipher, and device attestation
//!
//! This crate provides the cryptographic building blocks of the Ghost Shell
//! vault: GF(2⁸) arithmetic, Shamir secret sharing over that field, the
//! ChaCha20-Poly1305 payload cipher, and HMAC attestation of share-carrying
//! devices.

pub mod attestation;
pub mod cipher;
pub mod error;
pub mod field;
pub mod shamir;
pub mod types;

pub use attestation::{DeviceManifest, RootKey};
pub use cipher::{chacha_block, EncryptedPayload, PayloadCipher};
pub use error::{Error, Result};
pub use shamir::{Share, SharingScheme};
pub use types::{fingerprint, sha256_hex, Secret};

/// Shares required to reconstruct the vault key
pub const THRESHOLD: u8 = 2;

/// Shares produced for every vault key
pub const TOTAL_SHARES: u8 = 3;

/// Size of the symmetric payload key in bytes
pub const KEY_SIZE: usize = 32;
