//! Device attestation
//!
//! Each hardware share device carries a JSON manifest whose
//! `attestation_signature` is HMAC-SHA256 over
//! `"{device_id}:{firmware_hash}:{manufacturing_date}"` keyed with the vault
//! root key. A manifest that fails verification marks the device as cloned or
//! tampered with.

use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};
use crate::types::fingerprint;
use crate::{KEY_SIZE, THRESHOLD, TOTAL_SHARES};

type HmacSha256 = Hmac<Sha256>;

/// The 32-byte key attestation signatures are computed with
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RootKey([u8; KEY_SIZE]);

impl RootKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Build from a slice, which must be exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| Error::InvalidKeyLength {
            expected: KEY_SIZE,
            found: bytes.len(),
        })?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.0)
    }

    fn mac(&self) -> HmacSha256 {
        // HMAC accepts keys of any length
        <HmacSha256 as Mac>::new_from_slice(&self.0).unwrap_or_else(|_| unreachable!())
    }
}

impl std::fmt::Debug for RootKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RootKey({})", self.fingerprint())
    }
}

/// Metadata stored beside each share
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceManifest {
    pub device_id: String,
    pub share_index: u8,
    pub threshold: u8,
    pub total_shares: u8,
    pub firmware_hash: String,
    pub manufacturing_date: String,
    /// Hex HMAC-SHA256 over the attestation message
    pub attestation_signature: String,
    /// SHA-256 of the encrypted payload this share unlocks
    pub payload_hash: String,
    /// SHA-256 of the share bytes, absent on manifests written by older tools
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_hash: Option<String>,
}

impl DeviceManifest {
    /// Build an unsigned manifest for the vault's 2-of-3 policy
    pub fn new(
        device_id: impl Into<String>,
        share_index: u8,
        firmware_hash: impl Into<String>,
        manufacturing_date: impl Into<String>,
        payload_hash: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            share_index,
            threshold: THRESHOLD,
            total_shares: TOTAL_SHARES,
            firmware_hash: firmware_hash.into(),
            manufacturing_date: manufacturing_date.into(),
            attestation_signature: String::new(),
            payload_hash: payload_hash.into(),
            share_hash: None,
        }
    }

    /// Record the digest of the share this manifest describes
    pub fn with_share_hash(mut self, share_hash: impl Into<String>) -> Self {
        self.share_hash = Some(share_hash.into());
        self
    }

    /// The exact bytes covered by the signature
    pub fn attestation_message(&self) -> String {
        format!(
            "{}:{}:{}",
            self.device_id, self.firmware_hash, self.manufacturing_date
        )
    }

    /// Compute the signature for this manifest without storing it
    pub fn compute_signature(&self, root_key: &RootKey) -> String {
        let mut mac = root_key.mac();
        mac.update(self.attestation_message().as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Sign in place
    pub fn sign(&mut self, root_key: &RootKey) {
        self.attestation_signature = self.compute_signature(root_key);
    }

    /// Check the signature in constant time
    ///
    /// A signature that is not valid hex simply fails verification.
    pub fn verify(&self, root_key: &RootKey) -> bool {
        let Ok(signature) = hex::decode(&self.attestation_signature) else {
            return false;
        };
        let mut mac = root_key.mac();
        mac.update(self.attestation_message().as_bytes());
        mac.verify_slice(&signature).is_ok()
    }

    /// Check the manifest describes the 2-of-3 vault policy
    pub fn validate_policy(&self) -> Result<()> {
        if self.threshold != THRESHOLD || self.total_shares != TOTAL_SHARES {
            return Err(Error::InvalidManifest(format!(
                "device {} declares {}-of-{}, vault requires {}-of-{}",
                self.device_id, self.threshold, self.total_shares, THRESHOLD, TOTAL_SHARES
            )));
        }
        if self.share_index == 0 || self.share_index > TOTAL_SHARES {
            return Err(Error::InvalidManifest(format!(
                "device {} has share index {} outside 1..={}",
                self.device_id, self.share_index, TOTAL_SHARES
            )));
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Verify a manifest against the root key
pub fn verify(manifest: &DeviceManifest, root_key: &RootKey) -> bool {
    manifest.verify(root_key)
}
