//! Root attestation key storage

use std::path::Path;
use tracing::info;
use zeroize::Zeroizing;

use ghost_core::RootKey;

use crate::devices::write_private;
use crate::error::{Result, VaultError};

/// Load the 32-byte root key
///
/// A missing or malformed key file is a configuration error; there is no
/// derived fallback key.
pub fn load_root_key(path: &Path) -> Result<RootKey> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => Zeroizing::new(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(VaultError::Config(format!(
                "root attestation key not found at {:?} (run `ghost keygen`)",
                path
            )))
        }
        Err(e) => return Err(e.into()),
    };

    RootKey::from_slice(&bytes).map_err(|_| {
        VaultError::Config(format!(
            "root attestation key at {:?} must be exactly 32 bytes, found {}",
            path,
            bytes.len()
        ))
    })
}

/// Generate and store a fresh root key
///
/// Refuses to replace an existing key unless `force` is set: every manifest
/// signed with the old key stops verifying.
pub fn write_root_key(path: &Path, force: bool) -> Result<RootKey> {
    if path.exists() && !force {
        return Err(VaultError::Config(format!(
            "refusing to overwrite existing root key at {:?}",
            path
        )));
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let key = RootKey::generate();
    write_private(path, key.as_bytes())?;
    info!("Wrote root attestation key {} to {:?}", key.fingerprint(), path);
    Ok(key)
}
