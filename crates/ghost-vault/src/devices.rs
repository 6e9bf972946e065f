//! Share device layout
//!
//! Each device (a USB stick, normally mounted at `/media/batN`) carries:
//!
//! ```text
//! manifest.json   signed DeviceManifest
//! share{N}.bin    raw share bytes, N = share_index
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use ghost_core::{DeviceManifest, Share};

use crate::error::{Result, VaultError};

/// Manifest file name on every device
pub const MANIFEST_FILE: &str = "manifest.json";

/// Encrypted payload file name written by `split`
pub const PAYLOAD_FILE: &str = "payload.enc";

pub fn share_file_name(index: u8) -> String {
    format!("share{}.bin", index)
}

/// Directory (and device id) used for share `index` when splitting
pub fn device_dir_name(index: u8) -> String {
    format!("bat{}", index)
}

/// What was read from one device
#[derive(Debug)]
pub struct DeviceContents {
    pub mount: PathBuf,
    pub manifest: DeviceManifest,
    pub share: Share,
}

/// Read manifest and share from a mount point
///
/// Returns `Ok(None)` when the device is not present: the mount point,
/// manifest or share file is missing. A manifest that exists but cannot be
/// parsed or violates the vault policy is an error.
pub fn read_device(mount: &Path) -> Result<Option<DeviceContents>> {
    let manifest_path = mount.join(MANIFEST_FILE);
    if !mount.is_dir() || !manifest_path.is_file() {
        return Ok(None);
    }

    let invalid = |reason: String| VaultError::InvalidManifest {
        device_id: mount.display().to_string(),
        reason,
    };

    let json = std::fs::read_to_string(&manifest_path)?;
    let manifest = DeviceManifest::from_json(&json).map_err(|e| invalid(e.to_string()))?;
    manifest
        .validate_policy()
        .map_err(|e| invalid(e.to_string()))?;

    let share_path = mount.join(share_file_name(manifest.share_index));
    if !share_path.is_file() {
        debug!("Manifest without share at {:?}", share_path);
        return Ok(None);
    }

    let data = std::fs::read(&share_path)?;
    let share = Share::new(manifest.share_index, data).map_err(|e| invalid(e.to_string()))?;

    Ok(Some(DeviceContents {
        mount: mount.to_path_buf(),
        manifest,
        share,
    }))
}

/// Write a share and its manifest into `dir`
pub fn write_device(dir: &Path, manifest: &DeviceManifest, share: &Share) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    write_private(&dir.join(share_file_name(share.index())), share.data())?;
    write_private(&dir.join(MANIFEST_FILE), manifest.to_json()?.as_bytes())?;
    Ok(())
}

/// Atomically write an owner-only file
///
/// Data goes to a temporary file in the same directory, is synced, then
/// renamed over `path`.
pub fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut file = tempfile::Builder::new()
        .prefix(".ghost-")
        .tempfile_in(parent)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}
