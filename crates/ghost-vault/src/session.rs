//! Live vault sessions and their teardown
//!
//! Decrypted plaintext only ever lives in a private directory on a
//! RAM-backed filesystem where one exists. Both the plaintext file and the
//! reconstructed key are destroyed when the session is dropped, whichever
//! way the holder exits.

use serde_json::json;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{error, info};
use zeroize::{Zeroize, Zeroizing};

use ghost_core::Secret;

use crate::audit::{events, AuditSink};
use crate::error::Result;
use crate::state::{StateMachine, VaultState};
use crate::wipe::secure_wipe;

/// File name of the plaintext inside the session directory
pub const PLAINTEXT_FILE: &str = "payload";

/// Base directory for ephemeral plaintext
///
/// The configured directory if any, otherwise `/dev/shm` when it exists,
/// otherwise the system temporary directory.
pub fn ephemeral_base(configured: Option<&Path>) -> PathBuf {
    if let Some(dir) = configured {
        return dir.to_path_buf();
    }
    let shm = Path::new("/dev/shm");
    if cfg!(target_os = "linux") && shm.is_dir() {
        return shm.to_path_buf();
    }
    std::env::temp_dir()
}

/// A decrypted payload on disk, wiped on drop
pub struct EphemeralPlaintext {
    dir: Option<TempDir>,
    path: PathBuf,
    len: usize,
    passes: u32,
}

impl EphemeralPlaintext {
    /// Write `contents` to a fresh owner-only file under `base`
    pub fn create(base: Option<&Path>, contents: &[u8], passes: u32) -> io::Result<Self> {
        let base = ephemeral_base(base);
        std::fs::create_dir_all(&base)?;
        let dir = tempfile::Builder::new().prefix("ghost_").tempdir_in(&base)?;
        let path = dir.path().join(PLAINTEXT_FILE);

        // From here on, Drop cleans up even if the write fails
        let plaintext = Self {
            dir: Some(dir),
            path,
            len: contents.len(),
            passes,
        };

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&plaintext.path)?;
        file.write_all(contents)?;
        file.sync_all()?;

        Ok(plaintext)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_wiped(&self) -> bool {
        self.dir.is_none()
    }

    /// Read the plaintext back into zeroizing memory
    pub fn read(&self) -> io::Result<Zeroizing<Vec<u8>>> {
        Ok(Zeroizing::new(std::fs::read(&self.path)?))
    }

    /// Securely wipe the file and remove its directory; idempotent
    pub fn wipe(&mut self) -> io::Result<()> {
        let Some(dir) = self.dir.take() else {
            return Ok(());
        };
        let wiped = secure_wipe(&self.path, self.passes);
        let closed = dir.close();
        wiped.and(closed)
    }
}

impl Drop for EphemeralPlaintext {
    fn drop(&mut self) {
        if let Err(e) = self.wipe() {
            error!("Failed to wipe plaintext at {:?}: {}", self.path, e);
        }
    }
}

impl std::fmt::Debug for EphemeralPlaintext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralPlaintext")
            .field("path", &self.path)
            .field("len", &self.len)
            .field("wiped", &self.is_wiped())
            .finish()
    }
}

/// Handle to a successfully assembled vault
///
/// Holds the reconstructed key and the decrypted payload. Dropping the
/// session (or calling [`VaultSession::wipe`]) zeroizes the key, wipes the
/// plaintext and moves the state machine to `Wiped`.
pub struct VaultSession {
    key: Secret,
    plaintext: EphemeralPlaintext,
    key_fingerprint: String,
    shares_used: Vec<u8>,
    machine: StateMachine,
    audit: Arc<dyn AuditSink>,
}

impl VaultSession {
    pub(crate) fn new(
        key: Secret,
        plaintext: EphemeralPlaintext,
        shares_used: Vec<u8>,
        machine: StateMachine,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            key_fingerprint: key.fingerprint(),
            key,
            plaintext,
            shares_used,
            machine,
            audit,
        }
    }

    /// Location of the decrypted payload
    pub fn plaintext_path(&self) -> &Path {
        self.plaintext.path()
    }

    pub fn plaintext_len(&self) -> usize {
        self.plaintext.len()
    }

    pub fn read_plaintext(&self) -> io::Result<Zeroizing<Vec<u8>>> {
        self.plaintext.read()
    }

    /// Truncated SHA-256 of the reconstructed key
    pub fn key_fingerprint(&self) -> &str {
        &self.key_fingerprint
    }

    /// Share indices that were combined, in the order used
    pub fn shares_used(&self) -> &[u8] {
        &self.shares_used
    }

    pub fn state(&self) -> VaultState {
        self.machine.state()
    }

    pub fn history(&self) -> &[VaultState] {
        self.machine.history()
    }

    /// Tear down now, reporting any wipe failure
    pub fn wipe(mut self) -> Result<()> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<()> {
        if self.machine.state().is_terminal() {
            return Ok(());
        }

        self.key.zeroize();
        let wiped = self.plaintext.wipe();
        let _ = self.machine.advance(VaultState::Wiped);

        match &wiped {
            Ok(()) => {
                info!("Vault session {} wiped", self.key_fingerprint);
                self.audit.log(
                    events::SECURE_WIPE_COMPLETE,
                    &json!({
                        "key_fingerprint": self.key_fingerprint,
                        "plaintext_bytes": self.plaintext.len(),
                    }),
                );
            }
            Err(e) => {
                error!("Vault session {} wipe failed: {}", self.key_fingerprint, e);
                self.audit.log(
                    events::SECURE_WIPE_FAILED,
                    &json!({
                        "key_fingerprint": self.key_fingerprint,
                        "error": e.to_string(),
                    }),
                );
            }
        }
        wiped.map_err(Into::into)
    }
}

impl Drop for VaultSession {
    fn drop(&mut self) {
        let _ = self.teardown();
    }
}

impl std::fmt::Debug for VaultSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultSession")
            .field("key_fingerprint", &self.key_fingerprint)
            .field("plaintext", &self.plaintext)
            .field("shares_used", &self.shares_used)
            .field("state", &self.machine.state())
            .finish_non_exhaustive()
    }
}
