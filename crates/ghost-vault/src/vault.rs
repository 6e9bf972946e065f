//! Vault controller: split and assemble

use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use ghost_core::{
    cipher::EncryptedPayload, fingerprint, sha256_hex, shamir, DeviceManifest, PayloadCipher,
    RootKey, Secret, Share, KEY_SIZE, THRESHOLD,
};

use crate::audit::{events, AuditSink, NdjsonAuditLog};
use crate::config::VaultConfig;
use crate::devices::{self, device_dir_name, PAYLOAD_FILE};
use crate::error::{Result, VaultError};
use crate::keys::load_root_key;
use crate::presence::{PresenceDetector, PresenceEvent};
use crate::session::{EphemeralPlaintext, VaultSession};
use crate::state::{StateMachine, VaultState};

/// Associated data bound into every payload tag
pub const PAYLOAD_AAD: &[u8] = b"ghost-shell/payload/v1";

/// Identifies the software that wrote a manifest
pub fn firmware_hash() -> String {
    fingerprint(concat!("ghost-vault/", env!("CARGO_PKG_VERSION")).as_bytes())
}

/// Result of a split operation
#[derive(Debug, Clone)]
pub struct SplitReport {
    /// Encrypted payload file
    pub payload_path: PathBuf,

    /// One directory per share device, in share-index order
    pub device_dirs: Vec<PathBuf>,

    /// Truncated SHA-256 of the payload key
    pub key_fingerprint: String,

    /// SHA-256 of the encrypted payload file
    pub payload_hash: String,
}

/// A share that passed every check during collection
struct CollectedShare {
    device_id: String,
    share: Share,
}

/// Outcome of scanning the mount points
#[derive(Default)]
struct Collection {
    shares: Vec<CollectedShare>,
    /// Devices found at a mount, readable or not
    present: usize,
    /// Devices whose manifest signature did not verify
    attestation_failed: Vec<String>,
}

/// The vault controller
///
/// Holds no global state: everything it does is a function of the injected
/// configuration, root key, presence detector, audit sink and the files under
/// the configured paths.
pub struct Vault {
    config: VaultConfig,
    root_key: RootKey,
    presence: PresenceDetector,
    audit: Arc<dyn AuditSink>,
    history: Vec<VaultState>,
}

impl Vault {
    pub fn new(
        config: VaultConfig,
        root_key: RootKey,
        presence: PresenceDetector,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            config,
            root_key,
            presence,
            audit,
            history: Vec::new(),
        }
    }

    /// Build with the configured root key, presence backends and audit log
    pub fn from_config(config: VaultConfig) -> Result<Self> {
        config.validate()?;
        let root_key = load_root_key(&config.root_key_path)?;
        let presence = PresenceDetector::from_config(&config.presence);
        let audit: Arc<dyn AuditSink> = Arc::new(NdjsonAuditLog::new(&config.audit_log_path));
        Ok(Self::new(config, root_key, presence, audit))
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn audit(&self) -> Arc<dyn AuditSink> {
        Arc::clone(&self.audit)
    }

    /// States visited by the most recent assemble attempt
    ///
    /// On success this stops at `Loaded`, where the state machine passes to
    /// the returned session; the session's own history records the wipe.
    pub fn history(&self) -> &[VaultState] {
        &self.history
    }

    /// Run presence detection on its own
    pub fn detect_presence(&mut self, timeout: Duration) -> bool {
        self.presence.detect_presence(timeout)
    }

    /// Encrypt a payload file and shard its key across device directories
    pub fn split(&self, payload_path: &Path, output_dir: &Path) -> Result<SplitReport> {
        let plaintext = Zeroizing::new(std::fs::read(payload_path)?);
        info!(
            "Splitting {:?} ({} bytes) into {:?}",
            payload_path,
            plaintext.len(),
            output_dir
        );
        self.split_bytes(&plaintext, output_dir)
    }

    /// Encrypt `plaintext` under a fresh key and write the three devices
    ///
    /// Layout under `output_dir`: `payload.enc` plus `bat1/`, `bat2/`, `bat3/`
    /// each holding one share and its signed manifest. The payload is written
    /// last, so a failed device write leaves any earlier `payload.enc` intact.
    pub fn split_bytes(&self, plaintext: &[u8], output_dir: &Path) -> Result<SplitReport> {
        // 1. Fresh key, encrypt
        let key = Secret::random(KEY_SIZE);
        let cipher = PayloadCipher::from_slice(key.as_bytes())?;
        let encrypted = cipher.seal(plaintext, PAYLOAD_AAD)?;
        let payload_bytes = encrypted.to_bytes();
        let payload_hash = sha256_hex(&payload_bytes);

        std::fs::create_dir_all(output_dir)?;
        let payload_path = output_dir.join(PAYLOAD_FILE);

        // 2. Shard the key
        let shares = shamir::split(key.as_bytes());

        // 3. One signed manifest + share per device
        let firmware = firmware_hash();
        let manufactured = chrono::Utc::now().to_rfc3339();
        let mut device_dirs = Vec::with_capacity(shares.len());
        for share in &shares {
            let device_id = device_dir_name(share.index());
            let dir = output_dir.join(&device_id);

            let mut manifest = DeviceManifest::new(
                device_id,
                share.index(),
                firmware.as_str(),
                manufactured.as_str(),
                payload_hash.as_str(),
            )
            .with_share_hash(sha256_hex(share.data()));
            manifest.sign(&self.root_key);

            devices::write_device(&dir, &manifest, share)?;
            debug!("Wrote share {} to {:?}", share.index(), dir);
            device_dirs.push(dir);
        }

        // 4. Payload, once every device holds its share
        devices::write_private(&payload_path, &payload_bytes)?;

        let report = SplitReport {
            payload_path,
            device_dirs,
            key_fingerprint: key.fingerprint(),
            payload_hash,
        };

        info!(
            "Split complete: key {}, payload {}",
            report.key_fingerprint,
            &report.payload_hash[..16]
        );
        self.audit.log(
            events::SPLIT_COMPLETE,
            &json!({
                "key_fingerprint": report.key_fingerprint,
                "payload_hash": report.payload_hash,
                "payload_bytes": plaintext.len(),
                "devices": report.device_dirs.len(),
            }),
        );

        Ok(report)
    }

    /// Authenticate, collect, reconstruct and decrypt
    ///
    /// On success the returned session owns the decrypted payload; dropping
    /// it wipes everything. On failure nothing secret outlives this call.
    pub fn assemble(&mut self, timeout: Duration) -> Result<VaultSession> {
        let mut machine = StateMachine::new();

        match self.run_assembly(&mut machine, timeout) {
            Ok(session) => {
                self.history = session.history().to_vec();
                Ok(session)
            }
            Err(e) => {
                let kind = e.kind();
                machine.fail(kind);
                warn!("Assembly failed ({}): {}", kind, e);
                self.audit.log(
                    events::ASSEMBLY_FAILED,
                    &json!({
                        "kind": kind.as_str(),
                        "error": e.to_string(),
                        "state": machine.history().iter().rev().nth(1).map(|s| s.to_string()),
                    }),
                );

                // Intermediate key and plaintext buffers are already dropped
                let _ = machine.advance(VaultState::Wiped);
                self.history = machine.history().to_vec();
                Err(e)
            }
        }
    }

    fn run_assembly(&mut self, machine: &mut StateMachine, timeout: Duration) -> Result<VaultSession> {
        // 1. Presence
        machine.advance(VaultState::Authenticating)?;
        info!("Waiting for presence signal ({:?})", timeout);
        self.audit.log(
            events::AUTHENTICATION_STARTED,
            &json!({
                "backend": self.presence.backend_type(),
                "timeout_secs": timeout.as_secs_f64(),
            }),
        );

        let audit = Arc::clone(&self.audit);
        let present = self
            .presence
            .detect_with(timeout, &mut |event| {
                if let PresenceEvent::ToneChunk {
                    energy,
                    frequency,
                    consecutive,
                } = event
                {
                    audit.log(
                        events::TONE_DETECTED,
                        &json!({
                            "energy": energy,
                            "frequency": frequency,
                            "consecutive": consecutive,
                        }),
                    );
                }
            })
            .unwrap_or_else(|e| {
                warn!("Presence detection failed: {}", e);
                false
            });
        if !present {
            return Err(VaultError::AuthenticationTimeout);
        }
        self.audit.log(
            events::AUTHENTICATION_COMPLETE,
            &json!({ "backend": self.presence.backend_type() }),
        );

        // 2. Collect attested shares
        machine.advance(VaultState::Collecting)?;
        let payload_bytes = self.read_payload()?;
        let payload = EncryptedPayload::from_bytes(&payload_bytes)?;
        let payload_hash = sha256_hex(&payload_bytes);

        let collection = self.collect_shares(&payload_hash);
        let collected = collection.shares;
        if collected.len() < THRESHOLD as usize {
            self.audit.log(
                events::INSUFFICIENT_SHARES,
                &json!({
                    "found": collected.len(),
                    "required": THRESHOLD,
                    "devices": collected.iter().map(|c| c.device_id.as_str()).collect::<Vec<_>>(),
                }),
            );
            if collection.present > 0 && collection.attestation_failed.len() == collection.present {
                return Err(VaultError::AttestationFailure(
                    collection.attestation_failed.join(", "),
                ));
            }
            return Err(VaultError::InsufficientShares {
                found: collected.len(),
                required: THRESHOLD as usize,
            });
        }

        // 3. Reconstruct from the first two, in mount order
        machine.advance(VaultState::Reconstructing)?;
        let selected: Vec<Share> = collected
            .iter()
            .take(THRESHOLD as usize)
            .map(|c| c.share.clone())
            .collect();
        let shares_used: Vec<u8> = selected.iter().map(Share::index).collect();
        let key = shamir::reconstruct(&selected)
            .map_err(|e| VaultError::ReconstructionError(e.to_string()))?;
        drop(selected);
        drop(collected);

        info!("Key {} reconstructed from shares {:?}", key.fingerprint(), shares_used);
        self.audit.log(
            events::KEY_RECONSTRUCTED,
            &json!({
                "key_fingerprint": key.fingerprint(),
                "shares_used": shares_used,
            }),
        );

        // 4. Decrypt
        machine.advance(VaultState::Decrypting)?;
        let cipher = PayloadCipher::from_slice(key.as_bytes())?;
        let plaintext = match cipher.open(&payload, PAYLOAD_AAD) {
            Ok(plaintext) => plaintext,
            Err(ghost_core::Error::AuthenticationTagMismatch) => {
                warn!("Payload failed authentication under key {}", key.fingerprint());
                self.audit.log(
                    events::PAYLOAD_AUTHENTICATION_FAILED,
                    &json!({
                        "key_fingerprint": key.fingerprint(),
                        "payload_hash": payload_hash,
                    }),
                );
                self.audit
                    .report_tamper("payload", "authentication_tag_mismatch");
                return Err(VaultError::AuthenticationTagMismatch);
            }
            Err(e) => return Err(e.into()),
        };

        // 5. Materialize in ephemeral storage
        let ephemeral = EphemeralPlaintext::create(
            self.config.ephemeral_dir.as_deref(),
            &plaintext,
            self.config.wipe_passes,
        )?;
        machine.advance(VaultState::Loaded)?;

        info!(
            "Vault loaded: {} bytes at {:?}",
            ephemeral.len(),
            ephemeral.path()
        );
        self.audit.log(
            events::ASSEMBLY_COMPLETE,
            &json!({
                "key_fingerprint": key.fingerprint(),
                "shares_used": shares_used,
                "plaintext_bytes": ephemeral.len(),
            }),
        );

        Ok(VaultSession::new(
            key,
            ephemeral,
            shares_used,
            std::mem::take(machine),
            Arc::clone(&self.audit),
        ))
    }

    fn read_payload(&self) -> Result<Vec<u8>> {
        std::fs::read(&self.config.payload_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VaultError::DeviceIo(format!(
                    "encrypted payload not found at {:?}",
                    self.config.payload_path
                ))
            } else {
                VaultError::Io(e)
            }
        })
    }

    /// Scan every mount point in order, keeping shares that pass all checks
    fn collect_shares(&self, payload_hash: &str) -> Collection {
        if !self.config.verify_attestation {
            warn!("Device attestation is disabled");
        }

        let mut collection = Collection::default();
        let collected = &mut collection.shares;
        for mount in &self.config.device_mounts {
            let device = match devices::read_device(mount) {
                Ok(Some(device)) => device,
                Ok(None) => {
                    debug!("No share device at {:?}", mount);
                    continue;
                }
                Err(e) => {
                    // Unparseable or out-of-policy manifest fields are not
                    // covered by a signature, so they are rejected without
                    // a tamper escalation.
                    warn!("Unreadable share device at {:?}: {}", mount, e);
                    collection.present += 1;
                    self.reject(&mount.display().to_string(), &e.to_string());
                    continue;
                }
            };
            collection.present += 1;
            let device_id = device.manifest.device_id.clone();

            if self.config.verify_attestation && !device.manifest.verify(&self.root_key) {
                warn!("Attestation failed for device {}", device_id);
                self.audit.log(
                    events::ATTESTATION_FAILED,
                    &json!({
                        "device_id": device_id,
                        "mount": mount.display().to_string(),
                    }),
                );
                self.audit
                    .report_tamper(&device_id, "attestation_signature_invalid");
                collection.attestation_failed.push(device_id);
                continue;
            }

            if let Some(expected) = &device.manifest.share_hash {
                if sha256_hex(device.share.data()) != *expected {
                    warn!("Share hash mismatch on device {}", device_id);
                    self.reject(&device_id, "share_hash_mismatch");
                    self.audit.report_tamper(&device_id, "share_hash_mismatch");
                    continue;
                }
            }

            if device.manifest.payload_hash != payload_hash {
                warn!("Device {} belongs to a different payload", device_id);
                self.reject(&device_id, "payload_hash_mismatch");
                continue;
            }

            if device.share.len() != KEY_SIZE {
                self.reject(&device_id, "share_length_invalid");
                continue;
            }

            if collected
                .iter()
                .any(|c| c.share.index() == device.share.index())
            {
                self.reject(&device_id, "duplicate_share_index");
                continue;
            }

            info!("Loaded share {} from {}", device.share.index(), device_id);
            self.audit.log(
                events::SHARE_LOADED,
                &json!({
                    "device_id": device_id,
                    "share_index": device.share.index(),
                    "share_fingerprint": device.share.fingerprint(),
                }),
            );
            collected.push(CollectedShare {
                device_id,
                share: device.share,
            });
        }
        collection
    }

    fn reject(&self, device_id: &str, reason: &str) {
        self.audit.log(
            events::SHARE_REJECTED,
            &json!({
                "device_id": device_id,
                "reason": reason,
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditLog;
    use crate::error::FailureKind;
    use crate::presence::{ManualConfirmation, ToneBackend, ToneGenerator};
    use std::io::Cursor;

    struct Fixture {
        _dir: tempfile::TempDir,
        config: VaultConfig,
        root_key: RootKey,
        audit: Arc<MemoryAuditLog>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let out = dir.path().join("out");
            let config = VaultConfig {
                device_mounts: (1..=3).map(|i| out.join(format!("bat{}", i))).collect(),
                payload_path: out.join(PAYLOAD_FILE),
                root_key_path: dir.path().join("root.key"),
                audit_log_path: dir.path().join("audit.log"),
                ephemeral_dir: Some(dir.path().join("shm")),
                wipe_passes: 1,
                ..VaultConfig::default()
            };
            Self {
                _dir: dir,
                config,
                root_key: RootKey::generate(),
                audit: Arc::new(MemoryAuditLog::new()),
            }
        }

        fn out_dir(&self) -> PathBuf {
            self.config.payload_path.parent().unwrap().to_path_buf()
        }

        fn vault(&self, presence: PresenceDetector) -> Vault {
            Vault::new(
                self.config.clone(),
                self.root_key.clone(),
                presence,
                self.audit.clone(),
            )
        }

        fn confirmed(&self) -> Vault {
            self.vault(PresenceDetector::new(Box::new(ManualConfirmation::new(
                Cursor::new(b"\n".to_vec()),
            ))))
        }
    }

    #[test]
    fn test_split_writes_devices() {
        let fixture = Fixture::new();
        let vault = fixture.confirmed();

        let report = vault.split_bytes(b"payload", &fixture.out_dir()).unwrap();
        assert_eq!(report.device_dirs.len(), 3);
        assert!(report.payload_path.is_file());

        for (i, dir) in report.device_dirs.iter().enumerate() {
            let device = devices::read_device(dir).unwrap().unwrap();
            assert_eq!(device.manifest.share_index as usize, i + 1);
            assert_eq!(device.manifest.payload_hash, report.payload_hash);
            assert!(device.manifest.verify(&fixture.root_key));
            assert_eq!(device.share.len(), KEY_SIZE);
        }
        assert!(fixture.audit.contains(events::SPLIT_COMPLETE));
    }

    #[test]
    fn test_failed_device_write_keeps_previous_payload() {
        let fixture = Fixture::new();
        let vault = fixture.confirmed();
        let out = fixture.out_dir();
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join(PAYLOAD_FILE), b"previous payload").unwrap();

        // bat3 cannot become a directory
        std::fs::write(out.join("bat3"), b"not a directory").unwrap();

        assert!(vault.split_bytes(b"new payload", &out).is_err());
        assert_eq!(std::fs::read(out.join(PAYLOAD_FILE)).unwrap(), b"previous payload");
        assert!(!fixture.audit.contains(events::SPLIT_COMPLETE));
    }

    #[test]
    fn test_assemble_round_trip() {
        let fixture = Fixture::new();
        let mut vault = fixture.confirmed();
        vault.split_bytes(b"the weights", &fixture.out_dir()).unwrap();

        let session = vault.assemble(Duration::from_secs(5)).unwrap();
        assert_eq!(session.read_plaintext().unwrap().as_slice(), b"the weights");
        assert_eq!(session.shares_used(), &[1, 2]);
        assert_eq!(session.state(), VaultState::Loaded);

        let path = session.plaintext_path().to_path_buf();
        drop(session);
        assert!(!path.exists());
    }

    #[test]
    fn test_tone_presence_unlocks() {
        let fixture = Fixture::new();
        let mut presence = fixture.config.presence.clone();
        presence.poll_interval_ms = 0;
        let tone = ToneGenerator::sine(18_000.0, 0.5, presence.sample_rate);
        let mut vault = fixture.vault(PresenceDetector::new(Box::new(ToneBackend::new(
            tone, presence,
        ))));
        vault.split_bytes(b"tone", &fixture.out_dir()).unwrap();

        let session = vault.assemble(Duration::from_secs(5)).unwrap();
        assert_eq!(session.read_plaintext().unwrap().as_slice(), b"tone");

        let logged = fixture.audit.events();
        assert_eq!(
            logged
                .iter()
                .filter(|e| *e == events::TONE_DETECTED)
                .count(),
            3
        );
    }

    #[test]
    fn test_no_presence_never_reads_devices() {
        let fixture = Fixture::new();
        let mut vault = fixture.vault(PresenceDetector::new(Box::new(ManualConfirmation::new(
            Cursor::new(Vec::new()),
        ))));
        vault.split_bytes(b"x", &fixture.out_dir()).unwrap();

        let err = vault.assemble(Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, VaultError::AuthenticationTimeout));
        assert!(!fixture.audit.contains(events::SHARE_LOADED));
        assert!(vault
            .history()
            .contains(&VaultState::Failed(FailureKind::AuthenticationTimeout)));
        assert_eq!(vault.history().last(), Some(&VaultState::Wiped));
    }

    #[test]
    fn test_forged_device_is_skipped_and_escalated() {
        let fixture = Fixture::new();
        let mut vault = fixture.confirmed();
        let report = vault.split_bytes(b"forged", &fixture.out_dir()).unwrap();

        // Re-sign device 1 with a different root key
        let manifest_path = report.device_dirs[0].join(devices::MANIFEST_FILE);
        let mut manifest =
            DeviceManifest::from_json(&std::fs::read_to_string(&manifest_path).unwrap()).unwrap();
        manifest.sign(&RootKey::generate());
        std::fs::write(&manifest_path, manifest.to_json().unwrap()).unwrap();

        let session = vault.assemble(Duration::from_secs(5)).unwrap();
        assert_eq!(session.shares_used(), &[2, 3]);
        assert!(fixture.audit.contains(events::ATTESTATION_FAILED));
        assert!(fixture.audit.contains(events::TAMPER_ESCALATION));
    }

    #[test]
    fn test_all_devices_forged_is_attestation_failure() {
        let fixture = Fixture::new();
        let mut vault = fixture.confirmed();
        let report = vault.split_bytes(b"forged twice", &fixture.out_dir()).unwrap();
        std::fs::remove_dir_all(&report.device_dirs[2]).unwrap();

        let impostor = RootKey::generate();
        for dir in &report.device_dirs[..2] {
            let path = dir.join(devices::MANIFEST_FILE);
            let mut manifest =
                DeviceManifest::from_json(&std::fs::read_to_string(&path).unwrap()).unwrap();
            manifest.sign(&impostor);
            std::fs::write(&path, manifest.to_json().unwrap()).unwrap();
        }

        let err = vault.assemble(Duration::from_secs(5)).unwrap_err();
        match &err {
            VaultError::AttestationFailure(ids) => assert_eq!(ids, "bat1, bat2"),
            other => panic!("expected attestation failure, got {:?}", other),
        }
        assert_eq!(err.kind(), FailureKind::AttestationFailure);
        assert!(vault
            .history()
            .contains(&VaultState::Failed(FailureKind::AttestationFailure)));
        assert!(fixture.audit.contains(events::INSUFFICIENT_SHARES));
    }

    #[test]
    fn test_attestation_can_be_disabled() {
        let mut fixture = Fixture::new();
        fixture.config.verify_attestation = false;
        let vault = fixture.confirmed();
        vault.split_bytes(b"lab", &fixture.out_dir()).unwrap();

        // A vault with the wrong root key still assembles
        let mut other = Vault::new(
            fixture.config.clone(),
            RootKey::generate(),
            PresenceDetector::new(Box::new(ManualConfirmation::new(Cursor::new(
                b"\n".to_vec(),
            )))),
            fixture.audit.clone(),
        );
        assert!(other.assemble(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_swapped_share_is_rejected_as_tamper() {
        let fixture = Fixture::new();
        let mut vault = fixture.confirmed();
        let report = vault.split_bytes(b"swap", &fixture.out_dir()).unwrap();

        std::fs::write(report.device_dirs[0].join("share1.bin"), [0u8; KEY_SIZE]).unwrap();

        let session = vault.assemble(Duration::from_secs(5)).unwrap();
        assert_eq!(session.shares_used(), &[2, 3]);

        let rejected: Vec<_> = fixture
            .audit
            .records()
            .into_iter()
            .filter(|r| r.event == events::SHARE_REJECTED)
            .collect();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].data["reason"], "share_hash_mismatch");
    }

    #[test]
    fn test_shares_from_another_split_are_rejected() {
        let fixture = Fixture::new();
        let mut vault = fixture.confirmed();
        let out = fixture.out_dir();
        vault.split_bytes(b"first", &out).unwrap();

        // Device 2 comes from a different split; device 3 is missing
        let other_out = out.with_file_name("other");
        let other = vault.split_bytes(b"second", &other_out).unwrap();
        std::fs::remove_dir_all(out.join("bat3")).unwrap();
        std::fs::remove_dir_all(out.join("bat2")).unwrap();
        std::fs::rename(&other.device_dirs[1], out.join("bat2")).unwrap();

        let err = vault.assemble(Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, VaultError::InsufficientShares { found: 1, required: 2 }));
        assert!(!fixture.audit.contains(events::TAMPER_ESCALATION));
        assert!(fixture.audit.contains(events::INSUFFICIENT_SHARES));
    }

    #[test]
    fn test_tampered_payload_fails_authentication() {
        let fixture = Fixture::new();
        let mut vault = fixture.confirmed();
        let report = vault.split_bytes(b"tamper me", &fixture.out_dir()).unwrap();

        // Flip one ciphertext bit and re-sign every manifest's payload hash
        let mut bytes = std::fs::read(&report.payload_path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        std::fs::write(&report.payload_path, &bytes).unwrap();
        let new_hash = sha256_hex(&bytes);
        for dir in &report.device_dirs {
            let path = dir.join(devices::MANIFEST_FILE);
            let mut manifest =
                DeviceManifest::from_json(&std::fs::read_to_string(&path).unwrap()).unwrap();
            manifest.payload_hash = new_hash.clone();
            std::fs::write(&path, manifest.to_json().unwrap()).unwrap();
        }

        let err = vault.assemble(Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, VaultError::AuthenticationTagMismatch));
        assert_eq!(err.kind(), FailureKind::ReconstructionError);
        assert!(fixture.audit.contains(events::PAYLOAD_AUTHENTICATION_FAILED));
        assert!(fixture.audit.contains(events::TAMPER_ESCALATION));
        assert!(vault
            .history()
            .contains(&VaultState::Failed(FailureKind::ReconstructionError)));

        // Nothing left in the ephemeral directory
        let shm = fixture.config.ephemeral_dir.clone().unwrap();
        let leftovers = std::fs::read_dir(&shm).map(|d| d.count()).unwrap_or(0);
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_missing_payload_is_device_error() {
        let fixture = Fixture::new();
        let mut vault = fixture.confirmed();
        let err = vault.assemble(Duration::from_secs(5)).unwrap_err();
        assert_eq!(err.kind(), FailureKind::DeviceIoError);
    }

    #[test]
    fn test_from_config_requires_root_key() {
        let fixture = Fixture::new();
        assert!(matches!(
            Vault::from_config(fixture.config.clone()),
            Err(VaultError::Config(_))
        ));
    }

    #[test]
    fn test_firmware_hash_is_fingerprint() {
        assert_eq!(firmware_hash().len(), 16);
    }
}
