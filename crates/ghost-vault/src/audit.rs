//! Audit sinks
//!
//! The vault reports what it does to an append-only sink. Records carry
//! device ids, counts and fingerprints; never key, share or plaintext bytes.
//! Logging is fire-and-forget: a sink that cannot write warns and carries on.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{error, warn};

/// Component name stamped on every vault record
pub const COMPONENT: &str = "ghost_vault";

pub mod events {
    pub const AUTHENTICATION_STARTED: &str = "authentication_started";
    pub const TONE_DETECTED: &str = "tone_detected";
    pub const AUTHENTICATION_COMPLETE: &str = "authentication_complete";
    pub const SHARE_LOADED: &str = "share_loaded";
    pub const ATTESTATION_FAILED: &str = "attestation_failed";
    pub const SHARE_REJECTED: &str = "share_rejected";
    pub const INSUFFICIENT_SHARES: &str = "insufficient_shares";
    pub const KEY_RECONSTRUCTED: &str = "key_reconstructed";
    pub const PAYLOAD_AUTHENTICATION_FAILED: &str = "payload_authentication_failed";
    pub const ASSEMBLY_COMPLETE: &str = "assembly_complete";
    pub const ASSEMBLY_FAILED: &str = "assembly_failed";
    pub const SECURE_WIPE_COMPLETE: &str = "secure_wipe_complete";
    pub const SECURE_WIPE_FAILED: &str = "secure_wipe_failed";
    pub const SPLIT_COMPLETE: &str = "split_complete";
    pub const TAMPER_ESCALATION: &str = "tamper_escalation";
}

/// One line of the audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// RFC 3339 UTC timestamp
    pub timestamp: String,
    pub component: String,
    pub event: String,
    pub data: Value,
}

impl AuditRecord {
    pub fn new(event: &str, data: &Value) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            component: COMPONENT.to_string(),
            event: event.to_string(),
            data: data.clone(),
        }
    }
}

/// Append-only destination for vault events
pub trait AuditSink: Send + Sync {
    /// Record an event; must not fail the caller
    fn log(&self, event: &str, data: &Value);

    /// Escalate a suspected clone or tamper
    fn report_tamper(&self, device_id: &str, reason: &str) {
        error!("Tamper escalation for {}: {}", device_id, reason);
        self.log(
            events::TAMPER_ESCALATION,
            &json!({
                "device_id": device_id,
                "reason": reason,
                "severity": "critical",
            }),
        );
    }
}

/// JSON-lines audit log appended to a file
pub struct NdjsonAuditLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl NdjsonAuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, record: &AuditRecord) -> std::io::Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())
    }
}

impl AuditSink for NdjsonAuditLog {
    fn log(&self, event: &str, data: &Value) {
        let record = AuditRecord::new(event, data);
        if let Err(e) = self.append(&record) {
            warn!("Failed to write audit event {} to {:?}: {}", event, self.path, e);
        }
    }
}

/// In-process audit trail
#[derive(Default)]
pub struct MemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything logged so far
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Event names in the order they were logged
    pub fn events(&self) -> Vec<String> {
        self.records().into_iter().map(|r| r.event).collect()
    }

    pub fn contains(&self, event: &str) -> bool {
        self.records().iter().any(|r| r.event == event)
    }
}

impl AuditSink for MemoryAuditLog {
    fn log(&self, event: &str, data: &Value) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(AuditRecord::new(event, data));
    }
}

/// Discards every record
pub struct NullAuditLog;

impl AuditSink for NullAuditLog {
    fn log(&self, _event: &str, _data: &Value) {}
}
