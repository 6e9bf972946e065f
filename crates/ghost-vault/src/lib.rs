//! Ghost Vault - Presence-gated threshold vault
//!
//! This crate provides:
//! - Acoustic presence detection with manual fallback
//! - Share device layout, manifest attestation and collection
//! - The split and assemble workflows of the 2-of-3 vault
//! - Ephemeral plaintext storage with secure wipe on teardown
//! - Append-only audit sinks

pub mod audit;
pub mod config;
pub mod devices;
pub mod error;
pub mod keys;
pub mod presence;
pub mod session;
pub mod state;
pub mod vault;
pub mod wipe;

pub use audit::{AuditRecord, AuditSink, MemoryAuditLog, NdjsonAuditLog, NullAuditLog};
pub use config::{PresenceConfig, VaultConfig};
pub use error::{FailureKind, Result, VaultError};
pub use keys::{load_root_key, write_root_key};
pub use presence::{PresenceBackend, PresenceDetector, PresenceEvent};
pub use session::{EphemeralPlaintext, VaultSession};
pub use state::{StateMachine, VaultState};
pub use vault::{SplitReport, Vault, PAYLOAD_AAD};
pub use wipe::secure_wipe;
