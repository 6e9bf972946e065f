//! Error types for the Ghost vault

use thiserror::Error;

use crate::state::VaultState;

/// Result type alias for vault operations
pub type Result<T> = std::result::Result<T, VaultError>;

/// Coarse failure classes recorded by the vault state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    AuthenticationTimeout,
    InsufficientShares,
    AttestationFailure,
    ReconstructionError,
    DeviceIoError,
    Configuration,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::AuthenticationTimeout => "authentication_timeout",
            FailureKind::InsufficientShares => "insufficient_shares",
            FailureKind::AttestationFailure => "attestation_failure",
            FailureKind::ReconstructionError => "reconstruction_error",
            FailureKind::DeviceIoError => "device_io_error",
            FailureKind::Configuration => "configuration",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur in the vault
#[derive(Debug, Error)]
pub enum VaultError {
    /// No presence signal within the timeout
    #[error("Presence authentication timed out")]
    AuthenticationTimeout,

    /// Fewer valid shares than the threshold
    #[error("Insufficient shares: found {found}, need {required}")]
    InsufficientShares { found: usize, required: usize },

    /// Every device present failed attestation
    #[error("Attestation failed for device {0}")]
    AttestationFailure(String),

    /// Shares could not be combined into a usable key
    #[error("Key reconstruction failed: {0}")]
    ReconstructionError(String),

    /// The payload did not authenticate under the reconstructed key
    #[error("Payload authentication tag mismatch")]
    AuthenticationTagMismatch,

    /// Device-level I/O failure
    #[error("Device I/O error: {0}")]
    DeviceIo(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest present but unusable
    #[error("Invalid manifest on {device_id}: {reason}")]
    InvalidManifest { device_id: String, reason: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// State machine misuse
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: VaultState, to: VaultState },
}

impl VaultError {
    /// Map to the failure class recorded by the state machine
    pub fn kind(&self) -> FailureKind {
        match self {
            VaultError::AuthenticationTimeout => FailureKind::AuthenticationTimeout,
            VaultError::InsufficientShares { .. } => FailureKind::InsufficientShares,
            VaultError::AttestationFailure(_) => FailureKind::AttestationFailure,
            VaultError::ReconstructionError(_)
            | VaultError::AuthenticationTagMismatch
            | VaultError::InvalidTransition { .. } => FailureKind::ReconstructionError,
            VaultError::DeviceIo(_)
            | VaultError::Io(_)
            | VaultError::InvalidManifest { .. }
            | VaultError::Serialization(_) => FailureKind::DeviceIoError,
            VaultError::Config(_) => FailureKind::Configuration,
        }
    }
}

impl From<ghost_core::Error> for VaultError {
    fn from(e: ghost_core::Error) -> Self {
        use ghost_core::Error as CoreError;

        match e {
            CoreError::AuthenticationTagMismatch => VaultError::AuthenticationTagMismatch,
            CoreError::InsufficientShares { required, provided } => VaultError::InsufficientShares {
                found: provided,
                required,
            },
            CoreError::MalformedPayload(reason) => VaultError::DeviceIo(reason),
            CoreError::Serialization(reason) => VaultError::Serialization(reason),
            CoreError::InvalidManifest(reason) => VaultError::InvalidManifest {
                device_id: "unknown".to_string(),
                reason,
            },
            other => VaultError::ReconstructionError(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(e: serde_json::Error) -> Self {
        VaultError::Serialization(e.to_string())
    }
}
