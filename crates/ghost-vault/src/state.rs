//! Vault lifecycle state machine
//!
//! ```text
//! Idle -> Authenticating -> Collecting -> Reconstructing -> Decrypting -> Loaded
//! any of Idle..=Decrypting -> Failed(kind)
//! Loaded | Failed(kind) -> Wiped
//! ```

use serde::Serialize;

use crate::error::{FailureKind, Result, VaultError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VaultState {
    Idle,
    Authenticating,
    Collecting,
    Reconstructing,
    Decrypting,
    Loaded,
    Failed(FailureKind),
    Wiped,
}

impl VaultState {
    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: &VaultState) -> bool {
        use VaultState::*;

        match (self, next) {
            (Idle, Authenticating)
            | (Authenticating, Collecting)
            | (Collecting, Reconstructing)
            | (Reconstructing, Decrypting)
            | (Decrypting, Loaded) => true,
            (Idle | Authenticating | Collecting | Reconstructing | Decrypting, Failed(_)) => true,
            (Loaded | Failed(_), Wiped) => true,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, VaultState::Wiped)
    }

    pub fn name(&self) -> &'static str {
        match self {
            VaultState::Idle => "idle",
            VaultState::Authenticating => "authenticating",
            VaultState::Collecting => "collecting",
            VaultState::Reconstructing => "reconstructing",
            VaultState::Decrypting => "decrypting",
            VaultState::Loaded => "loaded",
            VaultState::Failed(_) => "failed",
            VaultState::Wiped => "wiped",
        }
    }
}

impl std::fmt::Display for VaultState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VaultState::Failed(kind) => write!(f, "failed({})", kind),
            other => f.write_str(other.name()),
        }
    }
}

impl Serialize for VaultState {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Tracks the current state and every state visited
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: VaultState,
    history: Vec<VaultState>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: VaultState::Idle,
            history: vec![VaultState::Idle],
        }
    }

    pub fn state(&self) -> VaultState {
        self.state
    }

    pub fn history(&self) -> &[VaultState] {
        &self.history
    }

    /// Move to `next`, rejecting illegal transitions
    pub fn advance(&mut self, next: VaultState) -> Result<()> {
        if !self.state.can_transition_to(&next) {
            return Err(VaultError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!("Vault state {} -> {}", self.state, next);
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    /// Record a failure of the given kind
    ///
    /// Failing from a state that cannot fail (already failed, loaded or
    /// wiped) leaves the machine untouched.
    pub fn fail(&mut self, kind: FailureKind) {
        let _ = self.advance(VaultState::Failed(kind));
    }
}
