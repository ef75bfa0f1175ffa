//! Observable agent state.

use crate::error::ReplicationError;
use std::fmt;
use std::time::Instant;

/// The current state of a replication agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentState {
    /// Waiting for the next cycle.
    Idle,
    /// Opening a connection to the master.
    Connecting,
    /// Confirming the slave's last page with the master.
    Checking,
    /// Pulling and applying missing pages.
    Syncing,
    /// Stopped on an unrecoverable condition.
    Faulted(Fault),
    /// Stopped normally.
    Stopped,
}

impl AgentState {
    /// Returns true if a cycle is in progress.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            AgentState::Connecting | AgentState::Checking | AgentState::Syncing
        )
    }

    /// Returns true if the agent will not run again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentState::Faulted(_) | AgentState::Stopped)
    }
}

/// Kind of unrecoverable replication failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// The slave log diverged from the master.
    WrongPageId,
    /// A replicated transaction failed verification.
    TransactionCorrupted,
    /// Master and slave use different page sizes.
    PageSizeMismatch,
    /// The log transfer was misused.
    InvalidWrite,
    /// The agent cannot run with its configuration.
    InvalidConfig,
}

/// An unrecoverable replication failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    /// What went wrong.
    pub kind: FaultKind,
    /// Description of the failure.
    pub message: String,
}

impl Fault {
    /// Classifies a fatal error. Returns `None` for errors that are not fatal.
    pub fn from_error(error: &ReplicationError) -> Option<Self> {
        if !error.is_fatal() {
            return None;
        }
        let kind = match error {
            ReplicationError::WrongPageId(_) => FaultKind::WrongPageId,
            ReplicationError::PageSizeMismatch { .. } => FaultKind::PageSizeMismatch,
            ReplicationError::InvalidWrite { .. } => FaultKind::InvalidWrite,
            ReplicationError::InvalidConfig(_) => FaultKind::InvalidConfig,
            _ => FaultKind::TransactionCorrupted,
        };
        Some(Self {
            kind,
            message: error.to_string(),
        })
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Statistics about replication.
#[derive(Debug, Clone, Default)]
pub struct AgentStats {
    /// Completed cycles.
    pub cycles: u64,
    /// Log pages applied locally.
    pub pages_applied: u64,
    /// Local transactions committed.
    pub transactions_committed: u64,
    /// Cycles that failed with a retryable error.
    pub transient_errors: u64,
    /// Connections opened after the first.
    pub reconnects: u64,
    /// Time of the last successful cycle.
    pub last_sync: Option<Instant>,
    /// Last retryable error.
    pub last_error: Option<String>,
}
