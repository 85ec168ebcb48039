use std::fmt;

use mcbridge_protocol::TransferMode;
use mcbridge_transfer::ProgressState;
use serde::{Deserialize, Serialize};

/// Lifecycle of one transfer session.
///
/// `Idle -> Provisioning -> Running -> {Completed | Failed | Cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Idle,
    Provisioning,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Provisioning => "provisioning",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// What a per-object copy failure does to the rest of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailurePolicy {
    /// Record the failure and keep consuming descriptors.
    Continue,
    /// Stop consuming and finish the session as failed.
    Finish,
}

/// Failure policy per transfer direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailurePolicies {
    pub upload: FailurePolicy,
    pub download: FailurePolicy,
}

impl Default for FailurePolicies {
    fn default() -> Self {
        Self {
            upload: FailurePolicy::Continue,
            download: FailurePolicy::Finish,
        }
    }
}

impl FailurePolicies {
    pub fn for_mode(&self, mode: TransferMode) -> FailurePolicy {
        match mode {
            TransferMode::Put => self.upload,
            TransferMode::Get => self.download,
        }
    }
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub id: String,
    pub mode: TransferMode,
    pub state: SessionState,
    pub progress: ProgressState,
    pub failed_objects: u64,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!SessionState::Running.is_terminal());
        assert!(SessionState::Completed.is_terminal());
        assert!(SessionState::Failed.is_terminal());
        assert!(SessionState::Cancelled.is_terminal());
    }

    #[test]
    fn default_policies_keep_asymmetry() {
        let p = FailurePolicies::default();
        assert_eq!(p.for_mode(TransferMode::Put), FailurePolicy::Continue);
        assert_eq!(p.for_mode(TransferMode::Get), FailurePolicy::Finish);
    }

    #[test]
    fn policy_serde_names() {
        let json = serde_json::to_string(&FailurePolicies::default()).unwrap();
        assert_eq!(json, r#"{"upload":"continue","download":"finish"}"#);
    }
}
