//! Write decision records.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Machine-readable reason a write was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail")]
pub enum DenialReason {
    /// The policy forbids every write.
    #[serde(rename = "DENY_ALL")]
    DenyAll,

    /// The target is outside every allow-listed directory.
    #[serde(rename = "OUTSIDE_ALLOW_LIST")]
    OutsideAllowList(PathBuf),
}

impl DenialReason {
    /// Get a machine-readable string representation.
    pub fn to_code(&self) -> String {
        match self {
            DenialReason::DenyAll => "DENY_ALL".to_string(),
            DenialReason::OutsideAllowList(p) => format!("OUTSIDE_ALLOW_LIST:{}", p.display()),
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenialReason::DenyAll => write!(f, "all disk writes are forbidden"),
            DenialReason::OutsideAllowList(p) => {
                write!(f, "{} is outside the allow-listed directories", p.display())
            }
        }
    }
}

/// Outcome of a single gate check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteDecision {
    Allowed,
    Denied(DenialReason),
}

impl WriteDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, WriteDecision::Allowed)
    }
}

/// One recorded write attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteAttempt {
    /// Resolved target path.
    pub path: PathBuf,

    /// What the gate decided.
    pub decision: WriteDecision,
}
