//! Write policy types.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which disk writes the storage layer may perform.
///
/// The policy is plain data: it can be loaded from configuration and is
/// turned into an enforcing [`crate::WriteGate`] by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum WritePolicy {
    /// Every write is permitted.
    #[default]
    AllowAll,

    /// Writes are permitted only below one of the listed directories.
    AllowList {
        /// Directories (and their descendants) that may be written to.
        #[serde(default)]
        dirs: Vec<PathBuf>,
    },

    /// No write is permitted.
    DenyAll,
}

impl WritePolicy {
    /// Allow-list policy over the given directories.
    pub fn allow_list<I, P>(dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        WritePolicy::AllowList {
            dirs: dirs.into_iter().map(Into::into).collect(),
        }
    }

    /// Short stable name used in logs and error messages.
    pub fn mode_name(&self) -> &'static str {
        match self {
            WritePolicy::AllowAll => "allow_all",
            WritePolicy::AllowList { .. } => "allow_list",
            WritePolicy::DenyAll => "deny_all",
        }
    }
}
