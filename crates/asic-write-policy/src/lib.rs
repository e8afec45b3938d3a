//! Write gate for container storage.
//!
//! Every disk write the storage layer performs is routed through a
//! [`WriteGate`]. The gate enforces a [`WritePolicy`] and keeps an audit log of
//! each attempt, so callers can both forbid writes and observe that none were
//! tried.

mod decision;
mod policy;

pub use decision::{DenialReason, WriteAttempt, WriteDecision};
pub use policy::WritePolicy;

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

/// Errors from gated write operations.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("write to {path} refused by {policy} policy: {reason}")]
    Denied {
        path: PathBuf,
        policy: &'static str,
        reason: DenialReason,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Enforces a [`WritePolicy`] and records every attempt.
#[derive(Debug)]
pub struct WriteGate {
    policy: WritePolicy,
    /// Allow-listed roots, resolved once at construction.
    allowed_roots: Vec<PathBuf>,
    attempts: Mutex<Vec<WriteAttempt>>,
}

impl WriteGate {
    pub fn new(policy: WritePolicy) -> Self {
        let allowed_roots = match &policy {
            WritePolicy::AllowList { dirs } => dirs.iter().map(|d| resolve_dir(d)).collect(),
            _ => Vec::new(),
        };
        Self {
            policy,
            allowed_roots,
            attempts: Mutex::new(Vec::new()),
        }
    }

    pub fn allow_all() -> Self {
        Self::new(WritePolicy::AllowAll)
    }

    pub fn deny_all() -> Self {
        Self::new(WritePolicy::DenyAll)
    }

    pub fn policy(&self) -> &WritePolicy {
        &self.policy
    }

    /// Decide whether `path` may be written, recording the attempt.
    pub fn check(&self, path: &Path) -> Result<PathBuf, WriteError> {
        let target = resolve_target(path);
        let decision = self.decide(&target);
        self.record(WriteAttempt {
            path: target.clone(),
            decision: decision.clone(),
        });

        match decision {
            WriteDecision::Allowed => Ok(target),
            WriteDecision::Denied(reason) => {
                tracing::debug!(
                    path = %target.display(),
                    policy = self.policy.mode_name(),
                    reason = %reason,
                    "disk write refused"
                );
                Err(WriteError::Denied {
                    path: target,
                    policy: self.policy.mode_name(),
                    reason,
                })
            }
        }
    }

    /// Create a new file at `path`. Fails if the file already exists.
    pub fn create_new(&self, path: &Path) -> Result<File, WriteError> {
        self.check(path)?;
        let file = OpenOptions::new().write(true).create_new(true).open(path)?;
        Ok(file)
    }

    /// Create or truncate the file at `path`.
    pub fn create(&self, path: &Path) -> Result<File, WriteError> {
        self.check(path)?;
        Ok(File::create(path)?)
    }

    /// Create `dir` and its missing parents. A directory that already exists
    /// is not a write and is not recorded.
    pub fn create_dir_all(&self, dir: &Path) -> Result<(), WriteError> {
        if dir.is_dir() {
            return Ok(());
        }
        self.check(dir)?;
        std::fs::create_dir_all(dir)?;
        Ok(())
    }

    /// Snapshot of every attempt seen so far.
    pub fn attempts(&self) -> Vec<WriteAttempt> {
        self.attempts
            .lock()
            .map(|a| a.clone())
            .unwrap_or_default()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().map(|a| a.len()).unwrap_or(0)
    }

    pub fn denied_count(&self) -> usize {
        self.attempts
            .lock()
            .map(|a| a.iter().filter(|x| !x.decision.is_allowed()).count())
            .unwrap_or(0)
    }

    fn decide(&self, target: &Path) -> WriteDecision {
        match &self.policy {
            WritePolicy::AllowAll => WriteDecision::Allowed,
            WritePolicy::DenyAll => WriteDecision::Denied(DenialReason::DenyAll),
            WritePolicy::AllowList { .. } => {
                if self.allowed_roots.iter().any(|root| target.starts_with(root)) {
                    WriteDecision::Allowed
                } else {
                    WriteDecision::Denied(DenialReason::OutsideAllowList(target.to_path_buf()))
                }
            }
        }
    }

    fn record(&self, attempt: WriteAttempt) {
        if let Ok(mut attempts) = self.attempts.lock() {
            attempts.push(attempt);
        }
    }
}

impl Default for WriteGate {
    fn default() -> Self {
        Self::allow_all()
    }
}

/// Absolute, canonical form of a directory; falls back to the lexical form
/// when the directory does not exist yet.
fn resolve_dir(dir: &Path) -> PathBuf {
    dir.canonicalize().unwrap_or_else(|_| lexical_absolute(dir))
}

/// Resolve a (possibly not yet existing) file path by canonicalizing its
/// parent directory.
fn resolve_target(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => {
            resolve_dir(parent).join(name)
        }
        (_, Some(name)) => resolve_dir(Path::new(".")).join(name),
        _ => lexical_absolute(path),
    }
}

fn lexical_absolute(path: &Path) -> PathBuf {
    let base = if path.is_absolute() {
        PathBuf::new()
    } else {
        std::env::current_dir().unwrap_or_default()
    };
    let mut out = base;
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}
