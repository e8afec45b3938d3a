//! Storage policy for data file content
//!
//! Decides, once per content, whether bytes stay in process memory or are
//! spilled to a temporary file, and routes every spill through a
//! [`WriteGate`].

mod content;
mod spill;

pub use content::{ContentReader, ContentSource, DataFileContent};

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use asic_write_policy::WriteGate;
use serde::{Deserialize, Serialize};

/// Default in-memory threshold in megabytes.
pub const DEFAULT_MAX_IN_MEMORY_MB: u64 = 4;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Largest content size, in bytes, that may be held in memory.
///
/// Zero means nothing is cached in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageThreshold {
    max_in_memory_bytes: u64,
}

impl StorageThreshold {
    pub const fn from_bytes(max_in_memory_bytes: u64) -> Self {
        Self { max_in_memory_bytes }
    }

    pub const fn from_megabytes(mb: u64) -> Self {
        Self::from_bytes(mb.saturating_mul(BYTES_PER_MB))
    }

    pub const fn max_in_memory_bytes(&self) -> u64 {
        self.max_in_memory_bytes
    }

    /// True when every content must spill regardless of size.
    pub const fn spills_everything(&self) -> bool {
        self.max_in_memory_bytes == 0
    }
}

impl Default for StorageThreshold {
    fn default() -> Self {
        Self::from_megabytes(DEFAULT_MAX_IN_MEMORY_MB)
    }
}

impl fmt::Display for StorageThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bytes", self.max_in_memory_bytes)
    }
}

/// Where a content's bytes live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    Memory,
    Disk,
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placement::Memory => write!(f, "memory"),
            Placement::Disk => write!(f, "disk"),
        }
    }
}

/// The storage decision.
///
/// `size <= threshold` stays in memory; anything larger, a zero threshold, or
/// an explicit `force_disk` spills.
pub fn select_placement(size: u64, threshold: StorageThreshold, force_disk: bool) -> Placement {
    if force_disk || threshold.spills_everything() || size > threshold.max_in_memory_bytes() {
        Placement::Disk
    } else {
        Placement::Memory
    }
}

/// Everything the storage engine needs to ingest content: the threshold, the
/// spill directory and the gate every disk write must pass.
#[derive(Debug, Clone)]
pub struct StoragePolicy {
    threshold: StorageThreshold,
    spill_dir: PathBuf,
    gate: Arc<WriteGate>,
}

impl StoragePolicy {
    pub fn new(threshold: StorageThreshold, spill_dir: impl Into<PathBuf>, gate: Arc<WriteGate>) -> Self {
        Self {
            threshold,
            spill_dir: spill_dir.into(),
            gate,
        }
    }

    pub fn threshold(&self) -> StorageThreshold {
        self.threshold
    }

    pub fn spill_dir(&self) -> &Path {
        &self.spill_dir
    }

    pub fn gate(&self) -> &Arc<WriteGate> {
        &self.gate
    }

    pub fn with_threshold(mut self, threshold: StorageThreshold) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn placement_for(&self, size: u64, force_disk: bool) -> Placement {
        select_placement(size, self.threshold, force_disk)
    }
}

impl Default for StoragePolicy {
    fn default() -> Self {
        Self::new(
            StorageThreshold::default(),
            std::env::temp_dir(),
            Arc::new(WriteGate::allow_all()),
        )
    }
}
