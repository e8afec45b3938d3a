//! Typed configuration snapshot.

use std::path::PathBuf;
use std::sync::Arc;

use asic_write_policy::{WriteGate, WritePolicy};
use serde::{Deserialize, Serialize};

use crate::storage::{StoragePolicy, StorageThreshold, DEFAULT_MAX_IN_MEMORY_MB};

/// Storage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Largest data file kept in memory, in megabytes.
    #[serde(default = "default_max_in_memory_mb")]
    pub max_in_memory_mb: u64,

    /// Exact byte threshold; wins over `max_in_memory_mb` when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_in_memory_bytes: Option<u64>,

    /// Directory for spill files. Defaults to the system temp directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,
}

fn default_max_in_memory_mb() -> u64 {
    DEFAULT_MAX_IN_MEMORY_MB
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_in_memory_mb: DEFAULT_MAX_IN_MEMORY_MB,
            max_in_memory_bytes: None,
            temp_dir: None,
        }
    }
}

/// Configuration snapshot used by builders and containers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub write_policy: WritePolicy,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the in-memory threshold in megabytes, clearing any byte override.
    pub fn with_max_in_memory_mb(mut self, mb: u64) -> Self {
        self.storage.max_in_memory_mb = mb;
        self.storage.max_in_memory_bytes = None;
        self
    }

    pub fn with_max_in_memory_bytes(mut self, bytes: u64) -> Self {
        self.storage.max_in_memory_bytes = Some(bytes);
        self
    }

    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage.temp_dir = Some(dir.into());
        self
    }

    pub fn with_write_policy(mut self, policy: WritePolicy) -> Self {
        self.write_policy = policy;
        self
    }

    pub fn storage_threshold(&self) -> StorageThreshold {
        match self.storage.max_in_memory_bytes {
            Some(bytes) => StorageThreshold::from_bytes(bytes),
            None => StorageThreshold::from_megabytes(self.storage.max_in_memory_mb),
        }
    }

    pub fn spill_dir(&self) -> PathBuf {
        self.storage
            .temp_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Fresh gate enforcing the configured write policy.
    pub fn write_gate(&self) -> Arc<WriteGate> {
        Arc::new(WriteGate::new(self.write_policy.clone()))
    }

    /// Storage policy with a fresh gate for the configured write policy.
    pub fn storage_policy(&self) -> StoragePolicy {
        self.storage_policy_with_gate(self.write_gate())
    }

    /// Storage policy that routes writes through an existing gate.
    pub fn storage_policy_with_gate(&self, gate: Arc<WriteGate>) -> StoragePolicy {
        StoragePolicy::new(self.storage_threshold(), self.spill_dir(), gate)
    }
}
