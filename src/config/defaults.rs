//! Built-in defaults (layer 1)

use asic_write_policy::WritePolicy;
use serde::{Deserialize, Serialize};

use crate::storage::DEFAULT_MAX_IN_MEMORY_MB;

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Largest data file kept in memory, in megabytes (default: 4)
    pub max_in_memory_mb: u64,

    /// Write policy applied to spill files (default: allow_all)
    pub write_policy: WritePolicy,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            max_in_memory_mb: DEFAULT_MAX_IN_MEMORY_MB,
            write_policy: WritePolicy::AllowAll,
        }
    }
}

impl BuiltinDefaults {
    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "storage": {
                "max_in_memory_mb": self.max_in_memory_mb
            },
            "write_policy": self.write_policy
        })
    }
}
