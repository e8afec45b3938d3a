//! Layered configuration
//!
//! Configuration is merged from up to four layers, lowest precedence first:
//! 1. Built-in defaults
//! 2. Host/user config (~/.config/asic/config.toml)
//! 3. Explicit config file (--config)
//! 4. CLI overrides

mod configuration;
mod defaults;
mod effective;
mod merge;

pub use configuration::{Configuration, StorageConfig};
pub use defaults::BuiltinDefaults;
pub use effective::{host_config_path, ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig};
pub use merge::{deep_merge, merge_layers};
