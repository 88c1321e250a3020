//! Runtime configuration types.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Output format for reports printed by the front end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Human,
    Json,
}

/// Runtime configuration for the VM.
///
/// Every field has a default, so a config file only needs the keys it
/// changes:
///
/// ```toml
/// stress_gc = true
/// gc_min_threshold = 4096
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Whether GC is enabled (default: true)
    pub gc_enabled: bool,
    /// Collect before every allocation
    pub stress_gc: bool,
    /// Print GC statistics when the run ends
    pub gc_stats: bool,
    /// Next threshold = live bytes after a cycle * this factor
    pub gc_grow_factor: usize,
    /// Threshold floor in bytes
    pub gc_min_threshold: usize,
    /// Hard limit on heap size in bytes (None = unlimited)
    pub heap_limit: Option<usize>,
    /// Maximum operand stack depth
    pub stack_max: usize,
    /// Maximum call depth
    pub frames_max: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            gc_enabled: true,
            stress_gc: false,
            gc_stats: false,
            gc_grow_factor: 2,
            gc_min_threshold: 1024 * 1024,
            heap_limit: None,
            stack_max: 64 * 256,
            frames_max: 64,
        }
    }
}

impl RuntimeConfig {
    /// Load a configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}
