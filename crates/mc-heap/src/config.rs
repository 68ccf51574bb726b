//! Heap subsystem configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

/// Configuration shared by the heap registry and every user heap created
/// against it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeapConfig {
    /// Maximum number of heaps tracked by a `HeapList` (None = unbounded).
    /// Heaps committed past the limit still work but are not reported.
    pub max_heaps: Option<usize>,

    /// Number of records kept by a user heap's malloc log.
    pub malloc_log_capacity: usize,

    /// Alignment of every user heap allocation. Must be a power of two.
    pub alignment: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            max_heaps: None,
            malloc_log_capacity: 4096,
            alignment: 16,
        }
    }
}

impl HeapConfig {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> io::Result<Self> {
        let data = fs::read(path)?;
        serde_json::from_slice(&data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Alignment actually applied, rounded up to a power of two.
    pub(crate) fn effective_alignment(&self) -> usize {
        self.alignment.max(1).next_power_of_two()
    }
}
