//! Fast-file and codec configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

/// Chunk size used for streaming (16 KiB). 128K and more could be faster.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// Compression level for Zstd (1-22, higher = better compression, slower)
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Largest uncompressed entry an archive may declare (1 GiB).
pub const DEFAULT_MAX_ENTRY_SIZE: u64 = 1 << 30;

/// Streaming codec tuning. Neither value affects what decompresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Size of the input and output staging buffers.
    pub chunk_size: usize,
    /// Compression level
    pub level: i32,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

/// Configuration for the fast-file registry and the archives it opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FastFileConfig {
    /// Maximum number of open archives (None = unbounded)
    pub max_fast_files: Option<usize>,
    /// Check entry checksums on every read
    pub verify_checksums: bool,
    /// Entries declaring more uncompressed bytes than this are corrupt
    pub max_entry_size: u64,
    /// Codec used to read and write entries
    pub codec: CodecConfig,
}

impl Default for FastFileConfig {
    fn default() -> Self {
        Self {
            max_fast_files: None,
            verify_checksums: true,
            max_entry_size: DEFAULT_MAX_ENTRY_SIZE,
            codec: CodecConfig::default(),
        }
    }
}

impl FastFileConfig {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> io::Result<Self> {
        let data = fs::read(path)?;
        serde_json::from_slice(&data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}
