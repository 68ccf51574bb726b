//! Fast-file and codec errors.

use std::io;
use thiserror::Error;

/// Failures of the streaming codec. Output written before the failure is
/// not usable.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("codec initialisation failed: {0}")]
    Init(#[source] io::Error),

    #[error("codec stream error: {0}")]
    Stream(#[source] io::Error),

    #[error("output buffer too small, needed at least {needed_at_least} bytes")]
    OutputTooSmall { needed_at_least: usize },

    #[error("compressed stream ended before the frame was complete")]
    Truncated,
}

/// Errors from opening, indexing, reading and writing fast files.
///
/// A lookup miss is not an error; lookups return `Option`.
#[derive(Debug, Error)]
pub enum FastFileError {
    #[error("fast file registry is full ({max} archives)")]
    RegistryFull { max: usize },

    #[error("incompatible fast file version: expected {expected:#x}, got {found:#x}")]
    WrongVersion { expected: u32, found: u32 },

    #[error("invalid fast file: {0}")]
    InvalidFormat(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("corrupt entry {name}: {reason}")]
    CorruptEntry { name: String, reason: String },

    #[error("heap cannot hold {size} bytes for {name}")]
    HeapExhausted { name: String, size: usize },

    #[error("destination holds {available} bytes, entry needs {needed}")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("fast file is closed")]
    Closed,

    #[error("no archive with id {0}")]
    UnknownArchive(usize),

    #[error("no entry with handle {0}")]
    UnknownEntry(usize),
}

/// Copyable error category, kept by the registry as its last error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastFileErrorKind {
    RegistryFull,
    WrongVersion,
    InvalidFormat,
    Io,
    Codec,
    CorruptEntry,
    HeapExhausted,
    BufferTooSmall,
    Closed,
    UnknownArchive,
    UnknownEntry,
}

impl FastFileError {
    pub fn kind(&self) -> FastFileErrorKind {
        match self {
            Self::RegistryFull { .. } => FastFileErrorKind::RegistryFull,
            Self::WrongVersion { .. } => FastFileErrorKind::WrongVersion,
            Self::InvalidFormat(_) => FastFileErrorKind::InvalidFormat,
            Self::Io(_) => FastFileErrorKind::Io,
            Self::Codec(_) => FastFileErrorKind::Codec,
            Self::CorruptEntry { .. } => FastFileErrorKind::CorruptEntry,
            Self::HeapExhausted { .. } => FastFileErrorKind::HeapExhausted,
            Self::BufferTooSmall { .. } => FastFileErrorKind::BufferTooSmall,
            Self::Closed => FastFileErrorKind::Closed,
            Self::UnknownArchive(_) => FastFileErrorKind::UnknownArchive,
            Self::UnknownEntry(_) => FastFileErrorKind::UnknownEntry,
        }
    }
}

pub type Result<T> = std::result::Result<T, FastFileError>;
