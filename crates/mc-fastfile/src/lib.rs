//! MC2 Fast Files
//!
//! Read-only asset archives indexed by name hash, a registry that searches
//! them in registration order, and the chunked streaming codec used for
//! compressed entries.

mod archive;
mod codec;
mod config;
mod error;
mod format;
mod hash;
mod registry;
mod writer;

pub use archive::{EntryHandle, FastFile, HeapAsset};
pub use codec::{compress, compress_bound, decompress, StreamCodec};
pub use config::{
    CodecConfig, FastFileConfig, DEFAULT_CHUNK_SIZE, DEFAULT_COMPRESSION_LEVEL, DEFAULT_MAX_ENTRY_SIZE,
};
pub use error::{CodecError, FastFileError, FastFileErrorKind, Result};
pub use format::{crc32_checksum, FileEntry, FASTFILE_VERSION, HEADER_LEN, MAGIC_BYTES, MIN_ENTRY_LEN};
pub use hash::elf_hash;
pub use registry::{ArchiveId, FastFileHit, FastFileRegistry};
pub use writer::{ArchiveSummary, FastFileWriter};
