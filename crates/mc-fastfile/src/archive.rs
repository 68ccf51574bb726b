//! A single opened fast file.

use crate::codec::StreamCodec;
use crate::config::FastFileConfig;
use crate::error::{FastFileError, Result};
use crate::format::{crc32_checksum, FastFileHeader, FileEntry, HEADER_LEN, MIN_ENTRY_LEN};
use crate::hash::elf_hash;
use mc_heap::UserHeap;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use tracing::{debug, info, warn};

/// Archive-local handle of one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryHandle(pub(crate) usize);

impl EntryHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

/// An entry materialised into a user heap.
///
/// Give it back with [`HeapAsset::free`] on the heap it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapAsset {
    ptr: NonNull<u8>,
    len: usize,
}

impl HeapAsset {
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Borrow the asset bytes through the heap that owns them.
    pub fn bytes<'h>(&self, heap: &'h mut UserHeap) -> Option<&'h mut [u8]> {
        heap.block_mut(self.ptr)
    }

    pub fn free(self, heap: &mut UserHeap) {
        heap.free(self.ptr.as_ptr());
    }
}

fn corrupt(name: &str, reason: String) -> FastFileError {
    warn!(asset = name, %reason, "Corrupt fast file entry");
    FastFileError::CorruptEntry {
        name: name.to_string(),
        reason,
    }
}

/// Uncompressed size of `entry`, rejecting sizes over `limit`.
fn checked_size(entry: &FileEntry, limit: u64) -> Result<usize> {
    usize::try_from(entry.uncompressed_size)
        .ok()
        .filter(|_| entry.uncompressed_size <= limit)
        .ok_or_else(|| {
            corrupt(
                &entry.name,
                format!(
                    "declares {} bytes, limit is {limit}",
                    entry.uncompressed_size
                ),
            )
        })
}

/// One archive on disk with its index loaded.
///
/// The index never changes after [`open`](Self::open); reads only move the
/// file cursor.
#[derive(Debug)]
pub struct FastFile {
    path: PathBuf,
    file: Option<BufReader<File>>,
    entries: Vec<FileEntry>,
    by_hash: HashMap<u32, Vec<usize>>,
    codec: StreamCodec,
    verify_checksums: bool,
    max_entry_size: u64,
}

impl FastFile {
    /// Open and index the archive at `path`.
    pub fn open(path: impl AsRef<Path>, config: &FastFileConfig) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let header = FastFileHeader::read_from(&mut reader)?;

        let max_entries = file_len.saturating_sub(HEADER_LEN) / MIN_ENTRY_LEN;
        if u64::from(header.entry_count) > max_entries {
            return Err(FastFileError::InvalidFormat(format!(
                "{} entries cannot fit in {file_len} bytes",
                header.entry_count
            )));
        }

        let mut entries = Vec::with_capacity(header.entry_count as usize);
        let mut by_hash: HashMap<u32, Vec<usize>> = HashMap::new();

        for index in 0..header.entry_count as usize {
            let entry = FileEntry::read_from(&mut reader)?;

            let in_bounds = entry
                .offset
                .checked_add(entry.compressed_size)
                .is_some_and(|end| end <= file_len);
            if !in_bounds {
                return Err(FastFileError::InvalidFormat(format!(
                    "entry {} lies outside the archive",
                    entry.name
                )));
            }
            if !entry.compressed && entry.compressed_size != entry.uncompressed_size {
                return Err(FastFileError::InvalidFormat(format!(
                    "stored entry {} has mismatched sizes",
                    entry.name
                )));
            }

            by_hash.entry(entry.hash).or_default().push(index);
            entries.push(entry);
        }

        info!(
            "Opened fast file {}: {} entries",
            path.display(),
            entries.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            file: Some(reader),
            entries,
            by_hash,
            codec: StreamCodec::new(&config.codec),
            verify_checksums: config.verify_checksums,
            max_entry_size: config.max_entry_size,
        })
    }

    /// Look up `name` whose hash is `hash`. Hash equality alone never
    /// counts as a match.
    pub fn open_fast(&self, hash: u32, name: &str) -> Option<EntryHandle> {
        self.by_hash
            .get(&hash)?
            .iter()
            .copied()
            .find(|&index| self.entries[index].name == name)
            .map(EntryHandle)
    }

    /// Look up `name`, hashing it first.
    pub fn find(&self, name: &str) -> Option<EntryHandle> {
        self.open_fast(elf_hash(name.as_bytes()), name)
    }

    pub fn entry(&self, handle: EntryHandle) -> Option<&FileEntry> {
        self.entries.get(handle.0)
    }

    pub fn entries(&self) -> &[FileEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Uncompressed size of an entry.
    pub fn size_of(&self, handle: EntryHandle) -> Option<usize> {
        self.entry(handle).map(|e| e.uncompressed_size as usize)
    }

    /// Read an entry into `dest`, decompressing as needed. Returns the
    /// number of bytes written, always the entry's uncompressed size.
    pub fn read(&mut self, handle: EntryHandle, dest: &mut [u8]) -> Result<usize> {
        let entry = self
            .entries
            .get(handle.0)
            .ok_or(FastFileError::UnknownEntry(handle.0))?;
        let needed = checked_size(entry, self.max_entry_size)?;
        let reader = self.file.as_mut().ok_or(FastFileError::Closed)?;

        if dest.len() < needed {
            return Err(FastFileError::BufferTooSmall {
                needed,
                available: dest.len(),
            });
        }
        let dest = &mut dest[..needed];

        reader.seek(SeekFrom::Start(entry.offset))?;

        if entry.compressed {
            let mut packed = vec![0u8; entry.compressed_size as usize];
            reader.read_exact(&mut packed)?;
            let written = self
                .codec
                .decompress(dest, &packed)
                .map_err(|e| corrupt(&entry.name, e.to_string()))?;
            if written != needed {
                return Err(corrupt(
                    &entry.name,
                    format!("decoded {written} bytes, expected {needed}"),
                ));
            }
        } else {
            reader.read_exact(dest)?;
        }

        if self.verify_checksums && crc32_checksum(dest) != entry.crc32 {
            return Err(corrupt(&entry.name, "checksum mismatch".into()));
        }

        Ok(needed)
    }

    /// Read an entry into a new buffer.
    pub fn load(&mut self, handle: EntryHandle) -> Result<Vec<u8>> {
        let entry = self
            .entry(handle)
            .ok_or(FastFileError::UnknownEntry(handle.0))?;
        let size = checked_size(entry, self.max_entry_size)?;

        let mut data = Vec::new();
        data.try_reserve_exact(size)
            .map_err(|e| corrupt(&entry.name, format!("cannot buffer {size} bytes: {e}")))?;
        data.resize(size, 0);
        self.read(handle, &mut data)?;
        Ok(data)
    }

    /// Read an entry into memory allocated from `heap`. The allocation is
    /// released again if the read fails.
    pub fn load_into_heap(&mut self, handle: EntryHandle, heap: &mut UserHeap) -> Result<HeapAsset> {
        let entry = self
            .entry(handle)
            .ok_or(FastFileError::UnknownEntry(handle.0))?;
        let size = checked_size(entry, self.max_entry_size)?;

        let ptr = heap.malloc(size).ok_or_else(|| FastFileError::HeapExhausted {
            name: entry.name.clone(),
            size,
        })?;

        let result = match heap.block_mut(ptr) {
            Some(block) => self.read(handle, block),
            None => Err(FastFileError::HeapExhausted {
                name: self.entries[handle.0].name.clone(),
                size,
            }),
        };

        match result {
            Ok(len) => Ok(HeapAsset { ptr, len }),
            Err(e) => {
                heap.free(ptr.as_ptr());
                Err(e)
            }
        }
    }

    /// Release the file handle. The index stays readable.
    pub fn close(&mut self) {
        if self.file.take().is_some() {
            debug!("Closed fast file {}", self.path.display());
        }
    }
}
