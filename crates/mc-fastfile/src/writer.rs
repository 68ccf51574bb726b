//! Building fast files.

use crate::codec::StreamCodec;
use crate::config::FastFileConfig;
use crate::error::{FastFileError, Result};
use crate::format::{crc32_checksum, FastFileHeader, FileEntry, FASTFILE_VERSION, HEADER_LEN};
use crate::hash::elf_hash;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// What [`FastFileWriter::finish`] produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub entries: usize,
    pub uncompressed_bytes: u64,
    pub stored_bytes: u64,
    pub archive_bytes: u64,
}

impl ArchiveSummary {
    /// Stored payload as a percentage of the original size.
    pub fn ratio(&self) -> f64 {
        if self.uncompressed_bytes == 0 {
            return 100.0;
        }
        self.stored_bytes as f64 / self.uncompressed_bytes as f64 * 100.0
    }
}

struct PendingEntry {
    entry: FileEntry,
    payload: Vec<u8>,
}

/// Collects entries in memory and writes the archive in one go.
pub struct FastFileWriter {
    path: PathBuf,
    codec: StreamCodec,
    pending: Vec<PendingEntry>,
    names: HashSet<String>,
}

impl FastFileWriter {
    pub fn new(path: impl AsRef<Path>, config: &FastFileConfig) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            codec: StreamCodec::new(&config.codec),
            pending: Vec::new(),
            names: HashSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Queue `data` under `name`. With `compress` set the entry is stored
    /// compressed unless that would not make it smaller.
    pub fn add(&mut self, name: &str, data: &[u8], compress: bool) -> Result<()> {
        if name.is_empty() || name.len() > usize::from(u16::MAX) {
            return Err(FastFileError::InvalidFormat(format!(
                "entry name length {} is not storable",
                name.len()
            )));
        }
        if self.names.contains(name) {
            return Err(FastFileError::InvalidFormat(format!(
                "duplicate entry {name}"
            )));
        }

        let packed = if compress {
            let packed = self.codec.compress_to_vec(data)?;
            (packed.len() < data.len()).then_some(packed)
        } else {
            None
        };

        let (payload, compressed) = match packed {
            Some(packed) => (packed, true),
            None => (data.to_vec(), false),
        };

        debug!(
            entry = name,
            original = data.len(),
            stored = payload.len(),
            compressed,
            "Queued fast file entry"
        );

        self.pending.push(PendingEntry {
            entry: FileEntry {
                name: name.to_string(),
                hash: elf_hash(name.as_bytes()),
                offset: 0,
                compressed_size: payload.len() as u64,
                uncompressed_size: data.len() as u64,
                crc32: crc32_checksum(data),
                compressed,
            },
            payload,
        });
        self.names.insert(name.to_string());
        Ok(())
    }

    /// Queue the contents of the file at `source` under `name`.
    pub fn add_file(&mut self, name: &str, source: impl AsRef<Path>, compress: bool) -> Result<()> {
        let data = fs::read(source)?;
        self.add(name, &data, compress)
    }

    /// Write the archive. The file is written next to the destination and
    /// renamed into place once complete.
    pub fn finish(mut self) -> Result<ArchiveSummary> {
        let entry_count = u32::try_from(self.pending.len()).map_err(|_| {
            FastFileError::InvalidFormat(format!("too many entries: {}", self.pending.len()))
        })?;

        let index_len: u64 = self.pending.iter().map(|p| p.entry.encoded_len()).sum();
        let mut offset = HEADER_LEN + index_len;
        for pending in &mut self.pending {
            pending.entry.offset = offset;
            offset += pending.entry.compressed_size;
        }

        let tmp_path = self.path.with_extension("tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            FastFileHeader {
                version: FASTFILE_VERSION,
                entry_count,
            }
            .write_to(&mut writer)?;
            for pending in &self.pending {
                pending.entry.write_to(&mut writer)?;
            }
            for pending in &self.pending {
                writer.write_all(&pending.payload)?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        let summary = ArchiveSummary {
            entries: self.pending.len(),
            uncompressed_bytes: self.pending.iter().map(|p| p.entry.uncompressed_size).sum(),
            stored_bytes: self.pending.iter().map(|p| p.entry.compressed_size).sum(),
            archive_bytes: offset,
        };

        info!(
            "Wrote fast file {}: {} entries, {} -> {} bytes ({:.1}%)",
            self.path.display(),
            summary.entries,
            summary.uncompressed_bytes,
            summary.stored_bytes,
            summary.ratio()
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::FastFile;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("mc-fastfile-test-writer-{name}.fst"))
    }

    #[test]
    fn test_layout_and_summary() {
        let path = temp_path("layout");
        let mut writer = FastFileWriter::new(&path, &FastFileConfig::default());
        writer.add("a.txt", b"hello", false).unwrap();
        writer.add("b.bin", &[0u8; 10_000], true).unwrap();
        assert_eq!(writer.len(), 2);

        let summary = writer.finish().unwrap();
        assert_eq!(summary.entries, 2);
        assert_eq!(summary.uncompressed_bytes, 10_005);
        assert!(summary.stored_bytes < 1_000);
        assert_eq!(summary.archive_bytes, fs::metadata(&path).unwrap().len());
        assert!(!path.with_extension("tmp").exists());

        let archive = FastFile::open(&path, &FastFileConfig::default()).unwrap();
        let entries = archive.entries();
        assert_eq!(entries[0].name, "a.txt");
        assert_eq!(entries[1].offset, entries[0].offset + entries[0].compressed_size);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_incompressible_data_stored_raw() {
        let path = temp_path("raw");
        let mut writer = FastFileWriter::new(&path, &FastFileConfig::default());
        writer.add("tiny", b"xy", true).unwrap();
        writer.finish().unwrap();

        let mut archive = FastFile::open(&path, &FastFileConfig::default()).unwrap();
        let handle = archive.find("tiny").unwrap();
        let entry = archive.entry(handle).unwrap();
        assert!(!entry.compressed);
        assert_eq!(entry.compressed_size, 2);
        assert_eq!(archive.load(handle).unwrap(), b"xy");
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_rejects_bad_names() {
        let mut writer = FastFileWriter::new(temp_path("names"), &FastFileConfig::default());
        writer.add("dup", b"1", false).unwrap();
        assert!(matches!(
            writer.add("dup", b"2", false),
            Err(FastFileError::InvalidFormat(_))
        ));
        assert!(matches!(
            writer.add("", b"2", false),
            Err(FastFileError::InvalidFormat(_))
        ));
        let long = "n".repeat(usize::from(u16::MAX) + 1);
        assert!(writer.add(&long, b"2", false).is_err());
        assert_eq!(writer.len(), 1);
    }

    #[test]
    fn test_empty_archive() {
        let path = temp_path("empty");
        let summary = FastFileWriter::new(&path, &FastFileConfig::default())
            .finish()
            .unwrap();
        assert_eq!(summary.entries, 0);
        assert_eq!(summary.archive_bytes, HEADER_LEN);

        let archive = FastFile::open(&path, &FastFileConfig::default()).unwrap();
        assert!(archive.is_empty());
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_add_file() {
        let source = std::env::temp_dir().join("mc-fastfile-test-writer-source.txt");
        fs::write(&source, b"mission briefing").unwrap();

        let path = temp_path("add-file");
        let mut writer = FastFileWriter::new(&path, &FastFileConfig::default());
        writer.add_file("missions/m01.txt", &source, true).unwrap();
        assert!(writer.add_file("missing", source.with_extension("nope"), true).is_err());
        writer.finish().unwrap();

        let mut archive = FastFile::open(&path, &FastFileConfig::default()).unwrap();
        let handle = archive.find("missions/m01.txt").unwrap();
        assert_eq!(archive.load(handle).unwrap(), b"mission briefing");

        fs::remove_file(&path).unwrap();
        fs::remove_file(&source).unwrap();
    }
}
