//! Registry of open fast files.
//!
//! Archives are searched in the order they were registered and the first
//! one holding a name wins, so a later archive never shadows an earlier
//! one. The registry is a plain value created at startup and handed to
//! whatever loads assets.

use crate::archive::{EntryHandle, FastFile, HeapAsset};
use crate::config::FastFileConfig;
use crate::error::{FastFileError, FastFileErrorKind, Result};
use crate::hash::elf_hash;
use mc_heap::UserHeap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Position of an archive in its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArchiveId(usize);

impl ArchiveId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Where a name was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FastFileHit {
    pub archive: ArchiveId,
    pub entry: EntryHandle,
}

#[derive(Debug, Default)]
pub struct FastFileRegistry {
    config: FastFileConfig,
    archives: Vec<FastFile>,
    last_error: Option<FastFileErrorKind>,
}

impl FastFileRegistry {
    pub fn new(config: FastFileConfig) -> Self {
        Self {
            config,
            archives: Vec::new(),
            last_error: None,
        }
    }

    /// Open the archive at `path` and append it to the search order.
    ///
    /// On failure the registry is left exactly as it was.
    pub fn init(&mut self, path: impl AsRef<Path>) -> Result<ArchiveId> {
        let path = path.as_ref();

        if let Some(max) = self
            .config
            .max_fast_files
            .filter(|&max| self.archives.len() >= max)
        {
            warn!(max, "Fast file registry full, cannot open {}", path.display());
            self.last_error = Some(FastFileErrorKind::RegistryFull);
            return Err(FastFileError::RegistryFull { max });
        }

        match FastFile::open(path, &self.config) {
            Ok(archive) => {
                let id = ArchiveId(self.archives.len());
                self.archives.push(archive);
                Ok(id)
            }
            Err(e) => {
                if let FastFileError::WrongVersion { expected, found } = &e {
                    warn!(
                        expected = *expected,
                        found = *found,
                        "Incompatible asset archive {}",
                        path.display()
                    );
                } else {
                    warn!(error = %e, "Failed to open fast file {}", path.display());
                }
                self.last_error = Some(e.kind());
                Err(e)
            }
        }
    }

    /// Close every archive and empty the registry. Safe on an empty
    /// registry and safe to repeat.
    pub fn fini(&mut self) {
        for archive in &mut self.archives {
            archive.close();
        }
        let closed = self.archives.len();
        self.archives.clear();
        debug!(closed, "Fast file registry shut down");
    }

    /// Find `name` in the first archive that holds it.
    pub fn find(&self, name: &str) -> Option<FastFileHit> {
        let hash = elf_hash(name.as_bytes());
        self.archives
            .iter()
            .enumerate()
            .find_map(|(index, archive)| {
                archive.open_fast(hash, name).map(|entry| FastFileHit {
                    archive: ArchiveId(index),
                    entry,
                })
            })
    }

    pub fn archive(&self, id: ArchiveId) -> Option<&FastFile> {
        self.archives.get(id.0)
    }

    fn archive_mut(&mut self, id: ArchiveId) -> Result<&mut FastFile> {
        self.archives
            .get_mut(id.0)
            .ok_or(FastFileError::UnknownArchive(id.0))
    }

    /// Uncompressed size of a found entry.
    pub fn size_of(&self, hit: FastFileHit) -> Option<usize> {
        self.archive(hit.archive)?.size_of(hit.entry)
    }

    pub fn read(&mut self, hit: FastFileHit, dest: &mut [u8]) -> Result<usize> {
        self.archive_mut(hit.archive)?.read(hit.entry, dest)
    }

    pub fn load(&mut self, hit: FastFileHit) -> Result<Vec<u8>> {
        self.archive_mut(hit.archive)?.load(hit.entry)
    }

    pub fn load_into_heap(&mut self, hit: FastFileHit, heap: &mut UserHeap) -> Result<HeapAsset> {
        self.archive_mut(hit.archive)?.load_into_heap(hit.entry, heap)
    }

    /// Load an asset that may legitimately be absent.
    ///
    /// A missing name or a corrupt entry gives `Ok(None)`; the corrupt case
    /// is logged. Other failures are returned.
    pub fn load_optional(&mut self, name: &str) -> Result<Option<Vec<u8>>> {
        let Some(hit) = self.find(name) else {
            return Ok(None);
        };

        match self.load(hit) {
            Ok(data) => Ok(Some(data)),
            Err(FastFileError::CorruptEntry { name, reason }) => {
                info!(asset = %name, %reason, "Optional asset unavailable");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub fn len(&self) -> usize {
        self.archives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archives.is_empty()
    }

    pub fn archives(&self) -> impl Iterator<Item = &FastFile> {
        self.archives.iter()
    }

    /// Category of the last failed `init`, if any.
    pub fn last_error(&self) -> Option<FastFileErrorKind> {
        self.last_error
    }

    pub fn config(&self) -> &FastFileConfig {
        &self.config
    }

    /// Log a one-line summary per archive.
    pub fn log_summary(&self) {
        for (index, archive) in self.archives.iter().enumerate() {
            info!(
                slot = index,
                entries = archive.len(),
                open = archive.is_open(),
                "Fast file {}",
                archive.path().display()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{FastFileHeader, FileEntry, FASTFILE_VERSION, HEADER_LEN};
    use std::io::Write;
    use crate::writer::FastFileWriter;
    use std::fs;
    use std::path::PathBuf;

    fn build(name: &str, files: &[(&str, &[u8])]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("mc-fastfile-test-registry-{name}.fst"));
        let mut writer = FastFileWriter::new(&path, &FastFileConfig::default());
        for (entry, data) in files {
            writer.add(entry, data, true).unwrap();
        }
        writer.finish().unwrap();
        path
    }

    fn wrong_version(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("mc-fastfile-test-registry-{name}.fst"));
        let mut bytes = Vec::new();
        FastFileHeader {
            version: FASTFILE_VERSION - 1,
            entry_count: 0,
        }
        .write_to(&mut bytes)
        .unwrap();
        fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_first_registered_wins() {
        let a = build("first-a", &[("shared.txt", b"from a"), ("only_a.txt", b"a")]);
        let b = build("first-b", &[("shared.txt", b"from b"), ("only_b.txt", b"b")]);

        let mut registry = FastFileRegistry::default();
        let id_a = registry.init(&a).unwrap();
        let id_b = registry.init(&b).unwrap();
        assert_eq!(registry.len(), 2);

        let hit = registry.find("shared.txt").unwrap();
        assert_eq!(hit.archive, id_a);
        assert_eq!(registry.load(hit).unwrap(), b"from a");

        let hit = registry.find("only_b.txt").unwrap();
        assert_eq!(hit.archive, id_b);
        assert_eq!(registry.size_of(hit), Some(1));

        registry.fini();
        fs::remove_file(&a).unwrap();
        fs::remove_file(&b).unwrap();
    }

    #[test]
    fn test_miss_leaves_handle_untouched() {
        let a = build("miss", &[("present.txt", b"here")]);
        let mut registry = FastFileRegistry::default();
        registry.init(&a).unwrap();

        let mut handle = registry.find("present.txt");
        let before = handle;
        if let Some(hit) = registry.find("absent.txt") {
            handle = Some(hit);
        }
        assert_eq!(handle, before);
        assert!(registry.find("absent.txt").is_none());
        assert_eq!(registry.load_optional("absent.txt").unwrap(), None);

        fs::remove_file(&a).unwrap();
    }

    #[test]
    fn test_wrong_version_leaves_registry_unchanged() {
        let good = build("version-good", &[("a", b"a")]);
        let bad = wrong_version("version-bad");

        let mut registry = FastFileRegistry::default();
        registry.init(&good).unwrap();

        let err = registry.init(&bad).unwrap_err();
        assert!(matches!(err, FastFileError::WrongVersion { .. }));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.last_error(), Some(FastFileErrorKind::WrongVersion));

        fs::remove_file(&good).unwrap();
        fs::remove_file(&bad).unwrap();
    }

    #[test]
    fn test_capacity_limit() {
        let a = build("cap-a", &[("a", b"a")]);
        let b = build("cap-b", &[("b", b"b")]);

        let mut registry = FastFileRegistry::new(FastFileConfig {
            max_fast_files: Some(1),
            ..FastFileConfig::default()
        });
        registry.init(&a).unwrap();
        assert!(matches!(
            registry.init(&b),
            Err(FastFileError::RegistryFull { max: 1 })
        ));
        assert_eq!(registry.len(), 1);
        assert!(registry.find("b").is_none());

        registry.fini();
        registry.init(&b).unwrap();
        assert!(registry.find("b").is_some());

        fs::remove_file(&a).unwrap();
        fs::remove_file(&b).unwrap();
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let mut registry = FastFileRegistry::default();
        let err = registry
            .init(std::env::temp_dir().join("mc-fastfile-test-registry-nonexistent.fst"))
            .unwrap_err();
        assert!(matches!(err, FastFileError::Io(_)));
        assert!(registry.is_empty());
        assert_eq!(registry.last_error(), Some(FastFileErrorKind::Io));
    }

    #[test]
    fn test_fini_on_empty_registry() {
        let mut registry = FastFileRegistry::default();
        registry.fini();
        registry.fini();
        assert!(registry.is_empty());
        assert!(registry.find("anything").is_none());
    }

    #[test]
    fn test_corrupt_optional_asset_is_unavailable() {
        let path = build("optional", &[("music.ogg", &[1u8; 4096])]);
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x55;
        fs::write(&path, &bytes).unwrap();

        let mut registry = FastFileRegistry::default();
        registry.init(&path).unwrap();
        assert!(registry.find("music.ogg").is_some());
        assert_eq!(registry.load_optional("music.ogg").unwrap(), None);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_oversized_optional_asset_is_unavailable() {
        let path = std::env::temp_dir().join("mc-fastfile-test-registry-oversized.fst");
        let mut entry = FileEntry {
            name: "music.ogg".into(),
            hash: elf_hash(b"music.ogg"),
            offset: 0,
            compressed_size: 4,
            uncompressed_size: 1 << 46,
            crc32: 0,
            compressed: true,
        };
        entry.offset = HEADER_LEN + entry.encoded_len();

        let mut file = fs::File::create(&path).unwrap();
        FastFileHeader {
            version: FASTFILE_VERSION,
            entry_count: 1,
        }
        .write_to(&mut file)
        .unwrap();
        entry.write_to(&mut file).unwrap();
        file.write_all(&[0u8; 4]).unwrap();
        file.flush().unwrap();

        let mut registry = FastFileRegistry::default();
        registry.init(&path).unwrap();
        assert_eq!(registry.load_optional("music.ogg").unwrap(), None);
        assert_eq!(registry.len(), 1);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_huge_entry_count_fails_init() {
        let path = std::env::temp_dir().join("mc-fastfile-test-registry-count.fst");
        let mut bytes = Vec::new();
        FastFileHeader {
            version: FASTFILE_VERSION,
            entry_count: u32::MAX,
        }
        .write_to(&mut bytes)
        .unwrap();
        fs::write(&path, bytes).unwrap();

        let mut registry = FastFileRegistry::default();
        assert!(matches!(
            registry.init(&path),
            Err(FastFileError::InvalidFormat(_))
        ));
        assert!(registry.is_empty());
        assert_eq!(registry.last_error(), Some(FastFileErrorKind::InvalidFormat));

        fs::remove_file(&path).unwrap();
    }
}
