//! Response files and packing them into fast files.

use crate::wildcard::Wildcard;
use anyhow::{Context, Result};
use mc_fastfile::{ArchiveSummary, FastFileConfig, FastFileRegistry, FastFileWriter};
use mc_heap::UserHeap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

/// Write one `dir/name` line per file matched by `wildcards` and return how
/// many were written.
pub fn write_response<W: Write>(base: &Path, wildcards: &[Wildcard], out: &mut W) -> Result<usize> {
    let mut written = 0;
    for wildcard in wildcards {
        info!("Processing wildcard: {wildcard}");
        let found = wildcard
            .expand(base)
            .with_context(|| format!("Cannot search {}", base.join(wildcard.dir()).display()))?;
        for name in found {
            debug!("\t{name}");
            writeln!(out, "{name}")?;
            written += 1;
        }
    }
    Ok(written)
}

/// Create the response file at `rsp_path`. The file is created even when
/// nothing matched.
pub fn generate_response_file(base: &Path, wildcards: &[Wildcard], rsp_path: &Path) -> Result<usize> {
    let file = File::create(rsp_path)
        .with_context(|| format!("Cannot open file: '{}'", rsp_path.display()))?;
    let mut out = BufWriter::new(file);
    let written = write_response(base, wildcards, &mut out)?;
    out.flush()?;
    Ok(written)
}

/// Entry names listed in a response file, blank lines skipped.
pub fn read_response(text: &str) -> Vec<&str> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect()
}

/// Pack every file listed in `rsp_path` (relative to `base`) into a new
/// fast file at `output`.
pub fn pack(
    base: &Path,
    rsp_path: &Path,
    output: &Path,
    config: &FastFileConfig,
    compress: bool,
) -> Result<ArchiveSummary> {
    let text = fs::read_to_string(rsp_path)
        .with_context(|| format!("Cannot read response file '{}'", rsp_path.display()))?;

    let mut writer = FastFileWriter::new(output, config);
    for name in read_response(&text) {
        writer
            .add_file(name, base.join(name), compress)
            .with_context(|| format!("Cannot pack {name}"))?;
    }

    writer
        .finish()
        .with_context(|| format!("Cannot write {}", output.display()))
}

/// Reopen `archive` and load every entry into `heap`, releasing each one
/// again. Returns the number of entries checked.
pub fn verify(archive: &Path, config: &FastFileConfig, heap: &mut UserHeap) -> Result<usize> {
    let mut registry = FastFileRegistry::new(config.clone());
    let id = registry
        .init(archive)
        .with_context(|| format!("Cannot open {}", archive.display()))?;

    let names: Vec<String> = registry
        .archive(id)
        .map(|fast_file| fast_file.entries().iter().map(|e| e.name.clone()).collect())
        .unwrap_or_default();

    for name in &names {
        let hit = registry
            .find(name)
            .with_context(|| format!("{name} is listed but cannot be found"))?;
        let asset = registry
            .load_into_heap(hit, heap)
            .with_context(|| format!("Cannot load {name}"))?;
        debug!(entry = %name, size = asset.len(), "Verified");
        asset.free(heap);
    }

    registry.fini();
    Ok(names.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mc_fastfile::FastFile;
    use mc_heap::{HeapConfig, HeapList};
    use std::path::PathBuf;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("mc-tools-test-response-{name}"));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_write_response() {
        let base = scratch_dir("write");
        fs::create_dir_all(base.join("art")).unwrap();
        fs::write(base.join("art/mech.tga"), b"tga").unwrap();
        fs::write(base.join("readme.txt"), b"txt").unwrap();

        let wildcards = [Wildcard::parse("art/*.tga"), Wildcard::parse("*.txt")];
        let mut out = Vec::new();
        assert_eq!(write_response(&base, &wildcards, &mut out).unwrap(), 2);
        assert_eq!(String::from_utf8(out).unwrap(), "art/mech.tga\nreadme.txt\n");

        let mut out = Vec::new();
        let none = [Wildcard::parse("art/*.pcx")];
        assert_eq!(write_response(&base, &none, &mut out).unwrap(), 0);
        assert!(out.is_empty());
        fs::remove_dir_all(&base).unwrap();
    }

    #[test]
    fn test_read_response() {
        assert_eq!(read_response("a.txt\r\n\n  b/c.tga \n"), ["a.txt", "b/c.tga"]);
        assert!(read_response("").is_empty());
    }

    #[test]
    fn test_pack_and_verify() {
        let base = scratch_dir("pack");
        fs::create_dir_all(base.join("missions")).unwrap();
        fs::write(base.join("missions/m01.abl"), vec![b'x'; 20_000]).unwrap();
        fs::write(base.join("missions/m02.abl"), b"short").unwrap();

        let rsp = base.join("files.rsp");
        let wildcards = [Wildcard::parse("missions/*.abl")];
        assert_eq!(generate_response_file(&base, &wildcards, &rsp).unwrap(), 2);

        let output = base.join("missions.fst");
        let config = FastFileConfig::default();
        let summary = pack(&base, &rsp, &output, &config, true).unwrap();
        assert_eq!(summary.entries, 2);
        assert!(summary.stored_bytes < summary.uncompressed_bytes);

        let archive = FastFile::open(&output, &config).unwrap();
        assert!(archive.find("missions/m01.abl").is_some());

        let list = HeapList::default();
        let mut heap = UserHeap::init(1024 * 1024, "verify", &list, &HeapConfig::default()).unwrap();
        assert_eq!(verify(&output, &config, &mut heap).unwrap(), 2);
        assert_eq!(heap.live_allocations(), 0);
        fs::remove_dir_all(&base).unwrap();
    }

    #[test]
    fn test_pack_missing_file() {
        let base = scratch_dir("missing");
        let rsp = base.join("files.rsp");
        fs::write(&rsp, "gone.txt\n").unwrap();
        let err = pack(&base, &rsp, &base.join("out.fst"), &FastFileConfig::default(), true)
            .unwrap_err();
        assert!(format!("{err:#}").contains("gone.txt"));
        fs::remove_dir_all(&base).unwrap();
    }
}
