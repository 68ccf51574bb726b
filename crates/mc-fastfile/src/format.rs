//! Fast-file on-disk layout.
//!
//! ```text
//! header : magic "MCFF" | version u32 | entry_count u32
//! entry  : name_len u16 | name | hash u32 | offset u64 |
//!          compressed_size u64 | uncompressed_size u64 | crc32 u32 | flags u8
//! payload: entry bytes back to back, each compressed on its own
//! ```
//!
//! All integers are little endian. Offsets are absolute within the file.

use crate::error::{FastFileError, Result};
use std::io::{self, Read, Write};

/// Magic bytes to identify fast files
pub const MAGIC_BYTES: &[u8; 4] = b"MCFF";

/// Version of the fast-file format
pub const FASTFILE_VERSION: u32 = 0x0002_0001;

/// Size of the fixed header
pub const HEADER_LEN: u64 = 12;

/// Encoded size of an index entry with an empty name
pub const MIN_ENTRY_LEN: u64 = 2 + 4 + 8 + 8 + 8 + 4 + 1;

const FLAG_COMPRESSED: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FastFileHeader {
    pub version: u32,
    pub entry_count: u32,
}

impl FastFileHeader {
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(MAGIC_BYTES)?;
        writer.write_all(&self.version.to_le_bytes())?;
        writer.write_all(&self.entry_count.to_le_bytes())?;
        Ok(())
    }

    /// Read and validate the header. A bad magic is `InvalidFormat`, a
    /// version other than [`FASTFILE_VERSION`] is `WrongVersion`.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC_BYTES {
            return Err(FastFileError::InvalidFormat("invalid magic bytes".into()));
        }

        let version = read_u32(reader)?;
        if version != FASTFILE_VERSION {
            return Err(FastFileError::WrongVersion {
                expected: FASTFILE_VERSION,
                found: version,
            });
        }

        let entry_count = read_u32(reader)?;
        Ok(Self {
            version,
            entry_count,
        })
    }
}

/// Index record for one stored file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub hash: u32,
    pub offset: u64,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    /// CRC32 of the uncompressed bytes.
    pub crc32: u32,
    pub compressed: bool,
}

impl FileEntry {
    /// Bytes this record takes up in the index.
    pub(crate) fn encoded_len(&self) -> u64 {
        MIN_ENTRY_LEN + self.name.len() as u64
    }

    pub(crate) fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let name_len = u16::try_from(self.name.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "entry name too long"))?;
        writer.write_all(&name_len.to_le_bytes())?;
        writer.write_all(self.name.as_bytes())?;
        writer.write_all(&self.hash.to_le_bytes())?;
        writer.write_all(&self.offset.to_le_bytes())?;
        writer.write_all(&self.compressed_size.to_le_bytes())?;
        writer.write_all(&self.uncompressed_size.to_le_bytes())?;
        writer.write_all(&self.crc32.to_le_bytes())?;
        let flags = if self.compressed { FLAG_COMPRESSED } else { 0 };
        writer.write_all(&[flags])?;
        Ok(())
    }

    pub(crate) fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf2 = [0u8; 2];
        reader.read_exact(&mut buf2)?;
        let name_len = u16::from_le_bytes(buf2) as usize;

        let mut name = vec![0u8; name_len];
        reader.read_exact(&mut name)?;
        let name = String::from_utf8(name)
            .map_err(|_| FastFileError::InvalidFormat("entry name is not UTF-8".into()))?;

        let hash = read_u32(reader)?;
        let offset = read_u64(reader)?;
        let compressed_size = read_u64(reader)?;
        let uncompressed_size = read_u64(reader)?;
        let crc32 = read_u32(reader)?;

        let mut flags = [0u8; 1];
        reader.read_exact(&mut flags)?;

        Ok(Self {
            name,
            hash,
            offset,
            compressed_size,
            uncompressed_size,
            crc32,
            compressed: flags[0] & FLAG_COMPRESSED != 0,
        })
    }
}

fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf4 = [0u8; 4];
    reader.read_exact(&mut buf4)?;
    Ok(u32::from_le_bytes(buf4))
}

fn read_u64<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut buf8 = [0u8; 8];
    reader.read_exact(&mut buf8)?;
    Ok(u64::from_le_bytes(buf8))
}

/// Simple CRC32 checksum
pub fn crc32_checksum(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFFFFFF;
    for byte in data {
        crc ^= *byte as u32;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB88320;
            } else {
                crc >>= 1;
            }
        }
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_checksum() {
        assert_eq!(crc32_checksum(b""), 0);
        assert_eq!(crc32_checksum(b"123456789"), 0xCBF4_3926);
        assert_ne!(crc32_checksum(b"Hello, World!"), crc32_checksum(b"Different data"));
    }

    #[test]
    fn test_header_rejects_other_version() {
        let header = FastFileHeader {
            version: FASTFILE_VERSION + 1,
            entry_count: 0,
        };
        let mut bytes = Vec::new();
        header.write_to(&mut bytes).unwrap();
        assert_eq!(bytes.len() as u64, HEADER_LEN);

        let err = FastFileHeader::read_from(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(
            err,
            FastFileError::WrongVersion { expected: FASTFILE_VERSION, found } if found == FASTFILE_VERSION + 1
        ));
    }

    #[test]
    fn test_header_rejects_bad_magic() {
        let err = FastFileHeader::read_from(&mut Cursor::new(b"PK\x03\x04\0\0\0\0\0\0\0\0")).unwrap_err();
        assert!(matches!(err, FastFileError::InvalidFormat(_)));
    }

    #[test]
    fn test_entry_encoding() {
        let entry = FileEntry {
            name: "textures/mech01.tga".into(),
            hash: 0x1234,
            offset: 99,
            compressed_size: 10,
            uncompressed_size: 20,
            crc32: 0xDEAD_BEEF,
            compressed: true,
        };
        let mut bytes = Vec::new();
        entry.write_to(&mut bytes).unwrap();
        assert_eq!(bytes.len() as u64, entry.encoded_len());

        let decoded = FileEntry::read_from(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_non_utf8_name_rejected() {
        let mut bytes = vec![2u8, 0, 0xFF, 0xFE];
        bytes.extend_from_slice(&[0u8; 33]);
        let err = FileEntry::read_from(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, FastFileError::InvalidFormat(_)));
    }

    #[test]
    fn test_truncated_entry_is_io_error() {
        let err = FileEntry::read_from(&mut Cursor::new([5u8, 0, b'a'])).unwrap_err();
        assert!(matches!(err, FastFileError::Io(_)));
    }
}
