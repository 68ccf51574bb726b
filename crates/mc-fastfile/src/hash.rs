//! Name hashing for fast-file lookups.

/// Classic ELF string hash over the raw bytes of `name`.
///
/// Only narrows the search; distinct names can share a hash, so callers
/// still compare names.
pub fn elf_hash(name: &[u8]) -> u32 {
    let mut h: u32 = 0;
    for &byte in name {
        h = (h << 4).wrapping_add(u32::from(byte));
        let g = h & 0xF000_0000;
        if g != 0 {
            h ^= g >> 24;
        }
        h &= !g;
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_names() {
        assert_eq!(elf_hash(b""), 0);
        assert_eq!(elf_hash(b"a"), 0x61);
        assert_eq!(elf_hash(b"ab"), 0x672);
        assert_eq!(elf_hash(b"abc"), 0x6783);
    }

    #[test]
    fn test_top_nibble_folded() {
        // The eighth byte pushes the accumulator into the top nibble.
        assert_eq!(elf_hash(b"abcdefg"), 0x0789_ABA7);
        assert_eq!(elf_hash(b"abcdefgh"), 0x089A_BAA8);
        assert_eq!(elf_hash(b"abcdefghij"), 0x0ABA_A66A);

        let long = b"data/missions/warriors/mission_warrior_01.abl";
        assert_eq!(elf_hash(long) & 0xF000_0000, 0);
    }

    #[test]
    fn test_case_sensitive() {
        assert_ne!(elf_hash(b"Mech.tga"), elf_hash(b"mech.tga"));
    }
}
