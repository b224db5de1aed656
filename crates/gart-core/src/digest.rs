//! Digests, checksums, and file-format magics.
//!
//! Every gart file begins with a magic derived from a SHA-256 of a fixed
//! label, followed by a checksum over the rest of the file:
//!
//! | File | Magic | Checksum |
//! |------|-------|----------|
//! | object index | `sha256("mmaped-index-file")[..8]` | CRC-64 |
//! | tagmap | `sha256("tagmap-file")[..8]` | CRC-64 |
//! | tag dictionary | `sha256("tagdict-file")[..8]` | CRC-64 |
//! | card | `sha256("card-file")[..4]` | CRC-32 |
//!
//! The CRC-64 variant is CRC-64/XZ (ECMA-182 polynomial, reflected, with
//! all-ones init and xor-out).

use crc::{Crc, CRC_64_XZ};
use sha2::{Digest, Sha256};

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_XZ);

/// SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// CRC-64/XZ of `data`.
pub fn crc64(data: &[u8]) -> u64 {
    CRC64.checksum(data)
}

/// IEEE CRC-32 of `data`.
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// 64-bit digest of a string, taken as the first eight bytes of its
/// SHA-256 read big-endian. Used to address tagmap files.
pub fn digest64(s: &str) -> u64 {
    let h = sha256(s.as_bytes());
    let mut b = [0u8; 8];
    b.copy_from_slice(&h[..8]);
    u64::from_be_bytes(b)
}

fn magic<const N: usize>(label: &str) -> [u8; N] {
    let h = sha256(label.as_bytes());
    let mut out = [0u8; N];
    out.copy_from_slice(&h[..N]);
    out
}

/// Magic for the object index file.
pub fn object_index_magic() -> [u8; 8] {
    magic("mmaped-index-file")
}

/// Magic for tagmap files.
pub fn tagmap_magic() -> [u8; 8] {
    magic("tagmap-file")
}

/// Magic for the tag dictionary file.
pub fn tagdict_magic() -> [u8; 8] {
    magic("tagdict-file")
}

/// Magic for card files.
pub fn card_magic() -> [u8; 4] {
    magic("card-file")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc64_check_value() {
        // Standard check input for CRC catalogs.
        assert_eq!(crc64(b"123456789"), 0x995D_C9BB_DF19_39FA);
    }

    #[test]
    fn test_crc32_check_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn test_magics_are_distinct() {
        let a = object_index_magic();
        let b = tagmap_magic();
        let c = tagdict_magic();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
        assert_eq!(&card_magic()[..], &sha256(b"card-file")[..4]);
    }

    #[test]
    fn test_digest64_is_stable() {
        assert_eq!(digest64("greet"), digest64("greet"));
        assert_ne!(digest64("greet"), digest64("Greet"));
    }
}
