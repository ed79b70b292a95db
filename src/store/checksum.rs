//! CRC32 checksums for store records
//!
//! Per STORE.md §3: every record carries a checksum over its length
//! prefix, type byte, and body. Any mismatch away from the crash tail is
//! corruption.

use crc32fast::Hasher;

/// Computes a CRC32 checksum over the provided bytes.
///
/// Deterministic: the same input always produces the same output.
pub fn compute_checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Verifies that the checksum of `data` matches `expected`.
pub fn verify_checksum(data: &[u8], expected: u32) -> bool {
    compute_checksum(data) == expected
}
