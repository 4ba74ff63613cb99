//! ROM bootloader payload checksum.
//!
//! The ROM folds every payload byte into a single byte with XOR, starting from
//! [`CHECKSUM_SEED`]. The result occupies the low byte of the 32-bit checksum
//! field; the upper three bytes stay zero. This only catches transmission
//! errors and must stay bit-for-bit what the ROM computes.

/// Initial value of the XOR fold.
pub const CHECKSUM_SEED: u8 = 0xEF;

/// XOR-fold `data` into `seed`.
pub fn checksum(data: &[u8], seed: u8) -> u8 {
    data.iter().fold(seed, |acc, byte| acc ^ byte)
}

/// Checksum field value for a frame payload.
pub fn frame_checksum(payload: &[u8]) -> u32 {
    u32::from(checksum(payload, CHECKSUM_SEED))
}
