//! AXI window placement.
//!
//! Register words live at `base + 4 * word_address` in physical memory.
//!
//! ```text
//! Board    AXI base      Window
//! ──────── ───────────── ─────────────
//! zcu102   0x80000000    1 MB
//! wib      0xa0020000    1 MB
//! ```
//!
//! The table above is informational: the base is always supplied by the
//! operator at runtime.

/// Default physical base of the AXI window.
pub const DEFAULT_BASE: u64 = 0x8000_0000;

/// Default window length in bytes.
pub const DEFAULT_LEN_BYTES: usize = 0x10_0000;

/// Bytes per register word.
pub const WORD_BYTES: usize = 4;

/// Default window length in 32-bit words.
pub const DEFAULT_LEN_WORDS: usize = DEFAULT_LEN_BYTES / WORD_BYTES;

/// Byte offset of a word address inside the window.
#[must_use]
pub const fn byte_offset(word_address: u32) -> usize {
    word_address as usize * WORD_BYTES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_addresses_are_four_bytes_apart() {
        assert_eq!(byte_offset(0), 0);
        assert_eq!(byte_offset(1), 4);
        assert_eq!(byte_offset(0x10), 0x40);
        assert_eq!(DEFAULT_LEN_WORDS, 0x4_0000);
    }
}
