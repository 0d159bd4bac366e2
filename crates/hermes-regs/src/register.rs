//! Masked register descriptor.
//!
//! A logical register is a run of bits inside one 32-bit word of the AXI
//! window. The word is selected by `address` (a word offset, not a byte
//! offset) and the bits by `mask`.
//!
//! ```text
//!  31                 16 15      8 7        0
//! ┌─────────────────────┬─────────┬──────────┐
//! │        other        │  field  │  other   │   mask = 0x0000_ff00
//! └─────────────────────┴─────────┴──────────┘   shift = 8
//! ```
//!
//! Only contiguous masks are required to round-trip. A non-contiguous mask
//! is accepted and extraction follows the same `(word & mask) >> shift` rule.

/// Mask selecting the whole word.
pub const FULL_MASK: u32 = 0xFFFF_FFFF;

/// Immutable (address, mask) pair naming one logical register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Register {
    address: u32,
    mask: u32,
}

impl Register {
    /// Create a register descriptor. Returns `None` for an empty mask.
    #[must_use]
    pub const fn new(address: u32, mask: u32) -> Option<Self> {
        if mask == 0 {
            None
        } else {
            Some(Self { address, mask })
        }
    }

    /// Descriptor covering the whole word at `address`.
    #[must_use]
    pub const fn full(address: u32) -> Self {
        Self {
            address,
            mask: FULL_MASK,
        }
    }

    /// Word address.
    #[must_use]
    pub const fn address(&self) -> u32 {
        self.address
    }

    /// Bit mask within the word.
    #[must_use]
    pub const fn mask(&self) -> u32 {
        self.mask
    }

    /// Position of the lowest selected bit.
    #[must_use]
    pub const fn shift(&self) -> u32 {
        shift(self.mask)
    }

    /// Number of selected bits.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.mask.count_ones()
    }

    /// Largest value the field can hold (for contiguous masks).
    #[must_use]
    pub const fn max_value(&self) -> u32 {
        field_mask(self.mask)
    }

    /// Pull this register's value out of a raw word.
    #[must_use]
    pub const fn extract(&self, word: u32) -> u32 {
        extract(word, self.mask)
    }

    /// Merge `value` into `word`, leaving bits outside the mask untouched.
    #[must_use]
    pub const fn insert(&self, word: u32, value: u32) -> u32 {
        insert(word, self.mask, value)
    }
}

/// Index of the lowest set bit of `mask` (32 for an empty mask).
#[must_use]
pub const fn shift(mask: u32) -> u32 {
    mask.trailing_zeros()
}

/// The mask shifted down to bit 0.
#[must_use]
pub const fn field_mask(mask: u32) -> u32 {
    match mask.checked_shr(shift(mask)) {
        Some(m) => m,
        None => 0,
    }
}

/// `(word & mask) >> shift`, or the raw word for [`FULL_MASK`].
#[must_use]
pub const fn extract(word: u32, mask: u32) -> u32 {
    if mask == FULL_MASK {
        return word;
    }
    match (word & mask).checked_shr(shift(mask)) {
        Some(v) => v,
        None => 0,
    }
}

/// Clear the masked bits of `word` and OR in `value`, truncated to the field.
///
/// [`FULL_MASK`] replaces the word outright; an empty mask leaves it unchanged.
#[must_use]
pub const fn insert(word: u32, mask: u32, value: u32) -> u32 {
    if mask == FULL_MASK {
        return value;
    }
    if mask == 0 {
        return word;
    }
    (word & !mask) | ((value & field_mask(mask)) << shift(mask))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every contiguous run of set bits in a 32-bit word.
    fn contiguous_masks() -> impl Iterator<Item = u32> {
        (0..32u32).flat_map(|lo| {
            (lo..32).map(move |hi| {
                let width = hi - lo + 1;
                let ones = if width == 32 { FULL_MASK } else { (1u32 << width) - 1 };
                ones << lo
            })
        })
    }

    #[test]
    fn empty_mask_is_rejected() {
        assert!(Register::new(0x10, 0).is_none());
        assert!(Register::new(0x10, 1).is_some());
    }

    #[test]
    fn shift_is_lowest_set_bit() {
        assert_eq!(shift(0x0000_0001), 0);
        assert_eq!(shift(0x0000_ff00), 8);
        assert_eq!(shift(0x8000_0000), 31);
        assert_eq!(shift(0), 32);
    }

    #[test]
    fn contiguous_masks_round_trip_on_zero_word() {
        for mask in contiguous_masks() {
            let field = field_mask(mask);
            for value in [0, 1, field >> 1, field] {
                let word = insert(0, mask, value);
                assert_eq!(word & !mask, 0, "bits outside {mask:#x} touched");
                assert_eq!(extract(word, mask), value, "mask {mask:#x} value {value:#x}");
            }
        }
    }

    #[test]
    fn insert_preserves_neighbouring_bits() {
        let reg = Register::new(0, 0x0000_0ff0).unwrap();
        let word = reg.insert(0xdead_beef, 0x5a);
        assert_eq!(word, 0xdead_b5af);
        assert_eq!(reg.extract(word), 0x5a);
    }

    #[test]
    fn oversized_value_is_truncated_to_field() {
        let reg = Register::new(0, 0x0000_00f0).unwrap();
        assert_eq!(reg.insert(0, 0x1ff), 0xf0);
        assert_eq!(reg.width(), 4);
        assert_eq!(reg.max_value(), 0xf);
    }

    #[test]
    fn full_mask_is_identity() {
        let reg = Register::full(3);
        assert_eq!(reg.extract(0x1234_5678), 0x1234_5678);
        assert_eq!(reg.insert(0xffff_ffff, 0x0000_0001), 0x0000_0001);
    }

    #[test]
    fn non_contiguous_mask_uses_simple_rule() {
        // Bits 1 and 3: extraction is (word & mask) >> 1, no compaction.
        assert_eq!(extract(0b1010, 0b1010), 0b101);
    }
}
