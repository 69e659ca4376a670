//! Line directions and the bit gymnastics between chip-wide masks and
//! the request-relative bits the kernel speaks.
//!
//! A [`Bank`](crate::Bank) tracks lines in masks where bit `n` is line
//! `n` of the chip. The kernel instead numbers the bits of
//! `gpio_v2_line_values` by position within the request's offsets,
//! which the bank always sends in ascending order. Converting between
//! the two is a compaction of the bits selected by the mask.

use std::fmt;

use crate::uapi::v2::GPIO_LINES_MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => f.write_str("input"),
            Direction::Output => f.write_str("output"),
        }
    }
}

/// The line offsets selected by `mask`, ascending.
pub(crate) fn unpack_mask(mask: u64) -> heapless::Vec<u32, GPIO_LINES_MAX> {
    (0..GPIO_LINES_MAX as u32)
        .filter(|line| mask & (1 << line) != 0)
        .collect()
}

/// A mask of the lowest `count` bits.
#[inline]
pub(crate) const fn low_mask(count: u32) -> u64 {
    match 1u64.checked_shl(count) {
        Some(bit) => bit - 1,
        None => u64::MAX,
    }
}

/// Gather the bits of `values` selected by `mask` into the low-order bits.
pub(crate) fn compact(values: u64, mask: u64) -> u64 {
    let mut out = 0;
    let mut bit = 1u64;
    let mut rem = mask;
    while rem != 0 {
        let lowest = rem & rem.wrapping_neg();
        if values & lowest != 0 {
            out |= bit;
        }
        bit <<= 1;
        rem &= rem - 1;
    }
    out
}

/// Scatter low-order `bits` back out to the positions selected by `mask`.
pub(crate) fn expand(bits: u64, mask: u64) -> u64 {
    let mut out = 0;
    let mut bit = 1u64;
    let mut rem = mask;
    while rem != 0 {
        let lowest = rem & rem.wrapping_neg();
        if bits & bit != 0 {
            out |= lowest;
        }
        bit <<= 1;
        rem &= rem - 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unpack_is_ascending() {
        let mask = (1 << 27) | (1 << 17) | (1 << 22) | 1 | (1 << 63);
        assert_eq!(&unpack_mask(mask)[..], &[0, 17, 22, 27, 63]);
        assert!(unpack_mask(0).is_empty());
    }

    #[test]
    fn low_masks() {
        assert_eq!(low_mask(0), 0);
        assert_eq!(low_mask(3), 0b111);
        assert_eq!(low_mask(64), u64::MAX);
    }

    #[test]
    fn compaction_follows_offset_order() {
        let ins = (1 << 9) | (1 << 10) | (1 << 11);
        // line 10 high, 9 and 11 low: request index 1
        assert_eq!(compact(1 << 10, ins), 0b010);
        assert_eq!(expand(0b010, ins), 1 << 10);
        assert_eq!(expand(0b101, ins), (1 << 9) | (1 << 11));
        // bits outside the mask are ignored either way
        assert_eq!(compact(u64::MAX, ins), 0b111);
        assert_eq!(expand(u64::MAX, ins), ins);
    }
}
