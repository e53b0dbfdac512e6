//! Alignment arithmetic shared by every pool.
//!
//! All helpers take the alignment as a power of two. The checked variants
//! return `None` on overflow so layout computations can surface
//! [`Error::LayoutOverflow`](crate::Error::LayoutOverflow) instead of wrapping.

use crate::error::{Error, Result};
use std::mem;

/// Natural alignment of a machine word (and of every intrusive header).
pub const WORD_ALIGN: usize = mem::align_of::<usize>();

/// Size of a machine word in bytes.
pub const WORD_SIZE: usize = mem::size_of::<usize>();

/// Round `value` up to the next multiple of `align`.
///
/// `align` must be a power of two; overflow wraps in release builds.
#[inline]
pub const fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// Round `value` up to the next multiple of `align`, or `None` on overflow.
#[inline]
pub const fn checked_align_up(value: usize, align: usize) -> Option<usize> {
    match value.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

/// Round `value` down to the previous multiple of `align`.
#[inline]
pub const fn align_down(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    value & !(align - 1)
}

/// Whether `value` is a multiple of `align`.
#[inline]
pub const fn is_aligned(value: usize, align: usize) -> bool {
    value & (align - 1) == 0
}

/// Bytes needed to bring `value` up to a multiple of `align`.
#[inline]
pub const fn padding_for(value: usize, align: usize) -> usize {
    align_up(value, align) - value
}

/// Validate that `align` is a non-zero power of two.
pub fn validate_alignment(align: usize) -> Result<()> {
    if align.is_power_of_two() {
        Ok(())
    } else {
        Err(Error::invalid(format!(
            "alignment must be a power of two, got {align}"
        )))
    }
}

/// Checked `a * b + c` used for slab and buffer sizes.
pub(crate) fn checked_span(count: usize, stride: usize, base: usize) -> Result<usize> {
    count
        .checked_mul(stride)
        .and_then(|n| n.checked_add(base))
        .ok_or_else(|| {
            Error::LayoutOverflow(format!(
                "{count} x {stride} + {base} bytes exceeds usize"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up_and_down() {
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(1, 8), 8);
        assert_eq!(align_up(8, 8), 8);
        assert_eq!(align_up(9, 16), 16);
        assert_eq!(align_down(15, 8), 8);
        assert_eq!(align_down(16, 16), 16);
    }

    #[test]
    fn test_padding_and_is_aligned() {
        assert_eq!(padding_for(13, 8), 3);
        assert_eq!(padding_for(16, 8), 0);
        assert!(is_aligned(64, 32));
        assert!(!is_aligned(65, 32));
    }

    #[test]
    fn test_checked_helpers() {
        assert_eq!(checked_align_up(usize::MAX, 8), None);
        assert_eq!(checked_align_up(9, 8), Some(16));
        assert!(checked_span(usize::MAX, 2, 0).is_err());
        assert_eq!(checked_span(4, 16, 32).unwrap(), 96);
    }

    #[test]
    fn test_validate_alignment() {
        assert!(validate_alignment(1).is_ok());
        assert!(validate_alignment(64).is_ok());
        assert!(validate_alignment(0).is_err());
        assert!(validate_alignment(24).is_err());
    }
}
