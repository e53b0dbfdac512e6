//! Occupancy bitmaps.
//!
//! Two shapes live here:
//!
//! - [`BitmapWord`]: a single machine word used as the whole occupancy state
//!   of a bitmap slab (32 or 64 slots).
//! - [`OccupancyBitmap`]: a word array tracking an arbitrary number of
//!   elements, used by the checked flat pool to catch foreign and
//!   duplicate returns.
//!
//! In both, a set bit means the slot is allocated.

mod sealed {
    pub trait Sealed {}
    impl Sealed for u32 {}
    impl Sealed for u64 {}
}

/// A machine word usable as a slab bitmap.
///
/// Implemented for `u32` and `u64` only.
pub trait BitmapWord: sealed::Sealed + Copy + Eq + std::fmt::Debug + 'static {
    /// Number of slots one word can track.
    const BITS: usize;
    /// No slot allocated.
    const EMPTY: Self;
    /// Every slot allocated.
    const FULL: Self;

    /// Index of the lowest clear bit. Only meaningful when `self != FULL`.
    fn lowest_clear(self) -> usize;

    /// Return the word with bit `index` set.
    fn with_set(self, index: usize) -> Self;

    /// Return the word with bit `index` cleared.
    fn with_cleared(self, index: usize) -> Self;

    /// Whether bit `index` is set.
    fn is_set(self, index: usize) -> bool;

    /// Number of set bits.
    fn count_set(self) -> usize;
}

macro_rules! impl_bitmap_word {
    ($t:ty) => {
        impl BitmapWord for $t {
            const BITS: usize = <$t>::BITS as usize;
            const EMPTY: Self = 0;
            const FULL: Self = <$t>::MAX;

            #[inline]
            fn lowest_clear(self) -> usize {
                (!self).trailing_zeros() as usize
            }

            #[inline]
            fn with_set(self, index: usize) -> Self {
                self | (1 << index)
            }

            #[inline]
            fn with_cleared(self, index: usize) -> Self {
                self & !(1 << index)
            }

            #[inline]
            fn is_set(self, index: usize) -> bool {
                self & (1 << index) != 0
            }

            #[inline]
            fn count_set(self) -> usize {
                self.count_ones() as usize
            }
        }
    };
}

impl_bitmap_word!(u32);
impl_bitmap_word!(u64);

/// A bitmap over `len` elements backed by 64-bit words.
///
/// Not synchronized; owned by a single pool.
///
/// # Performance
///
/// - `set` / `clear` / `is_set`: O(1)
/// - `count_set`: O(n/64)
#[derive(Debug, Clone)]
pub struct OccupancyBitmap {
    words: Box<[u64]>,
    len: usize,
}

impl OccupancyBitmap {
    /// Create a bitmap with every element clear.
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0u64; len.div_ceil(64)].into_boxed_slice(),
            len,
        }
    }

    /// Number of tracked elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the bitmap tracks no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Set bit `index`, returning whether it was previously clear.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn set(&mut self, index: usize) -> bool {
        assert!(index < self.len, "bit index out of bounds");
        let word = &mut self.words[index / 64];
        let was_clear = !word.is_set(index % 64);
        *word = word.with_set(index % 64);
        was_clear
    }

    /// Clear bit `index`, returning whether it was previously set.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn clear(&mut self, index: usize) -> bool {
        assert!(index < self.len, "bit index out of bounds");
        let word = &mut self.words[index / 64];
        let was_set = word.is_set(index % 64);
        *word = word.with_cleared(index % 64);
        was_set
    }

    /// Whether bit `index` is set. Out-of-range indices read as clear.
    pub fn is_set(&self, index: usize) -> bool {
        index < self.len && self.words[index / 64].is_set(index % 64)
    }

    /// Number of set bits.
    pub fn count_set(&self) -> usize {
        self.words.iter().map(|w| w.count_set()).sum()
    }
}
