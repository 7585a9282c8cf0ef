//! Fragment positions and the 64-bit bitmaps that track them.
//!
//! The acknowledgement wire format carries a single `u64`, so a message can
//! be split into at most [`MAX_FRAGMENTS`] fragments. [`FragmentIndex`] and
//! [`FragmentMask`] encode that bound in their types instead of using a
//! growable bitset.

use std::fmt;

use derive_more::{Display, Into};

/// Upper bound on the number of fragments per message (ACK bitmap width).
pub const MAX_FRAGMENTS: usize = 64;

/// Zero-based position of a fragment within its message, always below
/// [`MAX_FRAGMENTS`].
///
/// # Examples
///
/// ```
/// use fragwire::fragment::FragmentIndex;
/// assert_eq!(FragmentIndex::new(63).map(FragmentIndex::get), Some(63));
/// assert!(FragmentIndex::new(64).is_none());
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display, Into)]
#[display("{_0}")]
pub struct FragmentIndex(u8);

impl FragmentIndex {
    /// Construct an index, returning `None` when `value` is outside the
    /// bitmap.
    #[must_use]
    pub fn new(value: usize) -> Option<Self> {
        if value < MAX_FRAGMENTS {
            u8::try_from(value).ok().map(Self)
        } else {
            None
        }
    }

    /// Return the first index.
    #[must_use]
    pub const fn zero() -> Self { Self(0) }

    /// Return the numeric position.
    #[must_use]
    pub const fn get(self) -> usize { self.0 as usize }

    /// Advance to the next position, wrapping from 63 back to 0.
    ///
    /// The boolean is `true` when the cursor wrapped.
    #[must_use]
    pub const fn next_wrapping(self) -> (Self, bool) {
        let next = (self.0 + 1) % (MAX_FRAGMENTS as u8);
        (Self(next), next == 0)
    }

    const fn bit(self) -> u64 { 1_u64 << self.0 }
}

/// Set of fragment positions stored as a 64-bit mask.
///
/// A set bit means "this fragment is still missing" both in the sender's
/// pending set and in acknowledgements.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FragmentMask(u64);

impl FragmentMask {
    /// The empty set.
    pub const EMPTY: Self = Self(0);

    /// Wrap raw bitmap bits.
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self { Self(bits) }

    /// Return the raw bitmap.
    #[must_use]
    pub const fn bits(self) -> u64 { self.0 }

    /// Mask with exactly `count` low bits set, or `None` when `count` exceeds
    /// [`MAX_FRAGMENTS`].
    ///
    /// # Examples
    ///
    /// ```
    /// use fragwire::fragment::FragmentMask;
    /// assert_eq!(FragmentMask::for_count(3).map(FragmentMask::bits), Some(0b111));
    /// assert_eq!(FragmentMask::for_count(64).map(FragmentMask::bits), Some(u64::MAX));
    /// assert!(FragmentMask::for_count(65).is_none());
    /// ```
    #[must_use]
    pub const fn for_count(count: usize) -> Option<Self> {
        if count == MAX_FRAGMENTS {
            Some(Self(u64::MAX))
        } else if count < MAX_FRAGMENTS {
            Some(Self((1_u64 << count) - 1))
        } else {
            None
        }
    }

    /// Whether `index` is in the set.
    #[must_use]
    pub const fn contains(self, index: FragmentIndex) -> bool { self.0 & index.bit() != 0 }

    /// Remove `index`, returning whether it was present.
    pub fn remove(&mut self, index: FragmentIndex) -> bool {
        let present = self.contains(index);
        self.0 &= !index.bit();
        present
    }

    /// Positions present in both sets.
    #[must_use]
    pub const fn intersection(self, other: Self) -> Self { Self(self.0 & other.0) }

    /// Positions present in `self` but not in `other`.
    #[must_use]
    pub const fn without(self, other: Self) -> Self { Self(self.0 & !other.0) }

    /// Number of positions in the set.
    #[must_use]
    pub const fn count(self) -> u32 { self.0.count_ones() }

    /// Whether the set is empty.
    #[must_use]
    pub const fn is_empty(self) -> bool { self.0 == 0 }

    /// Iterate over the positions in ascending order.
    pub fn iter(self) -> impl Iterator<Item = FragmentIndex> {
        (0..MAX_FRAGMENTS)
            .filter_map(FragmentIndex::new)
            .filter(move |index| self.contains(*index))
    }
}

impl fmt::Debug for FragmentMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FragmentMask({:#018x})", self.0)
    }
}

impl fmt::Display for FragmentMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (n, index) in self.iter().enumerate() {
            if n > 0 {
                f.write_str(",")?;
            }
            write!(f, "{index}")?;
        }
        f.write_str("}")
    }
}
