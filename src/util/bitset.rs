//! A dense bitset over `{0, .., 63}` and the subset enumerators built on it.
//!
//! `SmallBitset` is the sole set type used by the plan enumerators: a
//! subproblem of the join ordering DP is a set of data source ids encoded in
//! one machine word.

use std::fmt;
use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Sub, SubAssign};

/// A set over the elements `0` to `63`, backed by a single `u64`.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SmallBitset(u64);

impl SmallBitset {
    /// Maximum number of elements a `SmallBitset` can hold.
    pub const CAPACITY: usize = 64;

    /// The empty set.
    pub const fn empty() -> Self {
        SmallBitset(0)
    }

    /// The set `{i}`.
    pub const fn singleton(i: usize) -> Self {
        assert!(i < Self::CAPACITY);
        SmallBitset(1 << i)
    }

    /// The set `{0, .., n-1}`.
    pub const fn all(n: usize) -> Self {
        assert!(n <= Self::CAPACITY);
        if n == Self::CAPACITY {
            SmallBitset(u64::MAX)
        } else {
            SmallBitset((1u64 << n) - 1)
        }
    }

    pub const fn from_raw(bits: u64) -> Self {
        SmallBitset(bits)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Returns `true` iff `i` is an element of this set.  Panics for
    /// `i >= 64`; this is the only error condition of the type.
    pub fn at(self, i: usize) -> bool {
        assert!(i < Self::CAPACITY, "index out of bounds");
        self.0 >> i & 1 != 0
    }

    pub fn contains(self, i: usize) -> bool {
        self.at(i)
    }

    pub fn set(&mut self, i: usize) {
        assert!(i < Self::CAPACITY, "index out of bounds");
        self.0 |= 1 << i;
    }

    pub fn clear(&mut self, i: usize) {
        assert!(i < Self::CAPACITY, "index out of bounds");
        self.0 &= !(1 << i);
    }

    pub fn set_to(&mut self, i: usize, value: bool) {
        if value {
            self.set(i);
        } else {
            self.clear(i);
        }
    }

    /// Number of elements in the set.
    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// The smallest element of the set, if any.
    pub fn least_element(self) -> Option<usize> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros() as usize)
        }
    }

    /// Returns `true` iff `self` is a subset of `other`.
    pub const fn is_subset(self, other: Self) -> bool {
        self.0 & !other.0 == 0
    }

    /// The next proper subset of `superset` after `self`, in ascending
    /// numerical order: `(self - superset) & superset`.  Starting from the
    /// empty set this enumerates all non-empty subsets and eventually wraps
    /// to the empty set again.
    pub const fn next_subset(self, superset: Self) -> Self {
        SmallBitset(self.0.wrapping_sub(superset.0) & superset.0)
    }

    /// Iterate the elements in ascending order.  O(popcount), not O(64).
    pub fn iter(self) -> Bits {
        Bits(self.0)
    }
}

/// Iterator over the set bits of a `SmallBitset`, ascending.
pub struct Bits(u64);

impl Iterator for Bits {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.0 == 0 {
            return None;
        }
        let i = self.0.trailing_zeros() as usize;
        self.0 &= self.0 - 1; // clear lowest set bit
        Some(i)
    }
}

impl IntoIterator for SmallBitset {
    type Item = usize;
    type IntoIter = Bits;

    fn into_iter(self) -> Bits {
        self.iter()
    }
}

impl BitOr for SmallBitset {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        SmallBitset(self.0 | rhs.0)
    }
}

impl BitOrAssign for SmallBitset {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for SmallBitset {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        SmallBitset(self.0 & rhs.0)
    }
}

impl BitAndAssign for SmallBitset {
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0;
    }
}

/// Set difference.
impl Sub for SmallBitset {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        SmallBitset(self.0 & !rhs.0)
    }
}

impl SubAssign for SmallBitset {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 &= !rhs.0;
    }
}

impl fmt::Debug for SmallBitset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SmallBitset({:#b})", self.0)
    }
}

impl fmt::Display for SmallBitset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (n, i) in self.iter().enumerate() {
            if n != 0 {
                write!(f, ", ")?;
            }
            write!(f, "{i}")?;
        }
        write!(f, "}}")
    }
}

/// Deposit the low bits of `src` into the positions of the set bits of
/// `mask`, lowest first.  Software rendition of the `PDEP` instruction.
fn deposit(src: u64, mask: u64) -> u64 {
    let mut result = 0;
    let mut select = 1u64;
    let mut mask = mask;
    while mask != 0 {
        let bit = mask & mask.wrapping_neg();
        if src & select != 0 {
            result |= bit;
        }
        mask ^= bit;
        select <<= 1;
    }
    result
}

/// Enumerates all subsets of size `k` of a set of `n` elements, as
/// `SmallBitset`s in strictly increasing numerical order of the underlying
/// word.
///
/// See <http://programmingforinsomniacs.blogspot.com/2018/03/gospers-hack-explained.html>.
#[derive(Clone)]
pub struct GospersHack {
    set: u64,
    limit: u64,
}

impl GospersHack {
    /// Enumerate all subsets of size `k` of a set of `n` elements.
    pub fn enumerate_all(k: usize, n: usize) -> Self {
        assert!(k <= n, "invalid enumeration");
        assert!(n < 64, "n exceeds range");
        GospersHack {
            set: (1u64 << k) - 1,
            limit: 1u64 << n,
        }
    }

    /// Enumerate all remaining subsets of a set of `n` elements, starting at
    /// subset `set`.
    pub fn enumerate_from(set: SmallBitset, n: usize) -> Self {
        assert!(n < 64, "n exceeds range");
        let limit = 1u64 << n;
        assert!(set.raw() <= limit, "set exceeds the limit");
        GospersHack {
            set: set.raw(),
            limit,
        }
    }
}

impl Iterator for GospersHack {
    type Item = SmallBitset;

    fn next(&mut self) -> Option<SmallBitset> {
        let s = self.set;
        if s >= self.limit {
            return None;
        }
        if s == 0 {
            // The empty set is its own successor; yield it exactly once.
            self.set = self.limit;
            return Some(SmallBitset::empty());
        }
        let c = s & s.wrapping_neg();
        let r = s + c;
        self.set = (((r ^ s) >> 2) / c) | r;
        Some(SmallBitset::from_raw(s))
    }
}

/// Enumerates all subsets of size `k` of an arbitrary `SmallBitset`.
///
/// Internally enumerates dense k-subsets of `{0, .., |set|-1}` with
/// [`GospersHack`] and maps them into the bits of `set` by deposit-by-mask.
pub struct SubsetEnumerator {
    set: SmallBitset,
    gh: GospersHack,
}

impl SubsetEnumerator {
    pub fn new(set: SmallBitset, k: usize) -> Self {
        assert!(set.len() >= k);
        SubsetEnumerator {
            set,
            gh: GospersHack::enumerate_all(k, set.len()),
        }
    }
}

impl Iterator for SubsetEnumerator {
    type Item = SmallBitset;

    fn next(&mut self) -> Option<SmallBitset> {
        let dense = self.gh.next()?;
        Some(SmallBitset::from_raw(deposit(dense.raw(), self.set.raw())))
    }
}
