//! Self-checking duplicated storage for reset-surviving state.
//!
//! A [`Duplicated`] cell stores a value next to its bitwise inverse. The pair
//! is intact while `value ^ inverse` is all ones; any single corrupted bit in
//! either half breaks that, and a read then yields `None` instead of the raw
//! (possibly corrupt) value.
//!
//! On the target the cells live in a `.noinit` section: the startup code does
//! not zero them, so they survive a watchdog reset, and their content after a
//! power-on reset is arbitrary (and almost always fails the check).
//!
//! ```
//! use platform::Duplicated;
//!
//! let mut cell: Duplicated<u8> = Duplicated::new(0x7E);
//! assert_eq!(cell.read(), Some(0x7E));
//! cell.commit(0xBD);
//! assert_eq!(cell.read(), Some(0xBD));
//! ```

use core::marker::PhantomData;
use core::ops::{BitXor, Not};

/// Unsigned word a persistent code is stored as.
pub trait RawWord: Copy + Eq + Not<Output = Self> + BitXor<Output = Self> {
    /// Every bit set.
    const ALL_ONES: Self;
}

impl RawWord for u8 {
    const ALL_ONES: Self = u8::MAX;
}

impl RawWord for u16 {
    const ALL_ONES: Self = u16::MAX;
}

impl RawWord for u32 {
    const ALL_ONES: Self = u32::MAX;
}

/// A type with a fixed raw encoding that can be persisted in a [`Duplicated`]
/// cell.
pub trait PersistentCode: Copy {
    /// Storage word.
    type Raw: RawWord;

    /// Raw encoding.
    fn encode(self) -> Self::Raw;

    /// Decode a raw word, `None` when it is not a valid encoding.
    fn decode(raw: Self::Raw) -> Option<Self>;
}

impl PersistentCode for u8 {
    type Raw = u8;

    fn encode(self) -> u8 {
        self
    }

    fn decode(raw: u8) -> Option<Self> {
        Some(raw)
    }
}

impl PersistentCode for u16 {
    type Raw = u16;

    fn encode(self) -> u16 {
        self
    }

    fn decode(raw: u16) -> Option<Self> {
        Some(raw)
    }
}

impl PersistentCode for u32 {
    type Raw = u32;

    fn encode(self) -> u32 {
        self
    }

    fn decode(raw: u32) -> Option<Self> {
        Some(raw)
    }
}

/// Value stored alongside its bitwise inverse.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct Duplicated<T: PersistentCode> {
    value: T::Raw,
    inverse: T::Raw,
    _code: PhantomData<T>,
}

impl<T: PersistentCode> Duplicated<T> {
    /// Cell holding `value`.
    pub fn new(value: T) -> Self {
        let raw = value.encode();
        Self {
            value: raw,
            inverse: !raw,
            _code: PhantomData,
        }
    }

    /// Cell built from raw halves, for `static` initialisers and for
    /// modelling whatever a power-on left in `.noinit` memory.
    pub const fn from_raw_parts(value: T::Raw, inverse: T::Raw) -> Self {
        Self {
            value,
            inverse,
            _code: PhantomData,
        }
    }

    /// Write `value` and its inverse.
    pub fn commit(&mut self, value: T) {
        let raw = value.encode();
        self.value = raw;
        self.inverse = !raw;
    }

    /// `true` when `value ^ inverse` is all ones.
    pub fn is_intact(&self) -> bool {
        (self.value ^ self.inverse) == T::Raw::ALL_ONES
    }

    /// Checked read: `None` when the pair is broken or the stored word is not
    /// a valid code.
    pub fn read(&self) -> Option<T> {
        if self.is_intact() {
            T::decode(self.value)
        } else {
            None
        }
    }

    /// Checked read; on failure `fallback` is committed and returned so the
    /// cell is self-consistent again.
    pub fn read_or_commit(&mut self, fallback: T) -> T {
        match self.read() {
            Some(v) => v,
            None => {
                self.commit(fallback);
                fallback
            }
        }
    }

    /// Raw halves `(value, inverse)` as stored.
    pub fn raw_parts(&self) -> (T::Raw, T::Raw) {
        (self.value, self.inverse)
    }

    /// Flip bits of the stored value without touching the inverse.
    #[cfg(any(test, feature = "std"))]
    pub fn corrupt_value(&mut self, mask: T::Raw) {
        self.value = self.value ^ mask;
    }

    /// Flip bits of the stored inverse without touching the value.
    #[cfg(any(test, feature = "std"))]
    pub fn corrupt_inverse(&mut self, mask: T::Raw) {
        self.inverse = self.inverse ^ mask;
    }
}

impl<T: PersistentCode> core::fmt::Debug for Duplicated<T>
where
    T::Raw: core::fmt::LowerHex,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Duplicated")
            .field("value", &format_args!("{:#x}", self.value))
            .field("inverse", &format_args!("{:#x}", self.inverse))
            .finish()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Phase {
        Idle,
        Armed,
    }

    impl PersistentCode for Phase {
        type Raw = u8;
        fn encode(self) -> u8 {
            match self {
                Phase::Idle => 0x3C,
                Phase::Armed => 0xC3,
            }
        }
        fn decode(raw: u8) -> Option<Self> {
            match raw {
                0x3C => Some(Phase::Idle),
                0xC3 => Some(Phase::Armed),
                _ => None,
            }
        }
    }

    #[test]
    fn new_cell_is_intact() {
        let c = Duplicated::new(Phase::Armed);
        assert!(c.is_intact());
        assert_eq!(c.read(), Some(Phase::Armed));
        assert_eq!(c.raw_parts(), (0xC3, 0x3C));
    }

    #[test]
    fn corrupted_value_reads_none() {
        let mut c = Duplicated::new(Phase::Idle);
        c.corrupt_value(0x01);
        assert!(!c.is_intact());
        assert_eq!(c.read(), None);
    }

    #[test]
    fn corrupted_inverse_reads_none() {
        let mut c = Duplicated::new(Phase::Idle);
        c.corrupt_inverse(0x80);
        assert_eq!(c.read(), None);
    }

    #[test]
    fn intact_but_unknown_code_reads_none() {
        let c: Duplicated<Phase> = Duplicated::from_raw_parts(0x00, 0xFF);
        assert!(c.is_intact());
        assert_eq!(c.read(), None);
    }

    #[test]
    fn read_or_commit_repairs_the_pair() {
        let mut c = Duplicated::new(Phase::Armed);
        c.corrupt_value(0x10);
        assert_eq!(c.read_or_commit(Phase::Idle), Phase::Idle);
        assert_eq!(c.read(), Some(Phase::Idle));
    }

    #[test]
    fn wide_words_use_full_width_inverse() {
        let c = Duplicated::new(0x1234_u16);
        assert_eq!(c.raw_parts(), (0x1234, 0xEDCB));
        let w = Duplicated::new(0xDEAD_BEEF_u32);
        assert_eq!(w.raw_parts().1, 0x2152_4110);
    }

    proptest::proptest! {
        #[test]
        fn any_nonzero_corruption_is_detected(v: u8, mask in 1u8..=255, hit_value: bool) {
            let mut c = Duplicated::new(v);
            if hit_value {
                c.corrupt_value(mask);
            } else {
                c.corrupt_inverse(mask);
            }
            proptest::prop_assert_eq!(c.read(), None);
        }
    }
}
