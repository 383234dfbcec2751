//! Address ranges, memory-space bounds, and word access to data memory.
//!
//! Addresses are absolute device addresses in the space they belong to, held
//! as `u32` so one type covers 16-bit data space and 64 KiB+ program flash.
//! A [`MemoryBounds`] is inclusive at both ends (`0x6800..=0x7FFF`) because
//! the top of a space is often the last representable address.

// ── Memory spaces ────────────────────────────────────────────────────────────

/// Memory spaces a diagnostic can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MemorySpace {
    /// Program flash, page-erased.
    Flash,
    /// Data EEPROM, byte-programmed.
    Eeprom,
    /// Volatile data memory (SRAM).
    Data,
}

impl MemorySpace {
    /// Short name for log output.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Flash => "flash",
            Self::Eeprom => "eeprom",
            Self::Data => "sram",
        }
    }
}

impl core::fmt::Display for MemorySpace {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── MemoryBounds ─────────────────────────────────────────────────────────────

/// Inclusive address bounds of one memory space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MemoryBounds {
    first: u32,
    last: u32,
}

impl MemoryBounds {
    /// Bounds covering `first..=last`. Swapped arguments are reordered.
    pub const fn new(first: u32, last: u32) -> Self {
        if first <= last {
            Self { first, last }
        } else {
            Self {
                first: last,
                last: first,
            }
        }
    }

    /// Bounds of `len` bytes starting at `start`, or `None` when `len` is zero
    /// or the space would wrap past `u32::MAX`.
    pub const fn from_start_len(start: u32, len: u32) -> Option<Self> {
        if len == 0 {
            return None;
        }
        match start.checked_add(len.saturating_sub(1)) {
            Some(last) => Some(Self { first: start, last }),
            None => None,
        }
    }

    /// Lowest valid address.
    pub const fn first(&self) -> u32 {
        self.first
    }

    /// Highest valid address.
    pub const fn last(&self) -> u32 {
        self.last
    }

    /// Number of addresses in the space (saturates for a full 4 GiB space).
    pub const fn len(&self) -> u32 {
        self.last.saturating_sub(self.first).saturating_add(1)
    }

    /// A bounds value is never empty; present for API symmetry with slices.
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// `true` when `addr` lies inside the space.
    pub const fn contains(&self, addr: u32) -> bool {
        addr >= self.first && addr <= self.last
    }

    /// `true` when every address of a non-empty `range` lies inside the space.
    pub const fn contains_range(&self, range: AddressRange) -> bool {
        match range.last() {
            Some(last) => range.start >= self.first && last <= self.last,
            None => false,
        }
    }

    /// `true` when a `width`-byte object at `addr` lies inside the space.
    pub const fn contains_span(&self, addr: u32, width: u32) -> bool {
        self.contains_range(AddressRange::new(addr, width))
    }
}

// ── AddressRange ─────────────────────────────────────────────────────────────

/// Half-open span `[start, start + length)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AddressRange {
    /// First address in the span.
    pub start: u32,
    /// Number of addresses in the span.
    pub length: u32,
}

impl AddressRange {
    /// Span of `length` addresses starting at `start`.
    pub const fn new(start: u32, length: u32) -> Self {
        Self { start, length }
    }

    /// `true` for a zero-length span.
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// One past the last address, `None` on overflow.
    pub const fn end(&self) -> Option<u32> {
        self.start.checked_add(self.length)
    }

    /// Last address, `None` for an empty span or on overflow.
    pub const fn last(&self) -> Option<u32> {
        if self.length == 0 {
            return None;
        }
        self.start.checked_add(self.length.saturating_sub(1))
    }

    /// `true` when a `width`-byte object at `addr` shares any address with
    /// this span.
    pub const fn overlaps_span(&self, addr: u32, width: u32) -> bool {
        if self.length == 0 || width == 0 {
            return false;
        }
        let object_last = addr.saturating_add(width.saturating_sub(1));
        let end = self.start.saturating_add(self.length);
        object_last >= self.start && addr < end
    }
}

// ── Data memory access ───────────────────────────────────────────────────────

/// Word access to volatile data memory.
///
/// The word is a byte on the target class; bits are not individually
/// addressable. Accesses outside [`DataMemory::data_bounds`] are a caller bug:
/// implementations return `0` on read and drop the write.
pub trait DataMemory {
    /// Bounds of the whole data space.
    fn data_bounds(&self) -> MemoryBounds;

    /// Read one word.
    fn read_word(&self, addr: u32) -> u8;

    /// Write one word.
    fn write_word(&mut self, addr: u32, value: u8);
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

    #[test]
    fn bounds_from_start_len_matches_inclusive_end() {
        let b = MemoryBounds::from_start_len(0x6800, 0x1800).unwrap();
        assert_eq!(b.first(), 0x6800);
        assert_eq!(b.last(), 0x7FFF);
        assert_eq!(b.len(), 0x1800);
    }

    #[test]
    fn bounds_from_zero_len_is_none() {
        assert!(MemoryBounds::from_start_len(0x1400, 0).is_none());
    }

    #[test]
    fn bounds_new_reorders_swapped_arguments() {
        let b = MemoryBounds::new(0x15FF, 0x1400);
        assert_eq!((b.first(), b.last()), (0x1400, 0x15FF));
    }

    #[test]
    fn range_containment_respects_both_ends() {
        let eeprom = MemoryBounds::new(0x1400, 0x15FF);
        assert!(eeprom.contains_range(AddressRange::new(0x1400, 0x200)));
        assert!(!eeprom.contains_range(AddressRange::new(0x1400, 0x201)));
        assert!(!eeprom.contains_range(AddressRange::new(0x13FF, 2)));
        assert!(!eeprom.contains_range(AddressRange::new(0x1400, 0)));
    }

    #[test]
    fn span_overlap_includes_partial_tail() {
        let region = AddressRange::new(0x100, 0x10);
        // Store starting three bytes before the region still touches it.
        assert!(region.overlaps_span(0x0FD, 4));
        assert!(!region.overlaps_span(0x0FC, 4));
        assert!(region.overlaps_span(0x10F, 4));
        assert!(!region.overlaps_span(0x110, 4));
    }

    #[test]
    fn extreme_bounds_saturate_instead_of_wrapping() {
        assert_eq!(MemoryBounds::new(0, u32::MAX).len(), u32::MAX);
        assert_eq!(MemoryBounds::new(7, 7).len(), 1);
        assert!(MemoryBounds::from_start_len(u32::MAX, 2).is_none());
        assert_eq!(AddressRange::new(u32::MAX, 1).last(), Some(u32::MAX));
        assert!(!AddressRange::new(0, 4).overlaps_span(u32::MAX - 1, 8));
        assert!(!AddressRange::new(0x10, 4).overlaps_span(0x10, 0));
    }
}
