//! Simulated program flash and data EEPROM.

use core::cell::Cell;

use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};

use crate::eeprom::{EepromMemory, NvmStatus};
use crate::memory::MemoryBounds;

/// Erase-page size of the simulated flash (matches the 64 KiB AVR EA parts).
pub const SIM_FLASH_PAGE_SIZE: usize = 512;

// ── Flash ────────────────────────────────────────────────────────────────────

/// Error returned by [`SimulatedFlash`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimFlashError(pub NorFlashErrorKind);

impl NorFlashError for SimFlashError {
    fn kind(&self) -> NorFlashErrorKind {
        self.0
    }
}

/// NOR flash: erase sets a page to 0xFF, writes can only clear bits.
pub struct SimulatedFlash {
    data: Vec<u8>,
    /// Fail every erase with a controller error.
    pub fail_erase: bool,
    /// Fail every write with a controller error.
    pub fail_write: bool,
    erases: usize,
    writes: usize,
}

impl SimulatedFlash {
    /// Erased flash of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0xFF; size],
            fail_erase: false,
            fail_write: false,
            erases: 0,
            writes: 0,
        }
    }

    /// Load an image at `offset`, bypassing NOR semantics.
    pub fn load(&mut self, offset: usize, image: &[u8]) {
        let end = offset.saturating_add(image.len()).min(self.data.len());
        if let (Some(dst), Some(src)) = (
            self.data.get_mut(offset..end),
            image.get(..end.saturating_sub(offset)),
        ) {
            dst.copy_from_slice(src);
        }
    }

    /// Whole flash content.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Flip one bit in place, modelling a retention fault.
    pub fn flip_bit(&mut self, addr: usize, bit: u8) {
        if let Some(b) = self.data.get_mut(addr) {
            *b ^= 1u8.checked_shl(u32::from(bit)).unwrap_or(0);
        }
    }

    /// Number of page erases performed.
    pub fn erase_count(&self) -> usize {
        self.erases
    }

    /// Number of write operations performed.
    pub fn write_count(&self) -> usize {
        self.writes
    }

    fn span(&self, offset: u32, len: usize) -> Result<core::ops::Range<usize>, SimFlashError> {
        let start = usize::try_from(offset)
            .map_err(|_| SimFlashError(NorFlashErrorKind::OutOfBounds))?;
        let end = start
            .checked_add(len)
            .filter(|&e| e <= self.data.len())
            .ok_or(SimFlashError(NorFlashErrorKind::OutOfBounds))?;
        Ok(start..end)
    }
}

impl ErrorType for SimulatedFlash {
    type Error = SimFlashError;
}

impl ReadNorFlash for SimulatedFlash {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let span = self.span(offset, bytes.len())?;
        let src = self
            .data
            .get(span)
            .ok_or(SimFlashError(NorFlashErrorKind::OutOfBounds))?;
        bytes.copy_from_slice(src);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl NorFlash for SimulatedFlash {
    const WRITE_SIZE: usize = 1;
    const ERASE_SIZE: usize = SIM_FLASH_PAGE_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        let page = SIM_FLASH_PAGE_SIZE as u32;
        if from.checked_rem(page) != Some(0) || to.checked_rem(page) != Some(0) || to < from {
            return Err(SimFlashError(NorFlashErrorKind::NotAligned));
        }
        if self.fail_erase {
            return Err(SimFlashError(NorFlashErrorKind::Other));
        }
        let span = self.span(from, (to.wrapping_sub(from)) as usize)?;
        if let Some(pages) = self.data.get_mut(span) {
            pages.iter_mut().for_each(|b| *b = 0xFF);
        }
        self.erases = self.erases.saturating_add(1);
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        if self.fail_write {
            return Err(SimFlashError(NorFlashErrorKind::Other));
        }
        let span = self.span(offset, bytes.len())?;
        if let Some(dst) = self.data.get_mut(span) {
            dst.iter_mut().zip(bytes).for_each(|(d, s)| *d &= *s);
        }
        self.writes = self.writes.saturating_add(1);
        Ok(())
    }
}

// ── EEPROM ───────────────────────────────────────────────────────────────────

/// Byte-programmed EEPROM, erased (0xFF) at construction.
pub struct SimulatedEeprom {
    bounds: MemoryBounds,
    data: Vec<u8>,
    busy_polls: Cell<u32>,
    status: NvmStatus,
    /// Polls `is_busy` reports `true` after each write starts.
    pub write_latency_polls: u32,
    /// Latch a controller error on every write and leave the byte unchanged.
    pub fail_writes: bool,
    /// Silently drop writes (controller reports success).
    pub drop_writes: bool,
    writes: usize,
}

impl SimulatedEeprom {
    /// Erased EEPROM covering `bounds`.
    pub fn new(bounds: MemoryBounds) -> Self {
        Self {
            bounds,
            data: vec![0xFF; bounds.len() as usize],
            busy_polls: Cell::new(0),
            status: NvmStatus::Ready,
            write_latency_polls: 3,
            fail_writes: false,
            drop_writes: false,
            writes: 0,
        }
    }

    /// Load bytes at absolute address `addr`, bypassing the controller.
    pub fn load(&mut self, addr: u32, bytes: &[u8]) {
        for (a, b) in (addr..).zip(bytes) {
            if let Some(slot) = self.slot_mut(a) {
                *slot = *b;
            }
        }
    }

    /// Flip one bit in place.
    pub fn flip_bit(&mut self, addr: u32, bit: u8) {
        if let Some(slot) = self.slot_mut(addr) {
            *slot ^= 1u8.checked_shl(u32::from(bit)).unwrap_or(0);
        }
    }

    /// Number of byte writes started.
    pub fn write_count(&self) -> usize {
        self.writes
    }

    fn slot_mut(&mut self, addr: u32) -> Option<&mut u8> {
        if !self.bounds.contains(addr) {
            return None;
        }
        let i = usize::try_from(addr.wrapping_sub(self.bounds.first())).ok()?;
        self.data.get_mut(i)
    }
}

impl EepromMemory for SimulatedEeprom {
    fn eeprom_bounds(&self) -> MemoryBounds {
        self.bounds
    }

    fn read_byte(&self, addr: u32) -> u8 {
        if !self.bounds.contains(addr) {
            return 0xFF;
        }
        usize::try_from(addr.wrapping_sub(self.bounds.first()))
            .ok()
            .and_then(|i| self.data.get(i).copied())
            .unwrap_or(0xFF)
    }

    fn start_write(&mut self, addr: u32, value: u8) {
        self.writes = self.writes.saturating_add(1);
        self.busy_polls.set(self.write_latency_polls);
        if self.fail_writes {
            self.status = NvmStatus::Error;
            return;
        }
        if self.drop_writes {
            return;
        }
        match self.slot_mut(addr) {
            Some(slot) => *slot = value,
            None => self.status = NvmStatus::Error,
        }
    }

    fn is_busy(&self) -> bool {
        let left = self.busy_polls.get();
        if left == 0 {
            false
        } else {
            self.busy_polls.set(left.saturating_sub(1));
            true
        }
    }

    fn status(&self) -> NvmStatus {
        self.status
    }

    fn clear_status(&mut self) {
        self.status = NvmStatus::Ready;
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
    use crate::eeprom::NvmError;
    use crate::flash;

    #[test]
    fn program_patches_without_disturbing_the_page() {
        let mut f = SimulatedFlash::new(4 * SIM_FLASH_PAGE_SIZE);
        let image: Vec<u8> = (0..f.capacity()).map(|i| (i % 251) as u8).collect();
        f.load(0, &image);

        flash::program(&mut f, 0x3FC, &[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();

        let bytes = f.bytes();
        assert_eq!(&bytes[0x3FC..0x400], &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(&bytes[0x200..0x3FC], &image[0x200..0x3FC]);
        assert_eq!(&bytes[0x400..], &image[0x400..]);
        assert_eq!(f.erase_count(), 1);
    }

    #[test]
    fn program_spanning_two_pages_erases_both() {
        let mut f = SimulatedFlash::new(2 * SIM_FLASH_PAGE_SIZE);
        flash::program(&mut f, 0x1FE, &[1, 2, 3, 4]).unwrap();
        assert_eq!(&f.bytes()[0x1FE..0x202], &[1, 2, 3, 4]);
        assert_eq!(f.erase_count(), 2);
    }

    #[test]
    fn program_reports_erase_failure() {
        let mut f = SimulatedFlash::new(SIM_FLASH_PAGE_SIZE);
        f.fail_erase = true;
        let err = flash::program(&mut f, 0, &[0]).unwrap_err();
        assert_eq!(err, NvmError::Controller { addr: 0 });
    }

    #[test]
    fn program_rejects_out_of_range() {
        let mut f = SimulatedFlash::new(SIM_FLASH_PAGE_SIZE);
        assert!(matches!(
            flash::program(&mut f, 0x1FF, &[0, 0]),
            Err(NvmError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn erase_rejects_unaligned_pages() {
        let mut f = SimulatedFlash::new(2 * SIM_FLASH_PAGE_SIZE);
        let page = SIM_FLASH_PAGE_SIZE as u32;
        assert_eq!(
            f.erase(1, page),
            Err(SimFlashError(NorFlashErrorKind::NotAligned))
        );
        assert_eq!(
            f.erase(page, page - 1),
            Err(SimFlashError(NorFlashErrorKind::NotAligned))
        );
        assert_eq!(f.erase(0, 2 * page), Ok(()));
        assert_eq!(f.erase_count(), 1);
    }

    #[test]
    fn eeprom_write_verified_waits_and_checks() {
        let mut e = SimulatedEeprom::new(MemoryBounds::new(0x1400, 0x15FF));
        e.write_verified(0x1410, 0x5A).unwrap();
        assert_eq!(e.read_byte(0x1410), 0x5A);
        assert!(!e.is_busy());
    }

    #[test]
    fn eeprom_controller_error_is_reported_and_cleared() {
        let mut e = SimulatedEeprom::new(MemoryBounds::new(0x1400, 0x15FF));
        e.fail_writes = true;
        assert_eq!(
            e.write_verified(0x1400, 0x01),
            Err(NvmError::Controller { addr: 0x1400 })
        );
        assert_eq!(e.status(), NvmStatus::Ready);
    }

    #[test]
    fn eeprom_dropped_write_fails_verification() {
        let mut e = SimulatedEeprom::new(MemoryBounds::new(0x1400, 0x15FF));
        e.drop_writes = true;
        assert_eq!(
            e.write_verified(0x1400, 0x01),
            Err(NvmError::VerifyMismatch {
                addr: 0x1400,
                expected: 0x01,
                found: 0xFF
            })
        );
    }
}
