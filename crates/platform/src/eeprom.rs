//! Byte-programmed data EEPROM and the NVM controller error type.

use crate::memory::MemoryBounds;

/// Error reported by a non-volatile write or erase path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror_no_std::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NvmError {
    /// The access falls outside the memory.
    #[error("address {addr:#x} outside the memory")]
    OutOfBounds {
        /// Offending address.
        addr: u32,
    },
    /// The access is not aligned to the controller's write/erase granularity.
    #[error("address {addr:#x} not aligned for the NVM controller")]
    Unaligned {
        /// Offending address.
        addr: u32,
    },
    /// The controller flagged an error after a write or erase.
    #[error("NVM controller error at {addr:#x}")]
    Controller {
        /// Address of the failed operation.
        addr: u32,
    },
    /// The byte read back after programming differs from the byte written.
    #[error("read-back at {addr:#x}: wrote {expected:#x}, found {found:#x}")]
    VerifyMismatch {
        /// Programmed address.
        addr: u32,
        /// Byte written.
        expected: u8,
        /// Byte read back.
        found: u8,
    },
    /// The flash erase page does not fit the read-modify-write buffer.
    #[error("flash page of {page_size} bytes exceeds the merge buffer")]
    PageTooLarge {
        /// Erase-page size reported by the driver.
        page_size: usize,
    },
}

/// NVM controller status after the last operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NvmStatus {
    /// Last operation completed without error.
    Ready,
    /// Last operation failed; cleared by [`EepromMemory::clear_status`].
    Error,
}

/// Data EEPROM programmed one byte at a time.
pub trait EepromMemory {
    /// Bounds of the EEPROM in the data address space.
    fn eeprom_bounds(&self) -> MemoryBounds;

    /// Read one byte.
    fn read_byte(&self, addr: u32) -> u8;

    /// Start programming one byte. Completion is signalled by
    /// [`EepromMemory::is_busy`] going low.
    fn start_write(&mut self, addr: u32, value: u8);

    /// `true` while a write is in progress.
    fn is_busy(&self) -> bool;

    /// Controller status of the last completed operation.
    fn status(&self) -> NvmStatus;

    /// Clear a latched error status.
    fn clear_status(&mut self);

    /// Program one byte, wait for completion, check the controller status and
    /// verify by read-back.
    fn write_verified(&mut self, addr: u32, value: u8) -> Result<(), NvmError> {
        if !self.eeprom_bounds().contains(addr) {
            return Err(NvmError::OutOfBounds { addr });
        }
        self.start_write(addr, value);
        while self.is_busy() {
            core::hint::spin_loop();
        }
        if self.status() == NvmStatus::Error {
            self.clear_status();
            return Err(NvmError::Controller { addr });
        }
        let found = self.read_byte(addr);
        if found != value {
            return Err(NvmError::VerifyMismatch {
                addr,
                expected: value,
                found,
            });
        }
        Ok(())
    }
}
