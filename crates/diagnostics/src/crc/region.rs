//! Checksumming address ranges of flash and EEPROM.
//!
//! Checksums are stored most-significant byte first at the store address,
//! the layout the image tooling patches into flash at build time.
//!
//! [`CrcRegionConfig::validate_on`] and [`CrcRegionConfig::store_on`] run a
//! configured region against the whole device with interrupts off; the
//! [`CrcIntegrity`] methods take a bare port and leave masking to the caller.

use embedded_storage::nor_flash::NorFlash;
use platform::{
    flash, AddressRange, DiagnosticsHal, EepromMemory, InterruptFreeSection, MemoryBounds,
    MemorySpace, NvmError,
};

use super::{Crc, CrcAlgorithm, CrcParams};
use crate::config::CrcRegionConfig;
use crate::log::{diag_error, diag_warn};
use crate::verdict::Verdict;

/// Bytes read per chunk while checksumming.
const READ_CHUNK: usize = 64;

/// A non-volatile memory as seen by the CRC engine.
pub trait ChecksumMemory {
    /// Memory space, for diagnostics.
    fn space(&self) -> MemorySpace;

    /// Addressable bounds; `None` for a memory the engine cannot address.
    fn bounds(&self) -> Option<MemoryBounds>;

    /// Read `buf.len()` bytes at `addr`.
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), NvmError>;

    /// Program `bytes` at `addr` and confirm they stuck.
    fn store(&mut self, addr: u32, bytes: &[u8]) -> Result<(), NvmError>;
}

// ── Flash ────────────────────────────────────────────────────────────────────

/// Program flash through a [`NorFlash`] driver.
pub struct FlashPort<'a, F> {
    flash: &'a mut F,
}

impl<'a, F: NorFlash> FlashPort<'a, F> {
    /// Wrap a flash driver.
    pub fn new(flash: &'a mut F) -> Self {
        Self { flash }
    }
}

impl<F: NorFlash> ChecksumMemory for FlashPort<'_, F> {
    fn space(&self) -> MemorySpace {
        MemorySpace::Flash
    }

    fn bounds(&self) -> Option<MemoryBounds> {
        flash::flash_bounds(&*self.flash)
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), NvmError> {
        flash::read(self.flash, addr, buf)
    }

    /// Read-page, merge, erase, rewrite; then read back.
    fn store(&mut self, addr: u32, bytes: &[u8]) -> Result<(), NvmError> {
        flash::program(self.flash, addr, bytes)?;
        let mut readback = [0u8; 4];
        let slot = readback
            .get_mut(..bytes.len())
            .ok_or(NvmError::OutOfBounds { addr })?;
        flash::read(self.flash, addr, slot)?;
        match (addr..).zip(slot.iter().zip(bytes)).find(|(_, (f, e))| f != e) {
            Some((a, (&found, &expected))) => Err(NvmError::VerifyMismatch {
                addr: a,
                expected,
                found,
            }),
            None => Ok(()),
        }
    }
}

// ── EEPROM ───────────────────────────────────────────────────────────────────

/// Data EEPROM programmed byte by byte.
pub struct EepromPort<'a, E> {
    eeprom: &'a mut E,
}

impl<'a, E: EepromMemory> EepromPort<'a, E> {
    /// Wrap an EEPROM driver.
    pub fn new(eeprom: &'a mut E) -> Self {
        Self { eeprom }
    }
}

impl<E: EepromMemory> ChecksumMemory for EepromPort<'_, E> {
    fn space(&self) -> MemorySpace {
        MemorySpace::Eeprom
    }

    fn bounds(&self) -> Option<MemoryBounds> {
        Some(self.eeprom.eeprom_bounds())
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), NvmError> {
        for (a, b) in (addr..).zip(buf.iter_mut()) {
            *b = self.eeprom.read_byte(a);
        }
        Ok(())
    }

    /// Least-significant byte (highest address) first, each one
    /// write-wait-verified.
    fn store(&mut self, addr: u32, bytes: &[u8]) -> Result<(), NvmError> {
        for (offset, &b) in bytes.iter().enumerate().rev() {
            let a = u32::try_from(offset)
                .ok()
                .and_then(|o| addr.checked_add(o))
                .ok_or(NvmError::OutOfBounds { addr })?;
            self.eeprom.write_verified(a, b)?;
        }
        Ok(())
    }
}

// ── Engine ───────────────────────────────────────────────────────────────────

/// CRC engine bound to one parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CrcIntegrity {
    params: CrcParams,
    algorithm: CrcAlgorithm,
}

impl CrcIntegrity {
    /// Engine for `params`.
    pub const fn new(params: CrcParams, algorithm: CrcAlgorithm) -> Self {
        Self { params, algorithm }
    }

    /// Parameter set in use.
    pub const fn params(&self) -> CrcParams {
        self.params
    }

    /// Compute the checksum of `region` and store it at `store_addr`.
    ///
    /// Returns [`Verdict::Pass`] once the stored bytes verify,
    /// [`Verdict::InvalidArgument`] for a bad region or store address, and
    /// [`Verdict::NonVolatileStoreError`] when reading, erasing or writing
    /// fails.
    pub fn calculate_and_store<M: ChecksumMemory>(
        &self,
        mem: &mut M,
        region: AddressRange,
        store_addr: u32,
    ) -> Verdict {
        if let Err(v) = self.check_arguments(mem, region, store_addr) {
            return v;
        }
        let crc = match self.compute(mem, region) {
            Ok(crc) => crc,
            Err(e) => return self.store_failure(mem.space(), e),
        };
        let encoded = self.encode(crc);
        let Some(bytes) = encoded.get(..self.width_bytes()) else {
            return Verdict::InvalidArgument;
        };
        match mem.store(store_addr, bytes) {
            Ok(()) => Verdict::Pass,
            Err(e) => self.store_failure(mem.space(), e),
        }
    }

    /// Recompute the checksum of `region` and compare it with the one stored
    /// at `ref_addr`.
    pub fn validate<M: ChecksumMemory>(
        &self,
        mem: &mut M,
        region: AddressRange,
        ref_addr: u32,
    ) -> Verdict {
        if let Err(v) = self.check_arguments(mem, region, ref_addr) {
            return v;
        }
        let computed = match self.compute(mem, region) {
            Ok(crc) => crc,
            Err(e) => return self.store_failure(mem.space(), e),
        };
        let mut stored = [0u8; 4];
        let Some(slot) = stored.get_mut(..self.width_bytes()) else {
            return Verdict::InvalidArgument;
        };
        if let Err(e) = mem.read(ref_addr, slot) {
            return self.store_failure(mem.space(), e);
        }
        let reference = slot.iter().fold(0u32, |acc, &b| acc.wrapping_shl(8) | u32::from(b));
        if reference == computed {
            Verdict::Pass
        } else {
            diag_warn!(
                "{} {}: computed {:#x}, stored {:#x}",
                mem.space().as_str(),
                self.params.as_str(),
                computed,
                reference
            );
            Verdict::Fail
        }
    }

    /// Checksum of `region` without touching the stored value.
    pub fn compute<M: ChecksumMemory>(
        &self,
        mem: &mut M,
        region: AddressRange,
    ) -> Result<u32, NvmError> {
        let mut crc = Crc::new(self.params, self.algorithm);
        let mut buf = [0u8; READ_CHUNK];
        let mut addr = region.start;
        let mut remaining = region.length;
        while remaining > 0 {
            let take = remaining.min(READ_CHUNK as u32);
            let chunk = buf
                .get_mut(..take as usize)
                .ok_or(NvmError::OutOfBounds { addr })?;
            mem.read(addr, chunk)?;
            crc.update(chunk);
            addr = addr.wrapping_add(take);
            remaining = remaining.saturating_sub(take);
        }
        Ok(crc.finalize())
    }

    fn check_arguments<M: ChecksumMemory>(
        &self,
        mem: &M,
        region: AddressRange,
        store_addr: u32,
    ) -> Result<(), Verdict> {
        let width = self.params.width.bytes();
        let space = mem.space().as_str();
        let Some(bounds) = mem.bounds() else {
            diag_warn!("{}: memory bounds unavailable", space);
            return Err(Verdict::InvalidArgument);
        };
        if region.is_empty() || !bounds.contains_range(region) {
            diag_warn!(
                "{}: region {:#x}+{:#x} empty or outside memory",
                space,
                region.start,
                region.length
            );
            return Err(Verdict::InvalidArgument);
        }
        if region.overlaps_span(store_addr, width) || !bounds.contains_span(store_addr, width) {
            diag_warn!("{}: checksum address {:#x} rejected", space, store_addr);
            return Err(Verdict::InvalidArgument);
        }
        Ok(())
    }

    /// Big-endian bytes, left-aligned so the first `width` bytes are the
    /// checksum.
    fn encode(&self, crc: u32) -> [u8; 4] {
        let unused_bits = 32u32.saturating_sub(self.params.width.bits());
        crc.wrapping_shl(unused_bits).to_be_bytes()
    }

    fn width_bytes(&self) -> usize {
        self.params.width.bytes() as usize
    }

    fn store_failure(&self, space: MemorySpace, err: NvmError) -> Verdict {
        diag_error!("{} {}: {}", space.as_str(), self.params.as_str(), err);
        Verdict::from(err)
    }
}

// ── Device entry points ──────────────────────────────────────────────────────

impl CrcRegionConfig {
    /// Check the stored checksum of this region on `hal`, interrupts masked.
    pub fn validate_on<H: DiagnosticsHal>(&self, hal: &mut H) -> Verdict {
        let engine = self.engine();
        let mut section = InterruptFreeSection::enter(hal);
        match self.space {
            MemorySpace::Flash => engine.validate(
                &mut FlashPort::new(section.flash()),
                self.region,
                self.store_addr,
            ),
            MemorySpace::Eeprom => engine.validate(
                &mut EepromPort::new(section.eeprom()),
                self.region,
                self.store_addr,
            ),
            MemorySpace::Data => self.not_checksummable(),
        }
    }

    /// Compute and store the checksum of this region on `hal`, interrupts
    /// masked.
    pub fn store_on<H: DiagnosticsHal>(&self, hal: &mut H) -> Verdict {
        let engine = self.engine();
        let mut section = InterruptFreeSection::enter(hal);
        match self.space {
            MemorySpace::Flash => engine.calculate_and_store(
                &mut FlashPort::new(section.flash()),
                self.region,
                self.store_addr,
            ),
            MemorySpace::Eeprom => engine.calculate_and_store(
                &mut EepromPort::new(section.eeprom()),
                self.region,
                self.store_addr,
            ),
            MemorySpace::Data => self.not_checksummable(),
        }
    }

    fn not_checksummable(&self) -> Verdict {
        diag_warn!("{}: not a checksummed memory", self.space.as_str());
        Verdict::InvalidArgument
    }
}
