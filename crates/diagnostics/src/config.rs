//! Build-time configuration of every diagnostic.
//!
//! All values are fixed when the firmware image is built; [`DiagnosticsConfig::validate`]
//! rejects layouts that would make a diagnostic unsound and is meant to run
//! once at start-up (or in a unit test against the shipped constant).
//!
//! Integrators read the derived figures from here: number of SRAM sections,
//! Fault Detection Time Interval for a given call period, the deepest stack
//! the periodic SRAM test tolerates, and the accepted watchdog tick window.

use core::time::Duration;

use platform::{AddressRange, MemoryBounds, MemorySpace};

use crate::crc::{CrcAlgorithm, CrcIntegrity, CrcParams};
use crate::log::diag_warn;

// ── Errors ───────────────────────────────────────────────────────────────────

/// A configuration rule was violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror_no_std::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Checksummed region of zero length.
    #[error("{space}: checksummed region is empty")]
    EmptyRegion {
        /// Memory the region belongs to.
        space: MemorySpace,
    },
    /// Checksummed region runs past the memory.
    #[error("{space}: region {start:#x}+{length:#x} exceeds the memory")]
    RegionOutOfBounds {
        /// Memory the region belongs to.
        space: MemorySpace,
        /// First address.
        start: u32,
        /// Length in bytes.
        length: u32,
    },
    /// Checksum store address overlaps the checksummed region.
    #[error("{space}: checksum at {addr:#x} overlaps the checksummed region")]
    StoreOverlapsRegion {
        /// Memory the region belongs to.
        space: MemorySpace,
        /// Store address.
        addr: u32,
    },
    /// Checksum store address lies outside the memory.
    #[error("{space}: checksum at {addr:#x} lies outside the memory")]
    StoreOutOfBounds {
        /// Memory the region belongs to.
        space: MemorySpace,
        /// Store address.
        addr: u32,
    },
    /// SRAM region shorter than two words.
    #[error("tested SRAM region must span at least two words, got {length}")]
    RegionTooShort {
        /// Length in words.
        length: u32,
    },
    /// SRAM region outside data memory.
    #[error("tested SRAM region {start:#x}+{length:#x} lies outside data memory")]
    RegionOutsideDataMemory {
        /// First address.
        start: u32,
        /// Length in words.
        length: u32,
    },
    /// Sections must advance.
    #[error("section size {section:#x} must exceed overlap {overlap:#x}")]
    SectionNotLargerThanOverlap {
        /// Section size.
        section: u32,
        /// Overlap between neighbouring sections.
        overlap: u32,
    },
    /// Section size leaves no room for the backup buffer and scratch stack.
    #[error("section {section:#x} plus scratch stack {scratch:#x} exceeds half of {length:#x}")]
    SectionTooLarge {
        /// Section size.
        section: u32,
        /// Scratch stack size.
        scratch: u32,
        /// Region length.
        length: u32,
    },
    /// `(length - overlap)` is not a multiple of `(section - overlap)`.
    #[error("{length:#x} words do not split into whole sections of {section:#x} overlapping by {overlap:#x}")]
    UnevenSections {
        /// Region length.
        length: u32,
        /// Section size.
        section: u32,
        /// Overlap between neighbouring sections.
        overlap: u32,
    },
    /// Tolerance of 100 % or more accepts a watchdog that never fires.
    #[error("watchdog tolerance {percent}% must be below 100%")]
    ToleranceTooLarge {
        /// Configured tolerance.
        percent: u8,
    },
    /// Tick period of zero.
    #[error("watchdog test tick period must be non-zero")]
    ZeroTickPeriod,
    /// Counter-reset step would outlast the shortest accepted period.
    #[error("watchdog window too short: {min_ticks} ticks leave no room for a {sync_ticks}-tick restart sync")]
    SyncDelayTooLong {
        /// Shortest accepted watchdog period in ticks.
        min_ticks: u32,
        /// Restart synchronisation delay in ticks.
        sync_ticks: u32,
    },
}

// ── CRC regions ──────────────────────────────────────────────────────────────

/// One checksummed region of non-volatile memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CrcRegionConfig {
    /// Memory the region lives in.
    pub space: MemorySpace,
    /// Bounds of that memory.
    pub memory: MemoryBounds,
    /// Checksummed range.
    pub region: AddressRange,
    /// Where the checksum is stored, most-significant byte first.
    pub store_addr: u32,
    /// CRC parameter set.
    pub params: CrcParams,
    /// Bitwise or table-driven.
    pub algorithm: CrcAlgorithm,
}

impl CrcRegionConfig {
    /// Check the region and store address against the memory bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let space = self.space;
        let width = self.params.width.bytes();
        if self.region.is_empty() {
            return Err(ConfigError::EmptyRegion { space });
        }
        if !self.memory.contains_range(self.region) {
            return Err(ConfigError::RegionOutOfBounds {
                space,
                start: self.region.start,
                length: self.region.length,
            });
        }
        if self.region.overlaps_span(self.store_addr, width) {
            return Err(ConfigError::StoreOverlapsRegion {
                space,
                addr: self.store_addr,
            });
        }
        if !self.memory.contains_span(self.store_addr, width) {
            return Err(ConfigError::StoreOutOfBounds {
                space,
                addr: self.store_addr,
            });
        }
        Ok(())
    }

    /// Engine for this region's parameter set.
    pub const fn engine(&self) -> CrcIntegrity {
        CrcIntegrity::new(self.params, self.algorithm)
    }
}

// ── SRAM sections ────────────────────────────────────────────────────────────

/// Accepted but questionable SRAM layout choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LayoutAdvisory {
    /// Sections below 0x20 words make the periodic test slow to sweep the
    /// region and dominated by per-call overhead.
    SmallSection {
        /// Section size.
        section: u32,
    },
    /// An overlap below 0x10 words catches few boundary-straddling coupling
    /// faults.
    SmallOverlap {
        /// Overlap.
        overlap: u32,
    },
}

impl LayoutAdvisory {
    /// Short name for log output.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SmallSection { .. } => "section size below 0x20",
            Self::SmallOverlap { .. } => "non-zero overlap below 0x10",
        }
    }
}

const MIN_ADVISED_SECTION: u32 = 0x20;
const MIN_ADVISED_OVERLAP: u32 = 0x10;

/// Layout of the SRAM region under test and its periodic sections.
///
/// The periodic test reuses the start of the region: the first
/// `section_size` words hold the backup of the section under test, the next
/// `scratch_stack` words are the stack while a section covering the live
/// stack is tested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SramTestLayout {
    /// Whole data memory.
    pub data: MemoryBounds,
    /// Region tested at start-up and swept periodically.
    pub region: AddressRange,
    /// Words per periodic section.
    pub section_size: u32,
    /// Words shared by neighbouring sections.
    pub overlap: u32,
    /// Words reserved for the stack while the live stack is under test.
    pub scratch_stack: u32,
}

impl SramTestLayout {
    /// Apply the layout rules.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let length = self.region.length;
        if length < 2 {
            return Err(ConfigError::RegionTooShort { length });
        }
        if !self.data.contains_range(self.region) {
            return Err(ConfigError::RegionOutsideDataMemory {
                start: self.region.start,
                length,
            });
        }
        if self.section_size <= self.overlap {
            return Err(ConfigError::SectionNotLargerThanOverlap {
                section: self.section_size,
                overlap: self.overlap,
            });
        }
        let reserved = self.section_size.saturating_add(self.scratch_stack);
        if reserved > length / 2 {
            return Err(ConfigError::SectionTooLarge {
                section: self.section_size,
                scratch: self.scratch_stack,
                length,
            });
        }
        let span = length.saturating_sub(self.overlap);
        if span.checked_rem(self.step()) != Some(0) {
            return Err(ConfigError::UnevenSections {
                length,
                section: self.section_size,
                overlap: self.overlap,
            });
        }
        Ok(())
    }

    /// Distance between the starts of neighbouring sections.
    pub const fn step(&self) -> u32 {
        self.section_size.saturating_sub(self.overlap)
    }

    /// `(length - overlap) / (section - overlap)`; zero for an invalid
    /// layout.
    pub const fn section_count(&self) -> u32 {
        match self.region.length.saturating_sub(self.overlap).checked_div(self.step()) {
            Some(n) => n,
            None => 0,
        }
    }

    /// First word of section `index`.
    pub const fn section_start(&self, index: u32) -> Option<u32> {
        match self.step().checked_mul(index) {
            Some(offset) => self.region.start.checked_add(offset),
            None => None,
        }
    }

    /// First word of the section backup buffer.
    pub const fn backup_buffer(&self) -> u32 {
        self.region.start
    }

    /// Highest word of the scratch stack (the stack grows down).
    pub const fn scratch_stack_top(&self) -> u32 {
        self.region
            .start
            .saturating_add(self.section_size)
            .saturating_add(self.scratch_stack)
            .saturating_sub(1)
    }

    /// Fault Detection Time Interval when one section is tested every
    /// `call_period`.
    pub fn fault_detection_interval(&self, call_period: Duration) -> Duration {
        call_period
            .checked_mul(self.section_count())
            .unwrap_or(Duration::MAX)
    }

    /// Deepest stack, in words, the periodic test can run beside.
    ///
    /// `total + (section + scratch) % (section - overlap) - 2 * section - scratch`,
    /// zero when the layout leaves no room.
    pub fn max_stack_depth(&self) -> u32 {
        let reserved = self.section_size.saturating_add(self.scratch_stack);
        let remainder = reserved.checked_rem(self.step()).unwrap_or(0);
        self.region
            .length
            .saturating_add(remainder)
            .saturating_sub(self.section_size.saturating_mul(2))
            .saturating_sub(self.scratch_stack)
    }

    /// Accepted choices worth a second look.
    pub fn advisories(&self) -> heapless::Vec<LayoutAdvisory, 2> {
        let mut out = heapless::Vec::new();
        if self.section_size < MIN_ADVISED_SECTION {
            let _ = out.push(LayoutAdvisory::SmallSection {
                section: self.section_size,
            });
        }
        if self.overlap != 0 && self.overlap < MIN_ADVISED_OVERLAP {
            let _ = out.push(LayoutAdvisory::SmallOverlap {
                overlap: self.overlap,
            });
        }
        out
    }
}

// ── Watchdog ─────────────────────────────────────────────────────────────────

/// Timing of the watchdog self-test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogTestConfig {
    /// Nominal period of the watchdog at the setting the test arms.
    pub period: Duration,
    /// Period of the independent tick timer.
    pub tick: Duration,
    /// Accepted deviation of the measured period, in percent.
    pub tolerance_percent: u8,
    /// Ticks a counter restart needs to synchronise into the watchdog clock
    /// domain.
    pub sync_delay_ticks: u32,
}

impl WatchdogTestConfig {
    /// Apply the timing rules.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tolerance_percent >= 100 {
            return Err(ConfigError::ToleranceTooLarge {
                percent: self.tolerance_percent,
            });
        }
        if self.tick.is_zero() {
            return Err(ConfigError::ZeroTickPeriod);
        }
        let min_ticks = self.min_ticks();
        if three_quarters(min_ticks) <= self.sync_delay_ticks {
            return Err(ConfigError::SyncDelayTooLong {
                min_ticks,
                sync_ticks: self.sync_delay_ticks,
            });
        }
        Ok(())
    }

    /// Nominal period in ticks, rounded down.
    pub fn nominal_ticks(&self) -> u32 {
        self.scaled_ticks(100, false)
    }

    /// Shortest accepted period in ticks, rounded up.
    pub fn min_ticks(&self) -> u32 {
        self.scaled_ticks(100u8.saturating_sub(self.tolerance_percent), true)
    }

    /// Longest accepted period in ticks, rounded down.
    pub fn max_ticks(&self) -> u32 {
        self.scaled_ticks(100u8.saturating_add(self.tolerance_percent), false)
    }

    /// `period * percent / 100` expressed in ticks.
    fn scaled_ticks(&self, percent: u8, round_up: bool) -> u32 {
        let numerator = self.period.as_nanos().saturating_mul(u128::from(percent));
        let denominator = self.tick.as_nanos().saturating_mul(100);
        let Some(quotient) = numerator.checked_div(denominator) else {
            return 0;
        };
        let rem = numerator.checked_rem(denominator).unwrap_or(0);
        let ticks = if round_up && rem != 0 {
            quotient.saturating_add(1)
        } else {
            quotient
        };
        u32::try_from(ticks).unwrap_or(u32::MAX)
    }
}

/// `ticks * 3 / 4` without intermediate overflow.
pub(crate) fn three_quarters(ticks: u32) -> u32 {
    let quarter = ticks / 4;
    let rest = (ticks % 4).saturating_mul(3) / 4;
    quarter.saturating_mul(3).saturating_add(rest)
}

// ── Aggregate ────────────────────────────────────────────────────────────────

/// Every diagnostic's configuration for one product.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticsConfig {
    /// Program flash checksum.
    pub flash: CrcRegionConfig,
    /// EEPROM calibration data checksum.
    pub eeprom: CrcRegionConfig,
    /// SRAM March test layout.
    pub sram: SramTestLayout,
    /// Watchdog self-test timing.
    pub watchdog: WatchdogTestConfig,
}

impl DiagnosticsConfig {
    /// Gas monitor on the AVR64EA48: 64 KiB flash, 512 B EEPROM, 6 KiB SRAM,
    /// watchdog at its shortest period (8 cycles of the 1.024 kHz clock).
    pub const AVR64EA48_GAS_MONITOR: Self = Self {
        flash: CrcRegionConfig {
            space: MemorySpace::Flash,
            memory: MemoryBounds::new(0x0000, 0xFFFF),
            region: AddressRange::new(0x0000, 32_766),
            store_addr: 0xFFFC,
            params: CrcParams::CRC32,
            algorithm: CrcAlgorithm::Bitwise,
        },
        eeprom: CrcRegionConfig {
            space: MemorySpace::Eeprom,
            memory: MemoryBounds::new(0x1400, 0x15FF),
            region: AddressRange::new(0x1400, 255),
            store_addr: 0x15FE,
            params: CrcParams::CRC16_CCITT,
            algorithm: CrcAlgorithm::Table,
        },
        sram: SramTestLayout {
            data: MemoryBounds::new(0x6800, 0x7FFF),
            region: AddressRange::new(0x6800, 0x1800),
            section_size: 0x100,
            overlap: 0,
            scratch_stack: 0x10,
        },
        watchdog: WatchdogTestConfig {
            period: Duration::from_nanos(7_812_500),
            tick: Duration::from_micros(100),
            tolerance_percent: 30,
            sync_delay_ticks: 30,
        },
    };

    /// Validate every part and log the layout advisories.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.flash.validate()?;
        self.eeprom.validate()?;
        self.sram.validate()?;
        self.watchdog.validate()?;
        for advisory in self.sram.advisories() {
            diag_warn!("sram layout: {}", advisory.as_str());
        }
        Ok(())
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

    const REFERENCE: DiagnosticsConfig = DiagnosticsConfig::AVR64EA48_GAS_MONITOR;

    fn layout(length: u32, section: u32, overlap: u32, scratch: u32) -> SramTestLayout {
        SramTestLayout {
            region: AddressRange::new(0x6800, length),
            section_size: section,
            overlap,
            scratch_stack: scratch,
            ..REFERENCE.sram
        }
    }

    // ─── Reference product ───────────────────────────────────────────────

    #[test]
    fn reference_configuration_is_valid() {
        REFERENCE.validate().unwrap();
        assert!(REFERENCE.sram.advisories().is_empty());
    }

    #[test]
    fn reference_flash_is_bit_serial_and_eeprom_table_driven() {
        assert_eq!(REFERENCE.flash.params, CrcParams::CRC32);
        assert_eq!(REFERENCE.flash.algorithm, CrcAlgorithm::Bitwise);
        assert_eq!(REFERENCE.eeprom.params, CrcParams::CRC16_CCITT);
        assert_eq!(REFERENCE.eeprom.algorithm, CrcAlgorithm::Table);
    }

    #[test]
    fn reference_layout_has_24_sections() {
        assert_eq!(REFERENCE.sram.section_count(), 24);
        assert_eq!(REFERENCE.sram.section_start(23), Some(0x7F00));
        assert_eq!(REFERENCE.sram.scratch_stack_top(), 0x690F);
    }

    #[test]
    fn reference_fdti_is_sections_times_period() {
        let fdti = REFERENCE
            .sram
            .fault_detection_interval(Duration::from_millis(100));
        assert_eq!(fdti, Duration::from_millis(2_400));
    }

    #[test]
    fn reference_max_stack_depth() {
        // 0x1800 + 0x110 % 0x100 - 0x200 - 0x10
        assert_eq!(REFERENCE.sram.max_stack_depth(), 0x1600);
    }

    #[test]
    fn reference_watchdog_window() {
        let wd = REFERENCE.watchdog;
        assert_eq!(wd.nominal_ticks(), 78);
        assert_eq!(wd.min_ticks(), 55);
        assert_eq!(wd.max_ticks(), 101);
    }

    // ─── SRAM layout rules ───────────────────────────────────────────────

    #[test]
    fn overlapping_sections_count() {
        let l = layout(0x1710, 0x110, 0x10, 0x10);
        l.validate().unwrap();
        assert_eq!(l.section_count(), 23);
        assert_eq!(l.section_start(1), Some(0x6900));
    }

    #[test]
    fn uneven_split_is_rejected() {
        assert_eq!(
            layout(0x1800, 0x0F0, 0, 0x10).validate(),
            Err(ConfigError::UnevenSections {
                length: 0x1800,
                section: 0x0F0,
                overlap: 0
            })
        );
    }

    #[test]
    fn section_not_larger_than_overlap_is_rejected() {
        assert!(matches!(
            layout(0x1800, 0x20, 0x20, 0).validate(),
            Err(ConfigError::SectionNotLargerThanOverlap { .. })
        ));
    }

    #[test]
    fn section_over_half_the_region_is_rejected() {
        assert!(matches!(
            layout(0x200, 0x100, 0, 0x10).validate(),
            Err(ConfigError::SectionTooLarge { .. })
        ));
    }

    #[test]
    fn one_word_region_is_rejected() {
        assert_eq!(
            layout(1, 0x100, 0, 0).validate(),
            Err(ConfigError::RegionTooShort { length: 1 })
        );
    }

    #[test]
    fn region_past_data_memory_is_rejected() {
        let mut l = REFERENCE.sram;
        l.region = AddressRange::new(0x6900, 0x1800);
        assert!(matches!(
            l.validate(),
            Err(ConfigError::RegionOutsideDataMemory { .. })
        ));
    }

    #[test]
    fn small_choices_are_advised_not_rejected() {
        let l = layout(0x17F8, 0x18, 0x08, 0x10);
        l.validate().unwrap();
        let advice = l.advisories();
        assert!(advice.contains(&LayoutAdvisory::SmallSection { section: 0x18 }));
        assert!(advice.contains(&LayoutAdvisory::SmallOverlap { overlap: 0x08 }));
    }

    // ─── CRC regions ─────────────────────────────────────────────────────

    #[test]
    fn crc_store_inside_region_is_rejected() {
        let mut c = REFERENCE.eeprom;
        c.store_addr = 0x14FD;
        assert_eq!(
            c.validate(),
            Err(ConfigError::StoreOverlapsRegion {
                space: MemorySpace::Eeprom,
                addr: 0x14FD
            })
        );
    }

    #[test]
    fn crc_store_straddling_memory_end_is_rejected() {
        let mut c = REFERENCE.flash;
        c.store_addr = 0xFFFE;
        assert!(matches!(c.validate(), Err(ConfigError::StoreOutOfBounds { .. })));
    }

    #[test]
    fn crc_empty_region_is_rejected() {
        let mut c = REFERENCE.flash;
        c.region.length = 0;
        assert!(matches!(c.validate(), Err(ConfigError::EmptyRegion { .. })));
    }

    // ─── Watchdog rules ──────────────────────────────────────────────────

    #[test]
    fn full_tolerance_is_rejected() {
        let mut w = REFERENCE.watchdog;
        w.tolerance_percent = 100;
        assert_eq!(w.validate(), Err(ConfigError::ToleranceTooLarge { percent: 100 }));
    }

    #[test]
    fn zero_tick_is_rejected() {
        let mut w = REFERENCE.watchdog;
        w.tick = Duration::ZERO;
        assert_eq!(w.validate(), Err(ConfigError::ZeroTickPeriod));
    }

    #[test]
    fn sync_delay_longer_than_window_is_rejected() {
        let mut w = REFERENCE.watchdog;
        w.sync_delay_ticks = 41;
        assert!(matches!(w.validate(), Err(ConfigError::SyncDelayTooLong { .. })));
    }

    #[test]
    fn three_quarters_rounds_down() {
        assert_eq!(three_quarters(78), 58);
        assert_eq!(three_quarters(55), 41);
        assert_eq!(three_quarters(u32::MAX), 3_221_225_471);
    }
}
