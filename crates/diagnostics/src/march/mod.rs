//! SRAM March C- engine.
//!
//! Two ways to run it:
//!
//! - **Startup**: the whole configured region, stack included, before the
//!   application runs. The test overwrites its own stack frame, so the return
//!   address is cached and put back afterwards and the verdict goes to a
//!   duplicated result cell instead of the return value (which is always
//!   [`Verdict::Undefined`]). Fetch it with [`SramMarchTest::startup_result`].
//! - **Partial**: one section per call from the main loop, content preserved.
//!   See [`SramMarchTest::run_periodic_slice`].
//!
//! Coverage between a tested section and the rest of the region is partial
//! by construction: coupling faults whose aggressor and victim sit in
//! sections that are never tested together are only found if the overlap
//! covers them.

mod elements;
mod periodic;

pub use elements::{Direction, MarchElement, MarchFault, MARCH_C_MINUS};

use platform::{
    Cpu, DataMemory, Duplicated, InterruptControl, InterruptFreeSection, MemoryBounds, ResetFlags,
    Watchdog,
};

use crate::config::{ConfigError, SramTestLayout};
use crate::log::{diag_debug, diag_info, diag_warn};
use crate::verdict::Verdict;

/// How a March run treats the memory it tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum MarchMode {
    /// Destructive whole-region test; verdict persisted, not returned.
    Startup = 0xBD,
    /// Test of one section; verdict returned.
    Partial = 0xDB,
}

impl MarchMode {
    /// Decode a raw mode code.
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0xBD => Some(Self::Startup),
            0xDB => Some(Self::Partial),
            _ => None,
        }
    }

    /// Short name for log output.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Partial => "partial",
        }
    }
}

/// The SRAM diagnostic with its persisted bookkeeping.
///
/// On the target this lives in a `.noinit` section outside the tested
/// region so the startup verdict survives until `main` reads it.
#[derive(Debug)]
pub struct SramMarchTest {
    layout: SramTestLayout,
    section_index: u32,
    startup_result: Duplicated<Verdict>,
}

impl SramMarchTest {
    /// Diagnostic for a validated `layout`.
    pub fn new(layout: SramTestLayout) -> Result<Self, ConfigError> {
        layout.validate()?;
        Ok(Self {
            layout,
            section_index: 0,
            startup_result: Duplicated::new(Verdict::Undefined),
        })
    }

    /// Layout in use.
    pub fn layout(&self) -> &SramTestLayout {
        &self.layout
    }

    /// Section the next periodic call tests.
    pub fn section_index(&self) -> u32 {
        self.section_index
    }

    /// Run March C- over `[start, start + length)` of data memory.
    ///
    /// [`MarchMode::Partial`] returns the verdict. [`MarchMode::Startup`]
    /// caches and restores the return address, stores the verdict in the
    /// startup result cell and returns [`Verdict::Undefined`]. A bad range
    /// yields [`Verdict::InvalidArgument`] in both modes and stores nothing.
    /// Content is not preserved.
    pub fn march_test<H>(&mut self, hal: &mut H, start: u32, length: u32, mode: MarchMode) -> Verdict
    where
        H: DataMemory + Cpu + InterruptControl,
    {
        let Some(last) = checked_range(hal.data_bounds(), start, length) else {
            diag_warn!(
                "march {}: range {:#x}+{:#x} rejected",
                mode.as_str(),
                start,
                length
            );
            return Verdict::InvalidArgument;
        };
        let mut section = InterruptFreeSection::enter(hal);
        match mode {
            MarchMode::Partial => verdict_of(elements::run(&mut *section, start, last)),
            MarchMode::Startup => {
                let return_address = section.return_address();
                let verdict = verdict_of(elements::run(&mut *section, start, last));
                section.set_return_address(return_address);
                self.startup_result.commit(verdict);
                Verdict::Undefined
            }
        }
    }

    /// [`SramMarchTest::march_test`] with a raw mode code; unknown codes are
    /// [`Verdict::InvalidArgument`].
    pub fn march_test_code<H>(&mut self, hal: &mut H, start: u32, length: u32, mode: u8) -> Verdict
    where
        H: DataMemory + Cpu + InterruptControl,
    {
        match MarchMode::from_code(mode) {
            Some(mode) => self.march_test(hal, start, length, mode),
            None => {
                diag_warn!("march: unknown mode {:#x}", mode);
                Verdict::InvalidArgument
            }
        }
    }

    /// Destructive test of the whole region, run before the application.
    ///
    /// Skipped after a watchdog reset: the watchdog self-test causes those
    /// on purpose and its bookkeeping must survive. Moves the stack pointer
    /// to the top of data memory first; start-up code re-initialises it
    /// afterwards. Always returns [`Verdict::Undefined`].
    pub fn run_at_startup<H>(&mut self, hal: &mut H) -> Verdict
    where
        H: DataMemory + Cpu + InterruptControl + Watchdog,
    {
        if hal.reset_flags().contains(ResetFlags::WATCHDOG) {
            diag_debug!("march startup: skipped after watchdog reset");
            return Verdict::Undefined;
        }
        let top = hal.data_bounds().last();
        let mut section = InterruptFreeSection::enter(hal);
        section.set_stack_pointer(u16::try_from(top).unwrap_or(u16::MAX));
        let region = self.layout.region;
        let verdict = self.march_test(&mut *section, region.start, region.length, MarchMode::Startup);
        diag_info!("march startup: verdict stored");
        verdict
    }

    /// Verdict of the last startup run.
    ///
    /// [`Verdict::Undefined`] if no startup run completed; [`Verdict::Fail`]
    /// (and the cell is repaired to it) when the stored pair is corrupt.
    pub fn startup_result(&mut self) -> Verdict {
        self.startup_result.read_or_commit(Verdict::Fail)
    }

    /// Raw startup result cell, for fault injection in host tests.
    #[cfg(any(test, feature = "std"))]
    pub fn startup_result_cell_mut(&mut self) -> &mut Duplicated<Verdict> {
        &mut self.startup_result
    }
}

/// Last address of `[start, start + length)` if it lies inside data memory and
/// spans at least two words.
fn checked_range(bounds: MemoryBounds, start: u32, length: u32) -> Option<u32> {
    if length < 2 || start < bounds.first() {
        return None;
    }
    let last = start.checked_add(length.saturating_sub(1))?;
    (last <= bounds.last()).then_some(last)
}

fn verdict_of(outcome: Result<(), MarchFault>) -> Verdict {
    match outcome {
        Ok(()) => Verdict::Pass,
        Err(fault) => {
            diag_warn!(
                "march: element {} at {:#x} expected {:#x} read {:#x}",
                fault.element,
                fault.addr,
                fault.expected,
                fault.found
            );
            Verdict::Fail
        }
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
    use crate::config::DiagnosticsConfig;
    use platform::mocks::{Cell, SimulatedDevice, SramFault};

    fn engine() -> SramMarchTest {
        SramMarchTest::new(DiagnosticsConfig::AVR64EA48_GAS_MONITOR.sram).unwrap()
    }

    // ─── Argument checks ─────────────────────────────────────────────────

    #[test]
    fn range_below_data_memory_is_invalid() {
        let mut d = SimulatedDevice::avr64ea48();
        let v = engine().march_test(&mut d, 0x67FF, 0x10, MarchMode::Partial);
        assert_eq!(v, Verdict::InvalidArgument);
    }

    #[test]
    fn range_past_data_memory_is_invalid() {
        let mut d = SimulatedDevice::avr64ea48();
        let v = engine().march_test(&mut d, 0x7FF0, 0x11, MarchMode::Partial);
        assert_eq!(v, Verdict::InvalidArgument);
        let v = engine().march_test(&mut d, 0x7FF0, 0x10, MarchMode::Partial);
        assert_eq!(v, Verdict::Pass);
    }

    #[test]
    fn single_word_is_invalid() {
        let mut d = SimulatedDevice::avr64ea48();
        assert_eq!(
            engine().march_test(&mut d, 0x7000, 1, MarchMode::Partial),
            Verdict::InvalidArgument
        );
    }

    #[test]
    fn unknown_mode_code_is_invalid() {
        let mut d = SimulatedDevice::avr64ea48();
        let mut m = engine();
        assert_eq!(m.march_test_code(&mut d, 0x7000, 0x10, 0x00), Verdict::InvalidArgument);
        assert_eq!(m.march_test_code(&mut d, 0x7000, 0x10, 0xDB), Verdict::Pass);
    }

    #[test]
    fn invalid_startup_call_stores_nothing() {
        let mut d = SimulatedDevice::avr64ea48();
        let mut m = engine();
        assert_eq!(
            m.march_test(&mut d, 0x6000, 0x100, MarchMode::Startup),
            Verdict::InvalidArgument
        );
        assert_eq!(m.startup_result(), Verdict::Undefined);
    }

    // ─── Startup mode ────────────────────────────────────────────────────

    #[test]
    fn startup_returns_undefined_and_stores_pass() {
        let mut d = SimulatedDevice::avr64ea48();
        let mut m = engine();
        d.set_return_address(0x0A5C);
        assert_eq!(m.run_at_startup(&mut d), Verdict::Undefined);
        assert_eq!(m.startup_result(), Verdict::Pass);
        assert_eq!(d.return_address(), 0x0A5C);
    }

    #[test]
    fn startup_failure_restores_return_address() {
        let mut d = SimulatedDevice::avr64ea48();
        d.sram()
            .inject(SramFault::StuckAt {
                cell: Cell::new(0x6A00, 6),
                level: false,
            })
            .unwrap();
        d.set_return_address(0x1234);
        let mut m = engine();
        assert_eq!(m.run_at_startup(&mut d), Verdict::Undefined);
        assert_eq!(m.startup_result(), Verdict::Fail);
        assert_eq!(d.return_address(), 0x1234);
    }

    #[test]
    fn startup_restores_interrupts() {
        let mut d = SimulatedDevice::avr64ea48();
        d.set_interrupts_enabled(true);
        let _ = engine().run_at_startup(&mut d);
        assert!(d.interrupts_enabled());
    }

    #[test]
    fn startup_is_skipped_after_watchdog_reset() {
        let mut d = SimulatedDevice::avr64ea48();
        d.clear_reset_flags(ResetFlags::all());
        d.arm_shortest_period();
        while platform::TickTimer::wait_tick(&mut d).is_ok() {}
        assert!(d.reset_flags().contains(ResetFlags::WATCHDOG));

        let before = d.sram().raw(0x6800, 0x1800).to_vec();
        let mut m = engine();
        assert_eq!(m.run_at_startup(&mut d), Verdict::Undefined);
        assert_eq!(m.startup_result(), Verdict::Undefined);
        assert_eq!(d.sram().raw(0x6800, 0x1800), &before[..]);
    }

    #[test]
    fn corrupt_startup_result_reads_as_fail() {
        let mut d = SimulatedDevice::avr64ea48();
        let mut m = engine();
        let _ = m.run_at_startup(&mut d);
        m.startup_result_cell_mut().corrupt_inverse(0x04);
        assert_eq!(m.startup_result(), Verdict::Fail);
        // repaired
        assert!(m.startup_result_cell_mut().is_intact());
    }
}
