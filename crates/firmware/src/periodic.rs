//! Main-loop self-check.
//!
//! One call per main-loop iteration. Each call services the watchdog, tests
//! the next SRAM section, re-runs the register test and verifies the
//! application's duplicated state cell. The first failing check ends the
//! call; the orchestrator decides what a fault means.

use core::time::Duration;

use diagnostics::{registers, SramMarchTest, Verdict};
use platform::{Cpu, DataMemory, Duplicated, InterruptControl, PersistentCode, Watchdog};

use crate::log::{fw_debug, fw_error};

/// One check of the periodic self-test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PeriodicCheck {
    /// SRAM March section.
    Sram,
    /// CPU registers.
    Registers,
    /// Duplicated application state.
    AppState,
}

impl PeriodicCheck {
    /// Short name for log output.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sram => "sram",
            Self::Registers => "registers",
            Self::AppState => "app-state",
        }
    }
}

/// Result of one main-loop self-check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PeriodicOutcome {
    /// Every check passed.
    Healthy,
    /// `check` reported `verdict`.
    Fault {
        /// The failing check.
        check: PeriodicCheck,
        /// What it reported.
        verdict: Verdict,
    },
}

impl PeriodicOutcome {
    /// `true` for [`PeriodicOutcome::Healthy`].
    pub const fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// Periodic self-test state carried between main-loop iterations.
pub struct PeriodicSelfCheck<T: PersistentCode> {
    sram: SramMarchTest,
    app_state: Duplicated<T>,
    ticks: u32,
}

impl<T: PersistentCode> PeriodicSelfCheck<T> {
    /// Start with section 0 of `sram` and `app_state` as the first value.
    pub fn new(sram: SramMarchTest, app_state: T) -> Self {
        Self {
            sram,
            app_state: Duplicated::new(app_state),
            ticks: 0,
        }
    }

    /// Run one iteration's checks.
    pub fn tick<H>(&mut self, hal: &mut H) -> PeriodicOutcome
    where
        H: DataMemory + Cpu + InterruptControl + Watchdog,
    {
        hal.restart_counter();
        self.ticks = self.ticks.wrapping_add(1);

        let section = self.sram.section_index();
        let outcome = match self.sram.run_periodic_slice(hal) {
            Verdict::Pass => match registers::test_registers(hal) {
                Verdict::Pass if self.app_state.is_intact() => PeriodicOutcome::Healthy,
                Verdict::Pass => PeriodicOutcome::Fault {
                    check: PeriodicCheck::AppState,
                    verdict: Verdict::Fail,
                },
                verdict => PeriodicOutcome::Fault {
                    check: PeriodicCheck::Registers,
                    verdict,
                },
            },
            verdict => PeriodicOutcome::Fault {
                check: PeriodicCheck::Sram,
                verdict,
            },
        };

        match outcome {
            PeriodicOutcome::Healthy => fw_debug!("periodic: section {} ok", section),
            PeriodicOutcome::Fault { check, verdict } => {
                fw_error!("periodic: {} {} (section {})", check.as_str(), verdict.as_str(), section);
            }
        }
        outcome
    }

    /// Replace the application state.
    pub fn set_app_state(&mut self, value: T) {
        self.app_state.commit(value);
    }

    /// Application state; `None` once its copies disagree.
    pub fn app_state(&self) -> Option<T> {
        self.app_state.read()
    }

    /// Calls to [`PeriodicSelfCheck::tick`] so far, wrapping.
    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    /// SRAM March engine.
    pub fn sram(&self) -> &SramMarchTest {
        &self.sram
    }

    /// Worst-case time until an SRAM fault is found when
    /// [`PeriodicSelfCheck::tick`] runs every `call_period`.
    pub fn fault_detection_interval(&self, call_period: Duration) -> Duration {
        self.sram.layout().fault_detection_interval(call_period)
    }

    /// Raw application state cell, for fault injection in host tests.
    #[cfg(any(test, feature = "std"))]
    pub fn app_state_cell_mut(&mut self) -> &mut Duplicated<T> {
        &mut self.app_state
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
    use diagnostics::DiagnosticsConfig;
    use platform::mocks::{Cell, RegisterFault, RegisterTarget, SimulatedDevice, SramFault};

    const LAYOUT: diagnostics::SramTestLayout = DiagnosticsConfig::AVR64EA48_GAS_MONITOR.sram;

    fn checker() -> PeriodicSelfCheck<u16> {
        PeriodicSelfCheck::new(SramMarchTest::new(LAYOUT).unwrap(), 0x0150)
    }

    #[test]
    fn clean_device_stays_healthy_over_a_full_sweep() {
        let mut device = SimulatedDevice::avr64ea48();
        let mut check = checker();
        for _ in 0..=LAYOUT.section_count() {
            assert_eq!(check.tick(&mut device), PeriodicOutcome::Healthy);
        }
        assert_eq!(check.ticks(), LAYOUT.section_count() + 1);
        assert_eq!(check.sram().section_index(), 1);
    }

    #[test]
    fn sram_fault_is_named() {
        let mut device = SimulatedDevice::avr64ea48();
        device
            .sram()
            .inject(SramFault::StuckAt {
                cell: Cell::new(0x6905, 2),
                level: true,
            })
            .unwrap();
        let mut check = checker();
        assert!(check.tick(&mut device).is_healthy());
        assert_eq!(
            check.tick(&mut device),
            PeriodicOutcome::Fault {
                check: PeriodicCheck::Sram,
                verdict: Verdict::Fail
            }
        );
    }

    #[test]
    fn register_fault_is_named() {
        let mut device = SimulatedDevice::avr64ea48();
        device
            .inject_register_fault(RegisterFault {
                target: RegisterTarget::General(17),
                stuck_high: 0,
                stuck_low: 0x08,
            })
            .unwrap();
        assert_eq!(
            checker().tick(&mut device),
            PeriodicOutcome::Fault {
                check: PeriodicCheck::Registers,
                verdict: Verdict::Fail
            }
        );
    }

    #[test]
    fn corrupt_app_state_is_a_fault() {
        let mut device = SimulatedDevice::avr64ea48();
        let mut check = checker();
        check.set_app_state(0x0203);
        assert!(check.tick(&mut device).is_healthy());
        assert_eq!(check.app_state(), Some(0x0203));

        check.app_state_cell_mut().corrupt_value(0x0010);
        assert_eq!(check.app_state(), None);
        assert_eq!(
            check.tick(&mut device),
            PeriodicOutcome::Fault {
                check: PeriodicCheck::AppState,
                verdict: Verdict::Fail
            }
        );
    }

    #[test]
    fn detection_interval_covers_every_section() {
        let check = checker();
        assert_eq!(
            check.fault_detection_interval(Duration::from_millis(10)),
            Duration::from_millis(240)
        );
    }
}
