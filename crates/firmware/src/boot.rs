//! Boot-time self-test sequence for the gas monitor.
//!
//! Order (MUST be respected):
//!   1. SRAM March C- over the whole region, before `.data`/`.bss` are
//!      initialised. Skipped after a watchdog reset, so it runs once per
//!      power-on.
//!   2. Watchdog self-test, one step per reset. The watchdog resets the
//!      device twice on purpose; start-up re-enters here each time.
//!   3. Register test, flash and EEPROM checksums, then the startup report.
//!
//! On the target every watchdog reset restarts from the reset vector and the
//! loop in [`run_boot_diagnostics`] never iterates. On the host the simulated
//! device returns [`DeviceReset`] instead and the loop plays the part of the
//! reset vector.

use diagnostics::{registers, ConfigError, DiagnosticsConfig, SramMarchTest, Verdict, WatchdogSelfTest};
use platform::{DeviceReset, DiagnosticsHal, PersistentCode};

use crate::log::{fw_debug, fw_error, fw_info, fw_warn};
use crate::periodic::PeriodicSelfCheck;
use crate::selftest::StartupReport;

/// Ordered list of boot sequence steps for documentation and testing.
pub const BOOT_SEQUENCE_STEPS: &[&str] = &[
    "1. SRAM March C-: full region with the stack at the top, once per power-on",
    "2. Watchdog self-test: one step per reset, re-entered after each induced reset",
    "3. CPU registers: stuck-at patterns with interrupts masked",
    "4. Flash CRC-32: application image against the checksum at the end of flash",
    "5. EEPROM CRC-16: calibration data against its stored checksum",
    "6. Startup report: proceed, calibrate or lock out",
];

/// Watchdog resets tolerated before boot gives up: two per test, and one
/// full restart of the test after an external reset.
pub const MAX_BOOT_RESETS: u32 = 4;

/// Boot could not produce a startup report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror_no_std::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootError {
    /// The build-time configuration is unsound.
    #[error("diagnostics configuration rejected: {0}")]
    Config(#[from] ConfigError),
    /// The watchdog kept resetting the device.
    #[error("watchdog self-test still resetting after {resets} resets")]
    ResetLoop {
        /// Resets seen before giving up.
        resets: u32,
    },
}

/// Every diagnostic with state that outlives a reset.
///
/// Lives in `.noinit` on the target so the watchdog test's bookkeeping and
/// the startup March verdict survive the induced resets.
#[derive(Debug)]
pub struct SelfTestSuite {
    config: DiagnosticsConfig,
    sram: SramMarchTest,
    watchdog: WatchdogSelfTest,
}

impl SelfTestSuite {
    /// Validate `config` and set up fresh diagnostics.
    pub fn new(config: DiagnosticsConfig) -> Result<Self, BootError> {
        config.validate()?;
        Ok(Self {
            config,
            sram: SramMarchTest::new(config.sram)?,
            watchdog: WatchdogSelfTest::new(config.watchdog)?,
        })
    }

    /// Configuration in use.
    pub fn config(&self) -> &DiagnosticsConfig {
        &self.config
    }

    /// SRAM March engine.
    pub fn sram(&mut self) -> &mut SramMarchTest {
        &mut self.sram
    }

    /// Watchdog self-test.
    pub fn watchdog(&mut self) -> &mut WatchdogSelfTest {
        &mut self.watchdog
    }

    /// Run the remaining startup diagnostics and gather every verdict.
    pub fn collect_report<H: DiagnosticsHal>(&mut self, hal: &mut H) -> StartupReport {
        let cpu = registers::test_registers(hal);
        let flash = self.config.flash.validate_on(hal);
        let eeprom = self.config.eeprom.validate_on(hal);
        StartupReport {
            cpu,
            watchdog: self.watchdog.result(),
            sram: self.sram.startup_result(),
            flash,
            eeprom,
            reset_cause: self.watchdog.reset_cause_snapshot(),
        }
    }

    /// Checksum freshly written calibration data.
    pub fn store_calibration_checksum<H: DiagnosticsHal>(&self, hal: &mut H) -> Verdict {
        let cfg = self.config.eeprom;
        let verdict = cfg.store_on(hal);
        if verdict.is_pass() {
            fw_info!("calibration checksum stored at {:#x}", cfg.store_addr);
        } else {
            fw_warn!("calibration checksum not stored: {}", verdict.as_str());
        }
        verdict
    }

    /// Checksum the application image in place. Production images carry the
    /// checksum from the build; this covers in-field reprogramming.
    pub fn store_image_checksum<H: DiagnosticsHal>(&self, hal: &mut H) -> Verdict {
        self.config.flash.store_on(hal)
    }

    /// Hand the SRAM engine over to the main loop.
    pub fn into_periodic<T: PersistentCode>(self, app_state: T) -> PeriodicSelfCheck<T> {
        PeriodicSelfCheck::new(self.sram, app_state)
    }
}

/// Run the boot sequence, tolerating up to [`MAX_BOOT_RESETS`] watchdog
/// resets.
pub fn run_boot_diagnostics<H: DiagnosticsHal>(
    suite: &mut SelfTestSuite,
    hal: &mut H,
) -> Result<StartupReport, BootError> {
    run_boot_diagnostics_with(suite, hal, MAX_BOOT_RESETS)
}

/// [`run_boot_diagnostics`] with an explicit reset budget.
pub fn run_boot_diagnostics_with<H: DiagnosticsHal>(
    suite: &mut SelfTestSuite,
    hal: &mut H,
    max_resets: u32,
) -> Result<StartupReport, BootError> {
    let mut resets = 0u32;
    loop {
        let _ = suite.sram.run_at_startup(hal);
        match suite.watchdog.run_startup_step(hal) {
            Ok(()) => break,
            Err(DeviceReset) => {
                resets = resets.saturating_add(1);
                fw_debug!("boot: watchdog reset {} during self-test", resets);
                if resets > max_resets {
                    fw_error!("boot: giving up after {} resets", resets);
                    return Err(BootError::ResetLoop { resets });
                }
            }
        }
    }
    let report = suite.collect_report(hal);
    fw_info!(
        "boot: cpu {} watchdog {} sram {} flash {} eeprom {}",
        report.cpu.as_str(),
        report.watchdog.as_str(),
        report.sram.as_str(),
        report.flash.as_str(),
        report.eeprom.as_str()
    );
    Ok(report)
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
    use crate::selftest::Disposition;
    use platform::mocks::{SimulatedDevice, WatchdogBehaviour};
    use platform::ResetFlags;

    const REFERENCE: DiagnosticsConfig = DiagnosticsConfig::AVR64EA48_GAS_MONITOR;

    fn provisioned() -> (SelfTestSuite, SimulatedDevice) {
        let mut device = SimulatedDevice::avr64ea48();
        let image: Vec<u8> = (0..0x8000u32).map(|i| (i % 253) as u8).collect();
        device.flash.load(0, &image);
        let suite = SelfTestSuite::new(REFERENCE).unwrap();
        assert_eq!(suite.store_image_checksum(&mut device), Verdict::Pass);
        assert_eq!(suite.store_calibration_checksum(&mut device), Verdict::Pass);
        (suite, device)
    }

    #[test]
    fn boot_steps_are_ordered() {
        assert_eq!(BOOT_SEQUENCE_STEPS.len(), 6);
        let march = BOOT_SEQUENCE_STEPS.iter().position(|s| s.contains("March")).unwrap();
        let watchdog = BOOT_SEQUENCE_STEPS.iter().position(|s| s.contains("Watchdog")).unwrap();
        let report = BOOT_SEQUENCE_STEPS.iter().position(|s| s.contains("report")).unwrap();
        assert!(march < watchdog && watchdog < report);
    }

    #[test]
    fn healthy_device_boots_after_two_resets() {
        let (mut suite, mut device) = provisioned();
        let report = run_boot_diagnostics(&mut suite, &mut device).unwrap();
        assert!(report.all_passed(), "{report:?}");
        assert_eq!(report.reset_cause, ResetFlags::POWER_ON);
        assert_eq!(report.disposition(), Disposition::Proceed);
        assert_eq!(device.watchdog_resets(), 2);
        assert!(!device.watchdog_armed());
    }

    #[test]
    fn dead_watchdog_locks_out_without_resets() {
        let (mut suite, mut device) = provisioned();
        device.set_watchdog_behaviour(WatchdogBehaviour::Dead);
        let report = run_boot_diagnostics(&mut suite, &mut device).unwrap();
        assert_eq!(report.watchdog, Verdict::Fail);
        assert_eq!(report.disposition(), Disposition::Lockout);
        assert_eq!(device.watchdog_resets(), 0);
    }

    #[test]
    fn reset_budget_is_enforced() {
        let (mut suite, mut device) = provisioned();
        assert_eq!(
            run_boot_diagnostics_with(&mut suite, &mut device, 1),
            Err(BootError::ResetLoop { resets: 2 })
        );
    }

    #[test]
    fn unsound_configuration_is_rejected() {
        let mut config = REFERENCE;
        config.sram.section_size = 0x0F0;
        assert!(matches!(SelfTestSuite::new(config), Err(BootError::Config(_))));
    }

    #[test]
    fn report_touches_nvm_only_with_interrupts_masked() {
        use platform::InterruptControl;
        let (mut suite, mut device) = provisioned();
        device.set_interrupts_enabled(true);
        let report = suite.collect_report(&mut device);
        assert_eq!((report.flash, report.eeprom), (Verdict::Pass, Verdict::Pass));
        assert_eq!(device.unmasked_nvm_accesses(), 0);
        assert!(device.interrupts_enabled());
    }

    #[test]
    fn calibration_store_error_is_reported() {
        let (suite, mut device) = provisioned();
        device.eeprom.fail_writes = true;
        assert_eq!(
            suite.store_calibration_checksum(&mut device),
            Verdict::NonVolatileStoreError
        );
    }
}
