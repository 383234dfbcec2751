//! Startup report and the boot decision drawn from it.
//!
//! The diagnostics only report; this module decides. Every unit must read
//! [`Verdict::Pass`] for the application to start. Calibration data is the
//! one unit whose failure is recoverable in the field: the device enters its
//! calibration routine instead of locking out.

use diagnostics::Verdict;
use platform::ResetFlags;

use crate::log::{fw_error, fw_info, fw_warn};

/// A unit covered by the startup self-test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SelfTestUnit {
    /// CPU register file, status register and stack pointer.
    Cpu,
    /// Watchdog timer.
    Watchdog,
    /// Data SRAM.
    Sram,
    /// Program flash image.
    Flash,
    /// EEPROM calibration data.
    Eeprom,
}

impl SelfTestUnit {
    /// Report order.
    pub const ALL: [Self; 5] = [Self::Cpu, Self::Watchdog, Self::Sram, Self::Flash, Self::Eeprom];

    /// Short name for log output.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Watchdog => "watchdog",
            Self::Sram => "sram",
            Self::Flash => "flash",
            Self::Eeprom => "eeprom",
        }
    }
}

/// What the device does after the startup self-test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Disposition {
    /// Every unit passed; start the application.
    Proceed,
    /// Only the calibration data is bad; run calibration, then store a
    /// fresh checksum.
    NeedsCalibration,
    /// Hardware fault; raise the fault alarm and stay out of the application.
    Lockout,
}

impl Disposition {
    /// Short name for log output.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Proceed => "proceed",
            Self::NeedsCalibration => "needs-calibration",
            Self::Lockout => "lockout",
        }
    }
}

/// How strictly the report is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootPolicy {
    /// Any hardware fault locks the device out.
    #[default]
    Production,
    /// Bench builds: a lockout is logged and the application starts anyway.
    Development,
}

/// Verdicts of every startup diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartupReport {
    /// Register self-test.
    pub cpu: Verdict,
    /// Watchdog self-test.
    pub watchdog: Verdict,
    /// Startup March C-. [`Verdict::Undefined`] when no run was recorded.
    pub sram: Verdict,
    /// Program flash CRC-32.
    pub flash: Verdict,
    /// Calibration data CRC-16.
    pub eeprom: Verdict,
    /// Reset causes present when the watchdog test started.
    pub reset_cause: ResetFlags,
}

impl StartupReport {
    /// Verdict recorded for `unit`.
    pub const fn verdict(&self, unit: SelfTestUnit) -> Verdict {
        match unit {
            SelfTestUnit::Cpu => self.cpu,
            SelfTestUnit::Watchdog => self.watchdog,
            SelfTestUnit::Sram => self.sram,
            SelfTestUnit::Flash => self.flash,
            SelfTestUnit::Eeprom => self.eeprom,
        }
    }

    /// Units that did not pass, in report order.
    pub fn failures(&self) -> impl Iterator<Item = (SelfTestUnit, Verdict)> + '_ {
        SelfTestUnit::ALL
            .into_iter()
            .map(|unit| (unit, self.verdict(unit)))
            .filter(|(_, verdict)| !verdict.is_pass())
    }

    /// `true` when every unit passed.
    pub fn all_passed(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Boot decision under [`BootPolicy::Production`].
    ///
    /// Anything other than [`Verdict::Pass`] counts as a failure, including
    /// an `Undefined` SRAM result.
    pub fn disposition(&self) -> Disposition {
        let mut failures = self.failures();
        match (failures.next(), failures.next()) {
            (None, _) => Disposition::Proceed,
            (Some((SelfTestUnit::Eeprom, _)), None) => Disposition::NeedsCalibration,
            _ => Disposition::Lockout,
        }
    }

    /// Boot decision under `policy`, logging every failed unit.
    pub fn disposition_with(&self, policy: BootPolicy) -> Disposition {
        for (unit, verdict) in self.failures() {
            fw_error!("self-test {}: {}", unit.as_str(), verdict.as_str());
        }
        let disposition = match (self.disposition(), policy) {
            (Disposition::Lockout, BootPolicy::Development) => {
                fw_warn!("self-test: lockout overridden by development policy");
                Disposition::Proceed
            }
            (disposition, _) => disposition,
        };
        fw_info!("self-test: {}", disposition.as_str());
        disposition
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

    fn passing() -> StartupReport {
        StartupReport {
            cpu: Verdict::Pass,
            watchdog: Verdict::Pass,
            sram: Verdict::Pass,
            flash: Verdict::Pass,
            eeprom: Verdict::Pass,
            reset_cause: ResetFlags::POWER_ON,
        }
    }

    #[test]
    fn all_pass_proceeds() {
        let report = passing();
        assert!(report.all_passed());
        assert_eq!(report.disposition(), Disposition::Proceed);
    }

    #[test]
    fn calibration_only_failure_needs_calibration() {
        for verdict in [Verdict::Fail, Verdict::InvalidArgument] {
            let report = StartupReport {
                eeprom: verdict,
                ..passing()
            };
            assert_eq!(report.disposition(), Disposition::NeedsCalibration);
        }
    }

    #[test]
    fn any_other_failure_locks_out() {
        let faults: [(&str, fn(&mut StartupReport)); 4] = [
            ("cpu", |r| r.cpu = Verdict::Fail),
            ("watchdog", |r| r.watchdog = Verdict::Fail),
            ("sram", |r| r.sram = Verdict::Fail),
            ("flash", |r| r.flash = Verdict::NonVolatileStoreError),
        ];
        for (name, inject) in faults {
            let mut report = passing();
            inject(&mut report);
            assert_eq!(report.disposition(), Disposition::Lockout, "{name}");
        }
    }

    #[test]
    fn missing_sram_result_is_a_failure() {
        let report = StartupReport {
            sram: Verdict::Undefined,
            ..passing()
        };
        assert_eq!(report.disposition(), Disposition::Lockout);
    }

    #[test]
    fn eeprom_plus_hardware_fault_locks_out() {
        let report = StartupReport {
            eeprom: Verdict::Fail,
            flash: Verdict::Fail,
            ..passing()
        };
        assert_eq!(report.disposition(), Disposition::Lockout);
        let units: Vec<_> = report.failures().map(|(unit, _)| unit).collect();
        assert_eq!(units, [SelfTestUnit::Flash, SelfTestUnit::Eeprom]);
    }

    #[test]
    fn development_policy_only_overrides_lockout() {
        let locked = StartupReport {
            watchdog: Verdict::Fail,
            ..passing()
        };
        assert_eq!(locked.disposition_with(BootPolicy::Development), Disposition::Proceed);
        assert_eq!(locked.disposition_with(BootPolicy::Production), Disposition::Lockout);

        let uncalibrated = StartupReport {
            eeprom: Verdict::Fail,
            ..passing()
        };
        assert_eq!(
            uncalibrated.disposition_with(BootPolicy::Development),
            Disposition::NeedsCalibration
        );
    }
}
