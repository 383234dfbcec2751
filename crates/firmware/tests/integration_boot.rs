//! Boot sequence integration tests
//!
//! Drives the whole self-test lifecycle against the simulated AVR64EA48:
//! factory provisioning, boot with its induced watchdog resets, the boot
//! decision, and the main-loop check.
//!
//! Run with: cargo test -p firmware --test integration_boot

// Integration test file -- intentional test patterns permitted.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::cast_possible_truncation,
    missing_docs
)]

use diagnostics::{DiagnosticsConfig, Verdict};
use firmware::{
    run_boot_diagnostics, BootPolicy, Disposition, PeriodicCheck, PeriodicOutcome, SelfTestSuite,
    SelfTestUnit,
};
use platform::mocks::{Cell, SimulatedDevice, SramFault, WatchdogBehaviour};
use platform::ResetFlags;
use proptest::prelude::*;

const REFERENCE: DiagnosticsConfig = DiagnosticsConfig::AVR64EA48_GAS_MONITOR;

fn calibration() -> Vec<u8> {
    (0..255u32).map(|i| (i * 7 + 3) as u8).collect()
}

/// Image programmed and checksummed; EEPROM blank unless `calibrated`.
fn factory_device(calibrated: bool) -> (SelfTestSuite, SimulatedDevice) {
    let mut device = SimulatedDevice::avr64ea48();
    let image: Vec<u8> = (0..REFERENCE.flash.region.length).map(|i| (i ^ (i >> 8)) as u8).collect();
    device.flash.load(0, &image);
    let suite = SelfTestSuite::new(REFERENCE).unwrap();
    assert_eq!(suite.store_image_checksum(&mut device), Verdict::Pass);
    if calibrated {
        device.eeprom.load(0x1400, &calibration());
        assert_eq!(suite.store_calibration_checksum(&mut device), Verdict::Pass);
    }
    (suite, device)
}

// ─── Boot decision ───────────────────────────────────────────────────────────

#[test]
fn uncalibrated_device_asks_for_calibration_then_proceeds() {
    let (mut suite, mut device) = factory_device(false);
    let report = run_boot_diagnostics(&mut suite, &mut device).unwrap();
    assert_eq!(report.eeprom, Verdict::Fail);
    assert_eq!(report.disposition(), Disposition::NeedsCalibration);

    device.eeprom.load(0x1400, &calibration());
    assert_eq!(suite.store_calibration_checksum(&mut device), Verdict::Pass);
    let report = suite.collect_report(&mut device);
    assert!(report.all_passed(), "{report:?}");
    assert_eq!(report.disposition_with(BootPolicy::Production), Disposition::Proceed);
}

#[test]
fn corrupted_image_locks_out() {
    let (mut suite, mut device) = factory_device(true);
    device.flash.flip_bit(0x2345, 3);
    let report = run_boot_diagnostics(&mut suite, &mut device).unwrap();
    assert_eq!(report.flash, Verdict::Fail);
    assert_eq!(report.disposition(), Disposition::Lockout);
}

#[test]
fn sram_fault_at_power_on_locks_out_unless_overridden() {
    let (mut suite, mut device) = factory_device(true);
    device
        .sram()
        .inject(SramFault::Idempotent {
            aggressor: Cell::new(0x7010, 4),
            rising: true,
            victim: Cell::new(0x7011, 4),
            forced: false,
        })
        .unwrap();
    let report = run_boot_diagnostics(&mut suite, &mut device).unwrap();
    let failed: Vec<_> = report.failures().map(|(unit, _)| unit).collect();
    assert_eq!(failed, [SelfTestUnit::Sram]);
    assert_eq!(report.disposition_with(BootPolicy::Production), Disposition::Lockout);
    assert_eq!(report.disposition_with(BootPolicy::Development), Disposition::Proceed);
}

#[test]
fn watchdog_ignoring_restarts_locks_out() {
    let (mut suite, mut device) = factory_device(true);
    device.set_watchdog_behaviour(WatchdogBehaviour::IgnoresRestart);
    let report = run_boot_diagnostics(&mut suite, &mut device).unwrap();
    assert_eq!(report.watchdog, Verdict::Fail);
    assert_eq!(report.disposition(), Disposition::Lockout);
}

// ─── Resets during boot ──────────────────────────────────────────────────────

#[test]
fn external_reset_during_watchdog_test_restarts_it() {
    let (mut suite, mut device) = factory_device(true);
    let _ = suite.sram().run_at_startup(&mut device);
    assert!(suite.watchdog().run_startup_step(&mut device).is_err());
    device.external_reset();

    let report = run_boot_diagnostics(&mut suite, &mut device).unwrap();
    assert!(report.all_passed(), "{report:?}");
    assert_eq!(report.reset_cause, ResetFlags::WATCHDOG | ResetFlags::EXTERNAL);
    assert_eq!(device.watchdog_resets(), 3);
}

#[test]
fn fuse_locked_watchdog_passes_and_stays_armed() {
    let (mut suite, mut device) = factory_device(true);
    device.lock_watchdog();
    let report = run_boot_diagnostics(&mut suite, &mut device).unwrap();
    assert_eq!(report.watchdog, Verdict::Pass);
    assert!(device.watchdog_armed());

    // The main loop keeps servicing it.
    let mut periodic = suite.into_periodic(0u8);
    for _ in 0..4 {
        assert!(periodic.tick(&mut device).is_healthy());
    }
}

// ─── Main loop ───────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// A stuck cell appearing after boot is reported within one sweep.
    #[test]
    fn stuck_cell_after_boot_is_found_within_one_sweep(
        offset in 0u32..0x1800,
        bit in 0u8..8,
        level in any::<bool>(),
        warmup in 0u32..24,
    ) {
        let (mut suite, mut device) = factory_device(true);
        let report = run_boot_diagnostics(&mut suite, &mut device).unwrap();
        prop_assert_eq!(report.disposition(), Disposition::Proceed);

        let mut periodic = suite.into_periodic(0x55u8);
        for _ in 0..warmup {
            prop_assert!(periodic.tick(&mut device).is_healthy());
        }

        device
            .sram()
            .inject(SramFault::StuckAt { cell: Cell::new(0x6800 + offset, bit), level })
            .unwrap();
        let found = (0..REFERENCE.sram.section_count())
            .map(|_| periodic.tick(&mut device))
            .find(|outcome| !outcome.is_healthy());
        prop_assert_eq!(
            found,
            Some(PeriodicOutcome::Fault { check: PeriodicCheck::Sram, verdict: Verdict::Fail })
        );
    }
}
