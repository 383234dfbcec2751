//! Gas Monitor Self-Test Emulator
//!
//! Boots the simulated AVR64EA48 through the full self-test sequence, runs
//! the calibration path on the blank EEPROM, then drives the main-loop check
//! until an injected SRAM fault is caught.
//!
//! Run with: RUST_LOG=debug cargo run -p firmware --example emulator --features emulator
#![allow(clippy::print_stdout, clippy::use_debug, missing_docs)]

use std::time::Duration;

use diagnostics::{DiagnosticsConfig, Verdict};
use firmware::{run_boot_diagnostics, BootPolicy, Disposition, PeriodicOutcome, SelfTestSuite};
use platform::mocks::{Cell, SimulatedDevice, SramFault};
use tracing_subscriber::EnvFilter;

/// Main-loop period of the product.
const LOOP_PERIOD: Duration = Duration::from_millis(10);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = DiagnosticsConfig::AVR64EA48_GAS_MONITOR;
    println!("Gas monitor self-test emulator");
    println!(
        "SRAM: {} sections of {:#x} bytes, FDTI {:?} at {:?} per loop",
        config.sram.section_count(),
        config.sram.section_size,
        config.sram.fault_detection_interval(LOOP_PERIOD),
        LOOP_PERIOD
    );
    println!(
        "Watchdog: accepted window {}..={} ticks\n",
        config.watchdog.min_ticks(),
        config.watchdog.max_ticks()
    );

    // Factory state: application image programmed, EEPROM still blank.
    let mut device = SimulatedDevice::avr64ea48();
    let image: Vec<u8> = (0..config.flash.region.length).map(|i| (i % 251) as u8).collect();
    device.flash.load(0, &image);

    let mut suite = SelfTestSuite::new(config).map_err(|e| e.to_string())?;
    if suite.store_image_checksum(&mut device) != Verdict::Pass {
        return Err("could not checksum the image".into());
    }

    let report = run_boot_diagnostics(&mut suite, &mut device).map_err(|e| e.to_string())?;
    println!("Boot report: {report:?}");
    println!("Watchdog resets during boot: {}", device.watchdog_resets());

    match report.disposition_with(BootPolicy::Production) {
        Disposition::Proceed => println!("→ proceed"),
        Disposition::NeedsCalibration => {
            println!("→ calibration required");
            let calibration: Vec<u8> = (0..=254u8).map(|i| i.wrapping_mul(3)).collect();
            device.eeprom.load(config.eeprom.region.start, &calibration);
            let stored = suite.store_calibration_checksum(&mut device);
            println!("Calibration checksum: {stored}");
            let report = suite.collect_report(&mut device);
            println!("Report after calibration: {:?}", report.disposition());
        }
        Disposition::Lockout => {
            println!("→ lockout");
            return Ok(());
        }
    }

    let mut periodic = suite.into_periodic(0x0001u16);
    for round in 0..config.sram.section_count() {
        if !periodic.tick(&mut device).is_healthy() {
            return Err(format!("unexpected fault in round {round}").into());
        }
    }
    println!("\nOne clean sweep of {} main-loop ticks", periodic.ticks());

    device
        .sram()
        .inject(SramFault::Inversion {
            aggressor: Cell::new(0x7204, 0),
            victim: Cell::new(0x7205, 7),
        })
        .map_err(|fault| format!("fault table full: {fault:?}"))?;
    println!("Injected an inversion coupling fault at 0x7204/0x7205");
    loop {
        match periodic.tick(&mut device) {
            PeriodicOutcome::Healthy => continue,
            PeriodicOutcome::Fault { check, verdict } => {
                println!(
                    "Fault after {} ticks: {} {}",
                    periodic.ticks(),
                    check.as_str(),
                    verdict
                );
                break;
            }
        }
    }
    Ok(())
}
