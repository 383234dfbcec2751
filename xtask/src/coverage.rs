//! xtask coverage: the integrator's figures for the reference configuration.

use std::time::Duration;

use anyhow::{anyhow, Result};
use colored::Colorize;
use diagnostics::DiagnosticsConfig;

pub fn run(period_ms: u64) -> Result<()> {
    let config = DiagnosticsConfig::AVR64EA48_GAS_MONITOR;
    config
        .validate()
        .map_err(|e| anyhow!("reference configuration is unsound: {e}"))?;
    let period = Duration::from_millis(period_ms);

    println!();
    println!("{}", "📐 Self-test coverage (AVR64EA48 gas monitor)".cyan().bold());
    println!();

    let sram = config.sram;
    println!("{}", "  SRAM March C-".bold());
    println!(
        "    region        {:#06x}..{:#06x} ({} bytes)",
        sram.region.start,
        sram.region.end().unwrap_or(u32::MAX),
        sram.region.length
    );
    println!(
        "    sections      {} × {:#x}, overlap {:#x}",
        sram.section_count(),
        sram.section_size,
        sram.overlap
    );
    println!(
        "    scratch stack {:#x} bytes, top {:#06x}",
        sram.scratch_stack,
        sram.scratch_stack_top()
    );
    println!("    max stack     {} bytes", sram.max_stack_depth());
    println!(
        "    FDTI          {} ms at {} ms per call",
        sram.fault_detection_interval(period).as_millis(),
        period_ms
    );
    for advisory in sram.advisories() {
        println!("    {}", format!("⚠ {}", advisory.as_str()).yellow());
    }
    println!();

    let wdt = config.watchdog;
    println!("{}", "  Watchdog".bold());
    println!(
        "    period        {} µs, tick {} µs, tolerance {}%",
        wdt.period.as_micros(),
        wdt.tick.as_micros(),
        wdt.tolerance_percent
    );
    println!(
        "    accepted      {}..={} ticks (nominal {})",
        wdt.min_ticks(),
        wdt.max_ticks(),
        wdt.nominal_ticks()
    );
    println!("    restart sync  {} ticks", wdt.sync_delay_ticks);
    println!();

    for (name, crc) in [("Flash", config.flash), ("EEPROM", config.eeprom)] {
        println!("{}", format!("  {name} {}", crc.params.as_str()).bold());
        println!(
            "    region        {:#06x}+{:#x}, checksum at {:#06x}",
            crc.region.start, crc.region.length, crc.store_addr
        );
    }
    println!();

    Ok(())
}
