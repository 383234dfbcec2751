//! Gas Monitor Self-Test Firmware
//!
//! Orchestrates the functional-safety diagnostics of the [`diagnostics`]
//! crate for the gas monitor: runs them in the required order at boot,
//! decides whether the device may start, and keeps testing SRAM and the CPU
//! from the main loop.
//!
//! # Architecture
//!
//! ```text
//! Application / alarm state machine
//!         ↓
//! Orchestration (boot, selftest, periodic)
//!         ↓
//! Diagnostics (crc, march, registers, watchdog)
//!         ↓
//! Platform HAL (DiagnosticsHal: target or SimulatedDevice)
//! ```
//!
//! # Features
//!
//! - `hardware` - Build for the target (defmt logging)
//! - `emulator` - Build for desktop runs against the simulated device (tracing)
//! - `std` - Enable standard library (for emulator and testing)
//!
//! # Examples
//!
//! ## Emulator
//!
//! ```bash
//! RUST_LOG=debug cargo run -p firmware --example emulator --features emulator
//! ```

#![cfg_attr(all(not(test), not(feature = "std")), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Logging discipline (allow println in tests via clippy.toml)
#![warn(clippy::print_stdout)] // prefer tracing/defmt over println! in lib code
#![warn(clippy::dbg_macro)] // dbg! should not be left in committed code
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

mod log;

pub mod boot;
pub mod periodic;
pub mod selftest;

pub use boot::{
    run_boot_diagnostics, run_boot_diagnostics_with, BootError, SelfTestSuite, BOOT_SEQUENCE_STEPS,
    MAX_BOOT_RESETS,
};
pub use periodic::{PeriodicCheck, PeriodicOutcome, PeriodicSelfCheck};
pub use selftest::{BootPolicy, Disposition, SelfTestUnit, StartupReport};
