//! Functional-safety self-test engine for the gas monitor
//!
//! Self-tests for the units a class-B appliance controller has to check at
//! start-up and periodically, each written once against the [`platform`]
//! HAL traits:
//!
//! | Unit | Entry point | When |
//! |------|-------------|------|
//! | Program flash, EEPROM | [`crc::CrcIntegrity::validate`] | start-up, after programming |
//! | SRAM | [`march::SramMarchTest::run_at_startup`], [`march::SramMarchTest::run_periodic_slice`] | start-up, main loop |
//! | CPU registers | [`registers::test_registers`] | start-up, main loop |
//! | Watchdog | [`watchdog::WatchdogSelfTest::run_startup_step`] | start-up, across two resets |
//!
//! Every diagnostic reports exactly one [`Verdict`] and never retries or
//! decides policy; the orchestrator (the `firmware` crate) does that.
//! Diagnostics that outlive a reset keep their bookkeeping in
//! [`platform::Duplicated`] cells and read back [`Verdict::Fail`] rather than
//! a corrupt value.
//!
//! # Features
//!
//! - `std`: host builds against the simulated device, logging through
//!   `tracing`
//! - `tracing`: log through `tracing` without the rest of `std`
//! - `defmt`: log through `defmt` on the target
//!
//! # Example
//!
//! ```
//! use diagnostics::{registers, DiagnosticsConfig, SramMarchTest, Verdict};
//! use platform::mocks::SimulatedDevice;
//!
//! let mut device = SimulatedDevice::avr64ea48();
//! assert_eq!(registers::test_registers(&mut device), Verdict::Pass);
//!
//! let mut sram = SramMarchTest::new(DiagnosticsConfig::AVR64EA48_GAS_MONITOR.sram).unwrap();
//! assert_eq!(sram.run_periodic_slice(&mut device), Verdict::Pass);
//! ```

// ── Lint policy ─────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)] // no .unwrap() in production code
#![deny(clippy::expect_used)] // no .expect() in production code
#![deny(clippy::panic)] // no panic!() in production code
#![deny(clippy::unreachable)] // no unreachable!() that isn't documented
#![deny(unused_must_use)]
// all Results must be handled
// ────────────────────────────────────────────────────────────────────────────
#![cfg_attr(all(not(test), not(feature = "std")), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::print_stdout)] // prefer tracing/defmt over println! in lib code
#![allow(clippy::doc_markdown)] // hex addresses and state names in doc comments
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

mod log;

pub mod config;
pub mod crc;
pub mod march;
pub mod registers;
pub mod verdict;
pub mod watchdog;

pub use config::{ConfigError, CrcRegionConfig, DiagnosticsConfig, SramTestLayout, WatchdogTestConfig};
pub use crc::{CrcAlgorithm, CrcIntegrity, CrcParams};
pub use march::{MarchMode, SramMarchTest};
pub use verdict::Verdict;
pub use watchdog::{WatchdogSelfTest, WatchdogTestState};
