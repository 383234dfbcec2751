//! Hardware Access Layer (HAL) for the gas-monitor self-test engine
//!
//! This crate provides trait-based abstractions for every piece of silicon the
//! functional-safety diagnostics touch, so the engine in the `diagnostics`
//! crate is written once and runs unchanged against the microcontroller or
//! against the simulated device in `mocks` (feature `std`).
//!
//! # Architecture Layers
//!
//! ```text
//! Orchestrator (firmware crate: boot sequence, periodic self-check)
//!         ↓
//! Diagnostics engine (CRC, March C-, registers, watchdog FSM)
//!         ↓
//! Platform HAL (this crate - trait abstractions)
//!         ↓
//! Silicon (vendor PAC)  |  SimulatedDevice (host tests)
//! ```
//!
//! # Capabilities
//!
//! - [`DataMemory`] - word read/write of the SRAM under test
//! - [`Cpu`] / [`InterruptControl`] - register file, stack pointer, return
//!   address, global interrupt enable
//! - [`EepromMemory`] - byte-programmed EEPROM with busy/status polling
//! - [`embedded_storage::nor_flash::NorFlash`] - page-erased program flash,
//!   patched through [`flash::program`]
//! - [`Watchdog`] / [`TickTimer`] - the unit under test and the independent
//!   timebase used to measure it
//! - [`Duplicated`] - reset-surviving, self-checking persistent cells
//!
//! # Features
//!
//! - `std`: Enable standard library support and the simulated device
//! - `simulator`: Alias of `std` for host tooling
//! - `hardware`: Physical hardware target marker
//! - `defmt`: Enable defmt logging derives
//!
//! # Example
//!
//! ```no_run
//! use platform::{InterruptControl, InterruptFreeSection};
//!
//! fn critical<H: InterruptControl>(hal: &mut H) {
//!     let section = InterruptFreeSection::enter(hal);
//!     assert!(!section.interrupts_enabled());
//!     // interrupts come back on when `section` drops
//! }
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
#![deny(unsafe_op_in_unsafe_fn)] // unsafe fn body is not implicitly unsafe block
#![warn(clippy::print_stdout)] // prefer tracing/defmt over println! in lib code
// Pedantic lints suppressed for this hardware HAL crate:
#![allow(clippy::doc_markdown)] // hex addresses and register names in doc comments
#![allow(clippy::must_use_candidate)] // hardware accessors; callers decide
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod cpu;
pub mod critical;
pub mod eeprom;
pub mod flash;
pub mod memory;
#[cfg(any(test, feature = "std"))]
pub mod mocks;
pub mod persistent;
pub mod watchdog;

pub use cpu::{Cpu, InterruptControl, RegisterSet, GENERAL_REGISTER_COUNT};
pub use critical::InterruptFreeSection;
pub use eeprom::{EepromMemory, NvmError, NvmStatus};
pub use memory::{AddressRange, DataMemory, MemoryBounds, MemorySpace};
pub use persistent::{Duplicated, PersistentCode, RawWord};
pub use watchdog::{DeviceReset, ResetFlags, TickTimer, Watchdog};

/// Everything the self-test engine needs from one device, bundled for the
/// orchestrator.
///
/// SRAM, register file, watchdog and timebase are implemented by the device
/// itself; the two non-volatile memories are reached through accessors since
/// they share method names.
pub trait DiagnosticsHal: DataMemory + Cpu + InterruptControl + Watchdog + TickTimer {
    /// Program flash.
    type Flash: embedded_storage::nor_flash::NorFlash;
    /// Data EEPROM.
    type Eeprom: EepromMemory;

    /// Program flash accessor.
    fn flash(&mut self) -> &mut Self::Flash;
    /// Data EEPROM accessor.
    fn eeprom(&mut self) -> &mut Self::Eeprom;
}
