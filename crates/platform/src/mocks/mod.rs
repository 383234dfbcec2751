//! Simulated device for host testing
//!
//! [`SimulatedDevice`] implements every HAL trait over in-memory state, with
//! fault injection for each diagnostic:
//!
//! | Unit | Injectable faults |
//! |------|-------------------|
//! | SRAM | stuck-at, inversion / idempotent / state coupling ([`SramFault`]) |
//! | Register file | stuck bits per register, stuck zero flag ([`RegisterFault`]) |
//! | Watchdog | dead, ignores restart, off-nominal timeout ([`WatchdogBehaviour`]) |
//! | Flash / EEPROM | erase/write failures, dropped writes, bit flips |
//!
//! A watchdog timeout surfaces as `Err(DeviceReset)` from
//! [`TickTimer::wait_tick`]; SRAM content survives it, as on silicon.

#![cfg(any(test, feature = "std"))]

mod nvm;
mod sram;

pub use nvm::{SimFlashError, SimulatedEeprom, SimulatedFlash, SIM_FLASH_PAGE_SIZE};
pub use sram::{Cell, SimulatedSram, SramFault, MAX_SRAM_FAULTS};

use crate::cpu::{Cpu, InterruptControl, RegisterSet, GENERAL_REGISTER_COUNT};
use crate::memory::{DataMemory, MemoryBounds};
use crate::watchdog::{DeviceReset, ResetFlags, TickTimer, Watchdog};
use crate::DiagnosticsHal;

// ─── Device layout ───────────────────────────────────────────────────────────

/// Memory map of the simulated part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLayout {
    /// Data memory (SRAM).
    pub data: MemoryBounds,
    /// Data EEPROM.
    pub eeprom: MemoryBounds,
    /// Program flash size in bytes.
    pub flash_size: usize,
}

impl DeviceLayout {
    /// AVR64EA48: 6 KiB SRAM at 0x6800, 512 B EEPROM at 0x1400, 64 KiB flash.
    pub const AVR64EA48: Self = Self {
        data: MemoryBounds::new(0x6800, 0x7FFF),
        eeprom: MemoryBounds::new(0x1400, 0x15FF),
        flash_size: 0x1_0000,
    };
}

// ─── Register faults ─────────────────────────────────────────────────────────

/// Register a stuck-bit fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterTarget {
    /// General-purpose register `rN`.
    General(usize),
    /// Status register.
    Status,
    /// Stack pointer high byte.
    StackPointerHigh,
    /// Stack pointer low byte.
    StackPointerLow,
}

/// Bits of one register that ignore writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterFault {
    /// Faulty register.
    pub target: RegisterTarget,
    /// Bits stuck at 1.
    pub stuck_high: u8,
    /// Bits stuck at 0.
    pub stuck_low: u8,
}

impl RegisterFault {
    fn apply(&self, value: u8) -> u8 {
        (value | self.stuck_high) & !self.stuck_low
    }
}

// ─── Watchdog model ──────────────────────────────────────────────────────────

/// How the simulated watchdog misbehaves, if at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogBehaviour {
    /// Resets the device when the countdown expires.
    Nominal,
    /// Never resets the device.
    Dead,
    /// Expires normally but ignores counter restarts.
    IgnoresRestart,
}

/// Watchdog timing in units of timer ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogTiming {
    /// Ticks from (re)start to expiry.
    pub timeout_ticks: u32,
    /// Ticks before a counter restart takes effect.
    pub restart_latency_ticks: u32,
}

impl WatchdogTiming {
    /// 8-cycle period of the 1.024 kHz watchdog clock against a 100 µs tick,
    /// with a restart that synchronises after 25 ticks (two to three slow
    /// clock cycles).
    pub const AVR_SHORTEST_AT_100US: Self = Self {
        timeout_ticks: 78,
        restart_latency_ticks: 25,
    };
}

struct WatchdogModel {
    timing: WatchdogTiming,
    behaviour: WatchdogBehaviour,
    locked: bool,
    armed: bool,
    counter: u32,
    pending_restart: Option<u32>,
}

impl WatchdogModel {
    fn after_reset(&mut self) {
        self.armed = self.locked;
        self.counter = 0;
        self.pending_restart = None;
    }

    /// Advance one tick; `true` when the countdown expired.
    fn tick(&mut self) -> bool {
        if !self.armed || self.behaviour == WatchdogBehaviour::Dead {
            return false;
        }
        if let Some(left) = self.pending_restart {
            if left <= 1 {
                self.counter = 0;
                self.pending_restart = None;
            } else {
                self.pending_restart = Some(left.saturating_sub(1));
            }
        }
        self.counter = self.counter.saturating_add(1);
        self.counter >= self.timing.timeout_ticks
    }
}

// ─── SimulatedDevice ─────────────────────────────────────────────────────────

/// Status-register interrupt-enable bit (`I`).
pub const SREG_I: u8 = 0x80;
/// Status-register zero flag (`Z`).
pub const SREG_Z: u8 = 0x02;

/// In-memory model of the whole part.
pub struct SimulatedDevice {
    sram: SimulatedSram,
    registers: RegisterSet,
    stack_pointer: u16,
    register_faults: heapless::Vec<RegisterFault, 8>,
    zero_flag_stuck: Option<bool>,
    watchdog: WatchdogModel,
    reset_flags: ResetFlags,
    timer_running: bool,
    ticks: u64,
    resets: u32,
    frame_guard: Option<u32>,
    frame_writes: usize,
    unmasked_nvm_accesses: usize,
    /// Program flash.
    pub flash: SimulatedFlash,
    /// Data EEPROM.
    pub eeprom: SimulatedEeprom,
}

impl SimulatedDevice {
    /// Powered-up device with the given memory map and watchdog timing.
    pub fn new(layout: DeviceLayout, timing: WatchdogTiming) -> Self {
        Self {
            sram: SimulatedSram::new(layout.data),
            registers: RegisterSet::default(),
            stack_pointer: top_of(layout.data),
            register_faults: heapless::Vec::new(),
            zero_flag_stuck: None,
            watchdog: WatchdogModel {
                timing,
                behaviour: WatchdogBehaviour::Nominal,
                locked: false,
                armed: false,
                counter: 0,
                pending_restart: None,
            },
            reset_flags: ResetFlags::POWER_ON,
            timer_running: false,
            ticks: 0,
            resets: 0,
            frame_guard: None,
            frame_writes: 0,
            unmasked_nvm_accesses: 0,
            flash: SimulatedFlash::new(layout.flash_size),
            eeprom: SimulatedEeprom::new(layout.eeprom),
        }
    }

    /// AVR64EA48 with nominal watchdog timing.
    pub fn avr64ea48() -> Self {
        Self::new(DeviceLayout::AVR64EA48, WatchdogTiming::AVR_SHORTEST_AT_100US)
    }

    // ── Fault injection ──────────────────────────────────────────────────────

    /// SRAM array, for fault injection and inspection.
    pub fn sram(&mut self) -> &mut SimulatedSram {
        &mut self.sram
    }

    /// Make bits of one register ignore writes.
    pub fn inject_register_fault(&mut self, fault: RegisterFault) -> Result<(), RegisterFault> {
        self.register_faults.push(fault)
    }

    /// Pin the zero flag at `level` regardless of ALU results.
    pub fn stick_zero_flag(&mut self, level: bool) {
        self.zero_flag_stuck = Some(level);
    }

    /// Select how the watchdog behaves.
    pub fn set_watchdog_behaviour(&mut self, behaviour: WatchdogBehaviour) {
        self.watchdog.behaviour = behaviour;
    }

    /// Change the watchdog timeout, e.g. to model clock drift.
    pub fn set_watchdog_timing(&mut self, timing: WatchdogTiming) {
        self.watchdog.timing = timing;
    }

    /// Model a watchdog enabled by fuses; it runs from every reset.
    pub fn lock_watchdog(&mut self) {
        self.watchdog.locked = true;
        self.watchdog.armed = true;
    }

    /// Count writes landing in the `depth` bytes at and below the stack
    /// pointer, where the running code's own frames live.
    pub fn guard_stack_frame(&mut self, depth: u32) {
        self.frame_guard = Some(depth);
        self.frame_writes = 0;
    }

    // ── Resets ───────────────────────────────────────────────────────────────

    /// Remove power and re-apply it. SRAM keeps its pattern in the model;
    /// callers reset their own persistent cells.
    pub fn power_cycle(&mut self) {
        self.reset_flags = ResetFlags::POWER_ON;
        self.reset_peripherals();
    }

    /// Pull the external reset pin.
    pub fn external_reset(&mut self) {
        self.reset_flags.insert(ResetFlags::EXTERNAL);
        self.reset_peripherals();
    }

    fn watchdog_reset(&mut self) {
        self.reset_flags.insert(ResetFlags::WATCHDOG);
        self.resets = self.resets.saturating_add(1);
        self.reset_peripherals();
    }

    fn reset_peripherals(&mut self) {
        self.watchdog.after_reset();
        self.timer_running = false;
        self.registers = RegisterSet::default();
        self.stack_pointer = top_of(self.sram.bounds());
    }

    // ── Inspection ───────────────────────────────────────────────────────────

    /// Watchdog resets issued so far.
    pub fn watchdog_resets(&self) -> u32 {
        self.resets
    }

    /// Total timer ticks elapsed.
    pub fn ticks_elapsed(&self) -> u64 {
        self.ticks
    }

    /// `true` while the watchdog counts down.
    pub fn watchdog_armed(&self) -> bool {
        self.watchdog.armed
    }

    /// `true` while the tick timer runs.
    pub fn timer_running(&self) -> bool {
        self.timer_running
    }

    /// Writes that hit the guarded stack frame since
    /// [`SimulatedDevice::guard_stack_frame`].
    pub fn stack_frame_writes(&self) -> usize {
        self.frame_writes
    }

    /// Flash or EEPROM accessor calls made with interrupts enabled.
    pub fn unmasked_nvm_accesses(&self) -> usize {
        self.unmasked_nvm_accesses
    }

    fn audit_nvm_access(&mut self) {
        if self.interrupts_enabled() {
            self.unmasked_nvm_accesses = self.unmasked_nvm_accesses.saturating_add(1);
        }
    }

    fn return_slot(&self) -> (u32, u32) {
        let last = self.sram.bounds().last();
        (last.saturating_sub(1), last)
    }

    fn register_fault(&self, target: RegisterTarget, value: u8) -> u8 {
        self.register_faults
            .iter()
            .filter(|f| f.target == target)
            .fold(value, |v, f| f.apply(v))
    }
}

fn top_of(bounds: MemoryBounds) -> u16 {
    u16::try_from(bounds.last()).unwrap_or(u16::MAX)
}

// ─── HAL trait implementations ───────────────────────────────────────────────

impl DataMemory for SimulatedDevice {
    fn data_bounds(&self) -> MemoryBounds {
        self.sram.bounds()
    }

    fn read_word(&self, addr: u32) -> u8 {
        self.sram.read(addr)
    }

    fn write_word(&mut self, addr: u32, value: u8) {
        if let Some(depth) = self.frame_guard {
            let sp = u32::from(self.stack_pointer);
            let floor = sp.saturating_sub(depth.saturating_sub(1));
            if (floor..=sp).contains(&addr) {
                self.frame_writes = self.frame_writes.saturating_add(1);
            }
        }
        self.sram.write(addr, value);
    }
}

impl Cpu for SimulatedDevice {
    const INTERRUPT_ENABLE_MASK: u8 = SREG_I;
    const ZERO_FLAG_MASK: u8 = SREG_Z;

    fn read_register_set(&self) -> RegisterSet {
        self.registers
    }

    fn write_register_set(&mut self, registers: &RegisterSet) {
        let mut stored = *registers;
        for (i, r) in stored.general.iter_mut().enumerate().take(GENERAL_REGISTER_COUNT) {
            *r = self.register_fault(RegisterTarget::General(i), *r);
        }
        stored.status = self.register_fault(RegisterTarget::Status, stored.status);
        self.registers = stored;
    }

    fn zero_flag_after_load(&mut self, value: u8) -> bool {
        let z = self.zero_flag_stuck.unwrap_or(value == 0);
        if z {
            self.registers.status |= SREG_Z;
        } else {
            self.registers.status &= !SREG_Z;
        }
        z
    }

    fn stack_pointer(&self) -> u16 {
        self.stack_pointer
    }

    fn set_stack_pointer(&mut self, sp: u16) {
        let [high, low] = sp.to_be_bytes();
        let high = self.register_fault(RegisterTarget::StackPointerHigh, high);
        let low = self.register_fault(RegisterTarget::StackPointerLow, low);
        self.stack_pointer = u16::from_be_bytes([high, low]);
    }

    fn return_address(&self) -> u16 {
        let (hi, lo) = self.return_slot();
        u16::from_be_bytes([self.sram.read(hi), self.sram.read(lo)])
    }

    fn set_return_address(&mut self, addr: u16) {
        let (hi, lo) = self.return_slot();
        let [h, l] = addr.to_be_bytes();
        self.sram.write(hi, h);
        self.sram.write(lo, l);
    }
}

impl InterruptControl for SimulatedDevice {
    fn interrupts_enabled(&self) -> bool {
        self.registers.status & SREG_I != 0
    }

    fn set_interrupts_enabled(&mut self, enabled: bool) {
        if enabled {
            self.registers.status |= SREG_I;
        } else {
            self.registers.status &= !SREG_I;
        }
    }
}

impl Watchdog for SimulatedDevice {
    fn is_locked(&self) -> bool {
        self.watchdog.locked
    }

    fn arm_shortest_period(&mut self) {
        if !self.watchdog.locked {
            self.watchdog.armed = true;
            self.watchdog.counter = 0;
            self.watchdog.pending_restart = None;
        }
    }

    fn disable(&mut self) {
        if !self.watchdog.locked {
            self.watchdog.armed = false;
        }
    }

    fn restart_counter(&mut self) {
        if self.watchdog.behaviour == WatchdogBehaviour::IgnoresRestart {
            return;
        }
        let latency = self.watchdog.timing.restart_latency_ticks;
        if latency == 0 {
            self.watchdog.counter = 0;
        } else {
            self.watchdog.pending_restart = Some(latency);
        }
    }

    fn reset_flags(&self) -> ResetFlags {
        self.reset_flags
    }

    fn clear_reset_flags(&mut self, flags: ResetFlags) {
        self.reset_flags.remove(flags);
    }
}

impl TickTimer for SimulatedDevice {
    fn start(&mut self) {
        self.timer_running = true;
    }

    fn restart(&mut self) {}

    fn stop(&mut self) {
        self.timer_running = false;
    }

    fn wait_tick(&mut self) -> Result<(), DeviceReset> {
        self.ticks = self.ticks.saturating_add(1);
        if self.watchdog.tick() {
            self.watchdog_reset();
            return Err(DeviceReset);
        }
        Ok(())
    }
}

impl DiagnosticsHal for SimulatedDevice {
    type Flash = SimulatedFlash;
    type Eeprom = SimulatedEeprom;

    fn flash(&mut self) -> &mut SimulatedFlash {
        self.audit_nvm_access();
        &mut self.flash
    }

    fn eeprom(&mut self) -> &mut SimulatedEeprom {
        self.audit_nvm_access();
        &mut self.eeprom
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

    #[test]
    fn watchdog_resets_after_timeout_ticks() {
        let mut d = SimulatedDevice::avr64ea48();
        d.arm_shortest_period();
        let mut survived = 0u32;
        while d.wait_tick().is_ok() {
            survived += 1;
        }
        assert_eq!(survived, 77);
        assert!(d.reset_flags().contains(ResetFlags::WATCHDOG));
        assert_eq!(d.watchdog_resets(), 1);
        assert!(!d.watchdog_armed());
    }

    #[test]
    fn restart_takes_effect_after_latency() {
        let mut d = SimulatedDevice::avr64ea48();
        d.arm_shortest_period();
        d.delay_ticks(40).unwrap();
        d.restart_counter();
        // 40 + 25 + 70 would pass 78 without the restart; with it the count
        // drops back to zero once the latency elapses.
        d.delay_ticks(25).unwrap();
        d.delay_ticks(70).unwrap();
        assert!(d.delay_ticks(10).is_err());
    }

    #[test]
    fn dead_watchdog_never_resets() {
        let mut d = SimulatedDevice::avr64ea48();
        d.set_watchdog_behaviour(WatchdogBehaviour::Dead);
        d.arm_shortest_period();
        assert!(d.delay_ticks(10_000).is_ok());
    }

    #[test]
    fn locked_watchdog_cannot_be_disabled() {
        let mut d = SimulatedDevice::avr64ea48();
        d.lock_watchdog();
        d.disable();
        assert!(d.watchdog_armed());
        d.power_cycle();
        assert!(d.watchdog_armed());
    }

    #[test]
    fn return_address_lives_at_top_of_sram() {
        let mut d = SimulatedDevice::avr64ea48();
        d.set_return_address(0x1234);
        assert_eq!(d.read_word(0x7FFE), 0x12);
        assert_eq!(d.read_word(0x7FFF), 0x34);
        assert_eq!(d.return_address(), 0x1234);
    }

    #[test]
    fn stuck_register_bit_is_visible_on_read() {
        let mut d = SimulatedDevice::avr64ea48();
        d.inject_register_fault(RegisterFault {
            target: RegisterTarget::General(17),
            stuck_high: 0,
            stuck_low: 0x04,
        })
        .unwrap();
        d.write_register_set(&RegisterSet::filled(0xFF, 0));
        assert_eq!(d.read_register_set().first_mismatch(0xFF), Some(17));
    }

    #[test]
    fn interrupt_enable_tracks_status_bit() {
        let mut d = SimulatedDevice::avr64ea48();
        d.set_interrupts_enabled(true);
        assert_eq!(d.read_register_set().status & SREG_I, SREG_I);
        assert!(d.disable_interrupts());
        assert!(!d.interrupts_enabled());
    }

    #[test]
    fn frame_guard_counts_writes_below_stack_pointer() {
        let mut d = SimulatedDevice::avr64ea48();
        d.set_stack_pointer(0x7F00);
        d.guard_stack_frame(4);
        d.write_word(0x7EFC, 0); // just below the guard
        d.write_word(0x7EFD, 0);
        d.write_word(0x7F00, 0);
        d.write_word(0x7F01, 0); // above the stack pointer: caller frames
        assert_eq!(d.stack_frame_writes(), 2);
    }
}
