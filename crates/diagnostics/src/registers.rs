//! CPU register self-test.
//!
//! Checks that the zero flag follows ALU results, then writes a checkerboard
//! (0xAA) and its inverse (0x55) into every general register, the status
//! register and the stack pointer, reading each back. The interrupt-enable
//! bit is never part of the status pattern; interrupts stay off for the whole
//! test and the guard hands them back on return.
//!
//! The stack-pointer pattern is folded into data memory: each byte is written
//! as `((last - first) & pattern) + first`, taking `first`/`last` bytes from
//! the data-memory bounds, so an interrupt-free stray push still lands in
//! SRAM.
//!
//! On silicon the whole save/test/restore sequence is one assembly block;
//! no call boundary may sit between saving and restoring the registers.

use platform::{Cpu, DataMemory, InterruptControl, InterruptFreeSection, RegisterSet};

use crate::log::{diag_debug, diag_warn};
use crate::verdict::Verdict;

/// Patterns written into every register, in order.
pub const REGISTER_PATTERNS: [u8; 2] = [0xAA, 0x55];

/// Run the register self-test.
///
/// [`Verdict::Pass`] when every register round-trips both patterns and the
/// zero flag is not stuck, [`Verdict::Fail`] on the first mismatch. Every
/// register and the stack pointer are restored before returning, whatever
/// the verdict.
pub fn test_registers<H>(hal: &mut H) -> Verdict
where
    H: Cpu + InterruptControl + DataMemory,
{
    let bounds = hal.data_bounds();
    let mut guard = InterruptFreeSection::enter(hal);
    let saved = guard.read_register_set();
    let saved_sp = guard.stack_pointer();

    let outcome = zero_flag_check(&mut *guard)
        .and_then(|()| pattern_checks(&mut *guard, bounds.first(), bounds.last()));

    guard.write_register_set(&saved);
    guard.set_stack_pointer(saved_sp);
    drop(guard);

    match outcome {
        Ok(()) => {
            diag_debug!("registers: pass");
            Verdict::Pass
        }
        Err(mismatch) => {
            diag_warn!(
                "registers: {} wrote {:#x} read {:#x}",
                mismatch.register.as_str(),
                mismatch.expected,
                mismatch.found
            );
            Verdict::Fail
        }
    }
}

/// Register that failed to hold its pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Register {
    ZeroFlag,
    General,
    Status,
    StackPointer,
}

impl Register {
    const fn as_str(self) -> &'static str {
        match self {
            Self::ZeroFlag => "zero flag",
            Self::General => "general register",
            Self::Status => "status register",
            Self::StackPointer => "stack pointer",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Mismatch {
    register: Register,
    expected: u16,
    found: u16,
}

fn zero_flag_check<H: Cpu + ?Sized>(hal: &mut H) -> Result<(), Mismatch> {
    for (value, expected) in [(0u8, true), (0xFF, false)] {
        let found = hal.zero_flag_after_load(value);
        if found != expected {
            return Err(Mismatch {
                register: Register::ZeroFlag,
                expected: u16::from(expected),
                found: u16::from(found),
            });
        }
    }
    Ok(())
}

fn pattern_checks<H: Cpu + ?Sized>(hal: &mut H, first: u32, last: u32) -> Result<(), Mismatch> {
    let [first_high, first_low] = u16::try_from(first).unwrap_or(0).to_be_bytes();
    let [last_high, last_low] = u16::try_from(last).unwrap_or(u16::MAX).to_be_bytes();

    for pattern in REGISTER_PATTERNS {
        let status = pattern & !H::INTERRUPT_ENABLE_MASK;
        hal.write_register_set(&RegisterSet::filled(pattern, status));
        let read = hal.read_register_set();
        if let Some(index) = read.first_mismatch(pattern) {
            return Err(Mismatch {
                register: Register::General,
                expected: u16::from(pattern),
                found: read.general.get(index).copied().map_or(0, u16::from),
            });
        }
        if read.status != status {
            return Err(Mismatch {
                register: Register::Status,
                expected: u16::from(status),
                found: u16::from(read.status),
            });
        }

        let sp = u16::from_be_bytes([
            fold(pattern, first_high, last_high),
            fold(pattern, first_low, last_low),
        ]);
        hal.set_stack_pointer(sp);
        let found = hal.stack_pointer();
        if found != sp {
            return Err(Mismatch {
                register: Register::StackPointer,
                expected: sp,
                found,
            });
        }
    }
    Ok(())
}

/// Pattern byte folded into `[first, last]`.
const fn fold(pattern: u8, first: u8, last: u8) -> u8 {
    (last.wrapping_sub(first) & pattern).wrapping_add(first)
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
    use platform::mocks::{RegisterFault, RegisterTarget, SimulatedDevice, SREG_I};

    fn with_fault(target: RegisterTarget, stuck_high: u8, stuck_low: u8) -> SimulatedDevice {
        let mut d = SimulatedDevice::avr64ea48();
        d.inject_register_fault(RegisterFault {
            target,
            stuck_high,
            stuck_low,
        })
        .unwrap();
        d
    }

    #[test]
    fn stack_pointer_patterns_stay_in_data_memory() {
        // 0x6800..=0x7FFF
        assert_eq!(fold(0xAA, 0x68, 0x7F), 0x6A);
        assert_eq!(fold(0x55, 0x68, 0x7F), 0x7D);
        assert_eq!(fold(0xAA, 0x00, 0xFF), 0xAA);
        assert_eq!(fold(0x55, 0x00, 0xFF), 0x55);
    }

    #[test]
    fn healthy_core_passes() {
        let mut d = SimulatedDevice::avr64ea48();
        assert_eq!(test_registers(&mut d), Verdict::Pass);
    }

    #[test]
    fn stuck_general_register_bit_fails() {
        for (high, low) in [(0x01, 0x00), (0x00, 0x80)] {
            let mut d = with_fault(RegisterTarget::General(17), high, low);
            assert_eq!(test_registers(&mut d), Verdict::Fail);
        }
    }

    #[test]
    fn stuck_status_bit_fails() {
        let mut d = with_fault(RegisterTarget::Status, 0x00, 0x04);
        assert_eq!(test_registers(&mut d), Verdict::Fail);
    }

    #[test]
    fn stuck_zero_flag_fails() {
        for level in [false, true] {
            let mut d = SimulatedDevice::avr64ea48();
            d.stick_zero_flag(level);
            assert_eq!(test_registers(&mut d), Verdict::Fail, "stuck at {level}");
        }
    }

    #[test]
    fn stuck_stack_pointer_bits_fail() {
        // SPH 0x6A/0x7D: bit 4 toggles between the patterns.
        let mut d = with_fault(RegisterTarget::StackPointerHigh, 0x10, 0x00);
        assert_eq!(test_registers(&mut d), Verdict::Fail);
        let mut d = with_fault(RegisterTarget::StackPointerLow, 0x00, 0x01);
        assert_eq!(test_registers(&mut d), Verdict::Fail);
    }

    #[test]
    fn registers_and_stack_pointer_are_restored() {
        let mut d = SimulatedDevice::avr64ea48();
        let mut before = RegisterSet::filled(0, 0x21);
        for (i, r) in before.general.iter_mut().enumerate() {
            *r = u8::try_from(i).unwrap().wrapping_mul(7);
        }
        d.write_register_set(&before);
        d.set_stack_pointer(0x7EE0);
        assert_eq!(test_registers(&mut d), Verdict::Pass);
        assert_eq!(d.read_register_set(), before);
        assert_eq!(d.stack_pointer(), 0x7EE0);
    }

    #[test]
    fn registers_are_restored_after_failure() {
        let mut d = with_fault(RegisterTarget::General(3), 0x00, 0x02);
        let before = d.read_register_set();
        d.set_stack_pointer(0x7F00);
        assert_eq!(test_registers(&mut d), Verdict::Fail);
        assert_eq!(d.read_register_set(), before);
        assert_eq!(d.stack_pointer(), 0x7F00);
    }

    #[test]
    fn interrupt_enable_is_restored() {
        for enabled in [false, true] {
            let mut d = SimulatedDevice::avr64ea48();
            d.set_interrupts_enabled(enabled);
            let _ = test_registers(&mut d);
            assert_eq!(d.interrupts_enabled(), enabled);
            assert_eq!(d.read_register_set().status & SREG_I != 0, enabled);
        }
    }
}
