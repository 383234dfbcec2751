//! Processor core access: register file, stack pointer, return address,
//! global interrupt enable.
//!
//! On silicon these are implemented with short inline-assembly sequences that
//! must not be split by the compiler; the trait only fixes the contract.

/// Number of general-purpose working registers (r0..r31).
pub const GENERAL_REGISTER_COUNT: usize = 32;

/// Snapshot of the register file and the status (flags) register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RegisterSet {
    /// General-purpose working registers.
    pub general: [u8; GENERAL_REGISTER_COUNT],
    /// Status register, including the global interrupt-enable bit.
    pub status: u8,
}

impl RegisterSet {
    /// Every general register loaded with `pattern`.
    pub const fn filled(pattern: u8, status: u8) -> Self {
        Self {
            general: [pattern; GENERAL_REGISTER_COUNT],
            status,
        }
    }

    /// Index of the first general register that differs from `pattern`.
    pub fn first_mismatch(&self, pattern: u8) -> Option<usize> {
        self.general.iter().position(|&r| r != pattern)
    }
}

impl Default for RegisterSet {
    fn default() -> Self {
        Self::filled(0, 0)
    }
}

/// Register-level access to the processor core.
pub trait Cpu {
    /// Status-register bit holding the global interrupt enable.
    const INTERRUPT_ENABLE_MASK: u8;
    /// Status-register bit holding the zero flag.
    const ZERO_FLAG_MASK: u8;

    /// Read every general register and the status register.
    fn read_register_set(&self) -> RegisterSet;

    /// Load every general register and the status register.
    fn write_register_set(&mut self, registers: &RegisterSet);

    /// Load `value` through the ALU and report the resulting zero flag.
    fn zero_flag_after_load(&mut self, value: u8) -> bool;

    /// Current stack pointer.
    fn stack_pointer(&self) -> u16;

    /// Move the stack pointer.
    fn set_stack_pointer(&mut self, sp: u16);

    /// Return address of the current frame, as pushed on the stack.
    fn return_address(&self) -> u16;

    /// Overwrite the return address of the current frame.
    fn set_return_address(&mut self, addr: u16);
}

/// Global interrupt enable.
pub trait InterruptControl {
    /// `true` when interrupts are globally enabled.
    fn interrupts_enabled(&self) -> bool;

    /// Set the global interrupt enable.
    fn set_interrupts_enabled(&mut self, enabled: bool);

    /// Disable interrupts and return whether they were enabled before.
    fn disable_interrupts(&mut self) -> bool {
        let was_enabled = self.interrupts_enabled();
        self.set_interrupts_enabled(false);
        was_enabled
    }
}
