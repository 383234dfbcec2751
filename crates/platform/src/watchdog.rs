//! Watchdog, reset-cause register and the independent tick timer.
//!
//! The watchdog self-test deliberately lets the watchdog reset the device, so
//! every blocking wait can end in a reset. On silicon that wait simply never
//! returns. Host models return [`DeviceReset`] instead and the caller unwinds
//! with `?`, which leaves persistent state exactly as the reset would.

bitflags::bitflags! {
    /// Reset-cause flags (RSTFR layout). Flags are sticky until cleared by
    /// writing ones.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResetFlags: u8 {
        /// Power-on reset.
        const POWER_ON = 0x01;
        /// Brown-out detector reset.
        const BROWN_OUT = 0x02;
        /// External reset pin.
        const EXTERNAL = 0x04;
        /// Watchdog reset.
        const WATCHDOG = 0x08;
        /// Software reset request.
        const SOFTWARE = 0x10;
        /// Reset from the debug/programming interface.
        const DEBUGGER = 0x20;
    }
}

impl ResetFlags {
    /// Sentinel returned in place of a corrupted reset-cause snapshot.
    pub const INVALID: Self = Self::from_bits_retain(0xFF);

    /// `true` when any cause other than the watchdog is flagged.
    pub fn has_other_than_watchdog(self) -> bool {
        !self.difference(Self::WATCHDOG).is_empty()
    }
}

impl crate::persistent::PersistentCode for ResetFlags {
    type Raw = u8;

    fn encode(self) -> u8 {
        self.bits()
    }

    fn decode(raw: u8) -> Option<Self> {
        Some(Self::from_bits_retain(raw))
    }
}

/// Marker for a device reset that interrupted a blocking wait.
///
/// Only host models produce this; on the target the reset vector runs instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[must_use]
pub struct DeviceReset;

/// Windowless watchdog timer plus the reset controller's cause flags.
pub trait Watchdog {
    /// `true` when the watchdog is enabled by fuses and cannot be
    /// reconfigured or stopped.
    fn is_locked(&self) -> bool;

    /// Enable the watchdog at its shortest timeout. Ignored when locked.
    fn arm_shortest_period(&mut self);

    /// Stop the watchdog. Ignored when locked.
    fn disable(&mut self);

    /// Restart the countdown (`WDR`). Takes effect after the watchdog clock
    /// domain synchronises, a few watchdog clock cycles later.
    fn restart_counter(&mut self);

    /// Current reset-cause flags.
    fn reset_flags(&self) -> ResetFlags;

    /// Clear the given reset-cause flags.
    fn clear_reset_flags(&mut self, flags: ResetFlags);
}

/// Free-running timer whose overflow is the timebase of the watchdog test.
pub trait TickTimer {
    /// Configure and start the timer.
    fn start(&mut self);

    /// Restart the current period and drop a pending overflow.
    fn restart(&mut self);

    /// Stop the timer and return its registers to reset values.
    fn stop(&mut self);

    /// Busy-wait for the next overflow.
    fn wait_tick(&mut self) -> Result<(), DeviceReset>;

    /// Busy-wait for `ticks` overflows, starting from a fresh period.
    fn delay_ticks(&mut self, ticks: u32) -> Result<(), DeviceReset> {
        self.restart();
        for _ in 0..ticks {
            self.wait_tick()?;
        }
        Ok(())
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
    use crate::persistent::Duplicated;

    #[test]
    fn other_cause_detection_ignores_watchdog_bit() {
        assert!(!ResetFlags::WATCHDOG.has_other_than_watchdog());
        assert!(!ResetFlags::empty().has_other_than_watchdog());
        assert!((ResetFlags::WATCHDOG | ResetFlags::POWER_ON).has_other_than_watchdog());
        assert!(ResetFlags::EXTERNAL.has_other_than_watchdog());
    }

    #[test]
    fn invalid_sentinel_is_all_ones() {
        assert_eq!(ResetFlags::INVALID.bits(), 0xFF);
    }

    #[test]
    fn reset_flags_round_trip_through_duplicated_cell() {
        let c = Duplicated::new(ResetFlags::POWER_ON | ResetFlags::BROWN_OUT);
        assert_eq!(c.read(), Some(ResetFlags::POWER_ON | ResetFlags::BROWN_OUT));
    }
}
