//! Watchdog self-test.
//!
//! The test makes the watchdog reset the device twice and lives through both
//! resets in persisted state:
//!
//! ```text
//!            power-on / non-watchdog reset
//!                        │
//!                        ▼
//!   ┌──────────────── TestSystemReset ── arm, count ticks ──► FaultDetected
//!   │  watchdog reset          │                (no reset by max ticks)
//!   ▼                          │
//! TestCounterReset ── wait ¾T, restart counter, wait ¾T, wait ½T ──► FaultDetected
//!   │  watchdog reset during the last wait         (no second reset)
//!   ▼
//! NoFaultDetected ──► Pass
//! ```
//!
//! Every completed step tears down: the watchdog is disabled (or restarted
//! when fuse-locked), the state returns to `Uninitialized` and the watchdog
//! reset flag is cleared so a later unrelated watchdog reset is recognised.
//!
//! [`WatchdogSelfTest::run_startup_step`] is called early in start-up, before
//! anything else touches the watchdog, and again after each reset. Each step
//! runs with interrupts off. A reset interrupting a wait shows up on the host
//! as `Err(DeviceReset)`; the interrupt state is then left as the reset made
//! it.

use platform::{
    DeviceReset, Duplicated, InterruptControl, InterruptFreeSection, PersistentCode, ResetFlags,
    TickTimer, Watchdog,
};

use crate::config::{three_quarters, ConfigError, WatchdogTestConfig};
use crate::log::{diag_debug, diag_info, diag_warn};
use crate::verdict::Verdict;

/// Persisted state of the watchdog self-test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum WatchdogTestState {
    /// No test in progress.
    Uninitialized = 0x00,
    /// Watchdog armed; waiting for the first reset.
    TestSystemReset = 0x7E,
    /// First reset seen; checking that a counter restart delays the second.
    TestCounterReset = 0xBD,
    /// Second reset expected and seen.
    NoFaultDetected = 0xDB,
    /// Any deviation.
    FaultDetected = 0xE7,
}

impl WatchdogTestState {
    /// Every state, in test order.
    pub const ALL: [Self; 5] = [
        Self::Uninitialized,
        Self::TestSystemReset,
        Self::TestCounterReset,
        Self::NoFaultDetected,
        Self::FaultDetected,
    ];

    /// Raw code.
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Decode a raw code.
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(Self::Uninitialized),
            0x7E => Some(Self::TestSystemReset),
            0xBD => Some(Self::TestCounterReset),
            0xDB => Some(Self::NoFaultDetected),
            0xE7 => Some(Self::FaultDetected),
            _ => None,
        }
    }

    /// Short name for log output.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::TestSystemReset => "test-system-reset",
            Self::TestCounterReset => "test-counter-reset",
            Self::NoFaultDetected => "no-fault-detected",
            Self::FaultDetected => "fault-detected",
        }
    }
}

impl PersistentCode for WatchdogTestState {
    type Raw = u8;

    fn encode(self) -> u8 {
        self.code()
    }

    fn decode(raw: u8) -> Option<Self> {
        Self::from_code(raw)
    }
}

/// The watchdog self-test and everything it keeps across resets.
///
/// Must live in storage that survives a watchdog reset but is not
/// initialised by start-up code (`.noinit` on the target). Power loss
/// clears that storage: start-up then builds a fresh value with
/// [`WatchdogSelfTest::new`] and the power-on reset flag restarts the test
/// from the beginning.
#[derive(Debug)]
pub struct WatchdogSelfTest {
    config: WatchdogTestConfig,
    state: Duplicated<WatchdogTestState>,
    result: Duplicated<Verdict>,
    reset_flags: Duplicated<ResetFlags>,
    tick_count: u32,
}

impl WatchdogSelfTest {
    /// Fresh test for a validated `config`.
    pub fn new(config: WatchdogTestConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            state: Duplicated::new(WatchdogTestState::Uninitialized),
            result: Duplicated::new(Verdict::Undefined),
            reset_flags: Duplicated::new(ResetFlags::empty()),
            tick_count: 0,
        })
    }

    /// Timing in use.
    pub fn config(&self) -> &WatchdogTestConfig {
        &self.config
    }

    /// Advance the test by one reset cycle.
    ///
    /// `Ok(())` means this step finished and tore down; the verdict is in
    /// [`WatchdogSelfTest::result`]. `Err(DeviceReset)` means the watchdog
    /// reset the device mid-step; call again after the reset.
    pub fn run_startup_step<H>(&mut self, hal: &mut H) -> Result<(), DeviceReset>
    where
        H: Watchdog + TickTimer + InterruptControl,
    {
        let mut section = InterruptFreeSection::enter(hal);
        match self.step(&mut *section) {
            Ok(()) => Ok(()),
            Err(DeviceReset) => {
                section.abandon();
                Err(DeviceReset)
            }
        }
    }

    fn step<H>(&mut self, hal: &mut H) -> Result<(), DeviceReset>
    where
        H: Watchdog + TickTimer,
    {
        let flags = hal.reset_flags();
        let fresh = self.state.read() == Some(WatchdogTestState::Uninitialized);
        if flags.has_other_than_watchdog() || (flags.contains(ResetFlags::WATCHDOG) && fresh) {
            self.reset_flags.commit(flags);
            hal.clear_reset_flags(ResetFlags::all());
            self.enter(WatchdogTestState::TestSystemReset);
        }
        hal.start();

        let state = match self.state.read() {
            Some(state) => state,
            None => {
                diag_warn!("watchdog test: state cell corrupt");
                self.enter(WatchdogTestState::FaultDetected);
                WatchdogTestState::FaultDetected
            }
        };

        match state {
            WatchdogTestState::TestSystemReset => self.measure_period(hal)?,
            WatchdogTestState::TestCounterReset => self.check_counter_restart(hal)?,
            WatchdogTestState::NoFaultDetected => {
                if hal.reset_flags().contains(ResetFlags::WATCHDOG) {
                    self.result.commit(Verdict::Pass);
                } else {
                    diag_warn!("watchdog test: second reset was not the watchdog");
                    self.enter(WatchdogTestState::FaultDetected);
                }
            }
            WatchdogTestState::Uninitialized | WatchdogTestState::FaultDetected => {
                self.enter(WatchdogTestState::FaultDetected);
            }
        }
        self.teardown(hal)
    }

    /// Verdict of the last completed test.
    ///
    /// [`Verdict::Undefined`] before any test completed; [`Verdict::Fail`]
    /// (and the cell is repaired to it) when the stored pair is corrupt.
    pub fn result(&mut self) -> Verdict {
        self.result.read_or_commit(Verdict::Fail)
    }

    /// Reset causes seen when the test started, or [`ResetFlags::INVALID`]
    /// when the stored pair is corrupt.
    pub fn reset_cause_snapshot(&mut self) -> ResetFlags {
        self.reset_flags.read_or_commit(ResetFlags::INVALID)
    }

    /// Current state; `None` when the stored pair is corrupt.
    pub fn state(&self) -> Option<WatchdogTestState> {
        self.state.read()
    }

    /// Ticks from arming to the first reset, as last measured.
    pub fn measured_ticks(&self) -> u32 {
        self.tick_count
    }

    /// Raw state cell, for fault injection in host tests.
    #[cfg(any(test, feature = "std"))]
    pub fn state_cell_mut(&mut self) -> &mut Duplicated<WatchdogTestState> {
        &mut self.state
    }

    /// Raw result cell, for fault injection in host tests.
    #[cfg(any(test, feature = "std"))]
    pub fn result_cell_mut(&mut self) -> &mut Duplicated<Verdict> {
        &mut self.result
    }

    /// Raw reset-cause cell, for fault injection in host tests.
    #[cfg(any(test, feature = "std"))]
    pub fn reset_flags_cell_mut(&mut self) -> &mut Duplicated<ResetFlags> {
        &mut self.reset_flags
    }

    fn enter(&mut self, state: WatchdogTestState) {
        diag_info!("watchdog test: {}", state.as_str());
        self.state.commit(state);
    }

    /// Arm the watchdog and count ticks until it resets the device.
    fn measure_period<H>(&mut self, hal: &mut H) -> Result<(), DeviceReset>
    where
        H: Watchdog + TickTimer,
    {
        self.enter(WatchdogTestState::TestCounterReset);
        self.configure_watchdog(hal)?;
        let max = self.config.max_ticks();
        self.tick_count = 0;
        while self.tick_count < max {
            self.tick_count = self.tick_count.saturating_add(1);
            hal.wait_tick()?;
        }
        diag_warn!("watchdog test: no reset within {} ticks", max);
        self.enter(WatchdogTestState::FaultDetected);
        Ok(())
    }

    /// Check a counter restart pushes expiry out, then wait for the reset.
    fn check_counter_restart<H>(&mut self, hal: &mut H) -> Result<(), DeviceReset>
    where
        H: Watchdog + TickTimer,
    {
        self.enter(WatchdogTestState::FaultDetected);
        if !hal.reset_flags().contains(ResetFlags::WATCHDOG) {
            diag_warn!("watchdog test: first reset was not the watchdog");
            return Ok(());
        }
        hal.clear_reset_flags(ResetFlags::WATCHDOG);

        let measured = self.tick_count;
        let min = self.config.min_ticks();
        if measured < min {
            diag_warn!("watchdog test: reset after {} ticks, expected at least {}", measured, min);
            return Ok(());
        }
        diag_debug!("watchdog test: period {} ticks", measured);

        self.configure_watchdog(hal)?;
        let sync = self.config.sync_delay_ticks;
        let three_quarter = three_quarters(measured);
        hal.delay_ticks(three_quarter.saturating_sub(sync))?;
        hal.restart_counter();
        hal.delay_ticks(sync)?;
        hal.delay_ticks(three_quarter)?;

        self.enter(WatchdogTestState::NoFaultDetected);
        hal.delay_ticks(measured / 2)?;

        diag_warn!("watchdog test: no reset after counter restart");
        self.enter(WatchdogTestState::FaultDetected);
        Ok(())
    }

    fn configure_watchdog<H>(&self, hal: &mut H) -> Result<(), DeviceReset>
    where
        H: Watchdog + TickTimer,
    {
        if hal.is_locked() {
            hal.restart_counter();
            hal.delay_ticks(self.config.sync_delay_ticks)
        } else {
            hal.arm_shortest_period();
            Ok(())
        }
    }

    fn teardown<H>(&mut self, hal: &mut H) -> Result<(), DeviceReset>
    where
        H: Watchdog + TickTimer,
    {
        if hal.is_locked() {
            hal.restart_counter();
            hal.delay_ticks(self.config.sync_delay_ticks)?;
        } else {
            hal.disable();
        }
        if self.state.read() != Some(WatchdogTestState::NoFaultDetected) {
            self.result.commit(Verdict::Fail);
        }
        self.enter(WatchdogTestState::Uninitialized);
        hal.clear_reset_flags(ResetFlags::WATCHDOG);
        hal.stop();

        let verdict = self.result();
        if verdict.is_pass() {
            diag_info!("watchdog test: {}", verdict.as_str());
        } else {
            diag_warn!("watchdog test: {}", verdict.as_str());
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
    use crate::config::DiagnosticsConfig;
    use platform::mocks::{SimulatedDevice, WatchdogBehaviour, WatchdogTiming};

    const CONFIG: WatchdogTestConfig = DiagnosticsConfig::AVR64EA48_GAS_MONITOR.watchdog;

    fn selftest() -> WatchdogSelfTest {
        WatchdogSelfTest::new(CONFIG).unwrap()
    }

    /// Call the step until it completes; returns the number of resets.
    fn run_to_completion(wd: &mut WatchdogSelfTest, d: &mut SimulatedDevice) -> u32 {
        for resets in 0..8 {
            if wd.run_startup_step(d).is_ok() {
                return resets;
            }
        }
        panic!("watchdog test did not complete");
    }

    fn with_timeout(timeout_ticks: u32) -> SimulatedDevice {
        let mut d = SimulatedDevice::avr64ea48();
        d.set_watchdog_timing(WatchdogTiming {
            timeout_ticks,
            ..WatchdogTiming::AVR_SHORTEST_AT_100US
        });
        d
    }

    #[test]
    fn state_codes_are_distinct_and_round_trip() {
        for (i, a) in WatchdogTestState::ALL.iter().enumerate() {
            assert_eq!(WatchdogTestState::from_code(a.code()), Some(*a));
            for b in &WatchdogTestState::ALL[i + 1..] {
                assert!((a.code() ^ b.code()).count_ones() >= 4);
            }
        }
    }

    #[test]
    fn result_is_undefined_before_the_first_run() {
        assert_eq!(selftest().result(), Verdict::Undefined);
    }

    // ─── Nominal sequence ────────────────────────────────────────────────

    #[test]
    fn healthy_watchdog_passes_after_two_resets() {
        let mut d = SimulatedDevice::avr64ea48();
        let mut wd = selftest();

        assert_eq!(wd.run_startup_step(&mut d), Err(DeviceReset));
        assert_eq!(wd.state(), Some(WatchdogTestState::TestCounterReset));
        assert_eq!(wd.measured_ticks(), 78);

        assert_eq!(wd.run_startup_step(&mut d), Err(DeviceReset));
        assert_eq!(wd.state(), Some(WatchdogTestState::NoFaultDetected));

        assert_eq!(wd.run_startup_step(&mut d), Ok(()));
        assert_eq!(wd.result(), Verdict::Pass);
        assert_eq!(d.watchdog_resets(), 2);
    }

    #[test]
    fn teardown_leaves_the_device_clean() {
        let mut d = SimulatedDevice::avr64ea48();
        let mut wd = selftest();
        run_to_completion(&mut wd, &mut d);
        assert_eq!(wd.state(), Some(WatchdogTestState::Uninitialized));
        assert!(!d.watchdog_armed());
        assert!(!d.timer_running());
        assert!(!d.reset_flags().contains(ResetFlags::WATCHDOG));
    }

    #[test]
    fn snapshot_keeps_the_power_on_reset_cause() {
        let mut d = SimulatedDevice::avr64ea48();
        let mut wd = selftest();
        run_to_completion(&mut wd, &mut d);
        assert_eq!(wd.reset_cause_snapshot(), ResetFlags::POWER_ON);
    }

    // ─── Faulty watchdogs ────────────────────────────────────────────────

    #[test]
    fn dead_watchdog_fails_without_reset() {
        let mut d = SimulatedDevice::avr64ea48();
        d.set_watchdog_behaviour(WatchdogBehaviour::Dead);
        let mut wd = selftest();
        assert_eq!(wd.run_startup_step(&mut d), Ok(()));
        assert_eq!(wd.result(), Verdict::Fail);
        assert_eq!(wd.measured_ticks(), CONFIG.max_ticks());
        assert_eq!(d.watchdog_resets(), 0);
    }

    #[test]
    fn ignored_counter_restart_fails() {
        let mut d = SimulatedDevice::avr64ea48();
        d.set_watchdog_behaviour(WatchdogBehaviour::IgnoresRestart);
        let mut wd = selftest();
        assert_eq!(run_to_completion(&mut wd, &mut d), 2);
        assert_eq!(wd.result(), Verdict::Fail);
    }

    #[test]
    fn reset_window_follows_tolerance() {
        assert_eq!((CONFIG.min_ticks(), CONFIG.max_ticks()), (55, 101));
        for (timeout, expected) in [
            (40, Verdict::Fail),
            (54, Verdict::Fail),
            (55, Verdict::Pass),
            (101, Verdict::Pass),
            (102, Verdict::Fail),
        ] {
            let mut d = with_timeout(timeout);
            let mut wd = selftest();
            run_to_completion(&mut wd, &mut d);
            assert_eq!(wd.result(), expected, "timeout {timeout}");
        }
    }

    #[test]
    fn fuse_locked_watchdog_is_restarted_not_armed() {
        let mut d = SimulatedDevice::avr64ea48();
        d.lock_watchdog();
        let mut wd = selftest();
        assert_eq!(run_to_completion(&mut wd, &mut d), 2);
        assert_eq!(wd.result(), Verdict::Pass);
        assert!((CONFIG.min_ticks()..=CONFIG.max_ticks()).contains(&wd.measured_ticks()));
        // still running after teardown
        assert!(d.watchdog_armed());
    }

    // ─── Interrupted and repeated runs ───────────────────────────────────

    #[test]
    fn external_reset_mid_test_restarts_it() {
        let mut d = SimulatedDevice::avr64ea48();
        let mut wd = selftest();
        assert_eq!(wd.run_startup_step(&mut d), Err(DeviceReset));
        d.external_reset();
        assert_eq!(run_to_completion(&mut wd, &mut d), 2);
        assert_eq!(wd.result(), Verdict::Pass);
        assert_eq!(
            wd.reset_cause_snapshot(),
            ResetFlags::WATCHDOG | ResetFlags::EXTERNAL
        );
    }

    #[test]
    fn later_watchdog_reset_starts_a_new_test() {
        let mut d = SimulatedDevice::avr64ea48();
        let mut wd = selftest();
        run_to_completion(&mut wd, &mut d);
        // Application hangs and the (re-armed) watchdog fires.
        d.arm_shortest_period();
        while d.wait_tick().is_ok() {}
        assert_eq!(run_to_completion(&mut wd, &mut d), 2);
        assert_eq!(wd.result(), Verdict::Pass);
        assert_eq!(wd.reset_cause_snapshot(), ResetFlags::WATCHDOG);
    }

    #[test]
    fn power_loss_mid_test_restarts_it_from_scratch() {
        let mut d = SimulatedDevice::avr64ea48();
        let mut wd = selftest();
        assert_eq!(wd.run_startup_step(&mut d), Err(DeviceReset));
        assert_eq!(wd.state(), Some(WatchdogTestState::TestCounterReset));

        // The retained cells do not survive power loss.
        d.power_cycle();
        let mut wd = selftest();
        assert_eq!(wd.state(), Some(WatchdogTestState::Uninitialized));
        assert_eq!(run_to_completion(&mut wd, &mut d), 2);
        assert_eq!(wd.result(), Verdict::Pass);
        assert_eq!(wd.reset_cause_snapshot(), ResetFlags::POWER_ON);
        assert_eq!(d.watchdog_resets(), 3);
    }

    #[test]
    fn power_on_flag_restarts_even_with_stale_cells() {
        let mut d = SimulatedDevice::avr64ea48();
        let mut wd = selftest();
        assert_eq!(wd.run_startup_step(&mut d), Err(DeviceReset));
        d.power_cycle();
        assert_eq!(run_to_completion(&mut wd, &mut d), 2);
        assert_eq!(wd.result(), Verdict::Pass);
        assert_eq!(wd.reset_cause_snapshot(), ResetFlags::POWER_ON);
    }

    #[test]
    fn step_without_any_reset_cause_fails() {
        let mut d = SimulatedDevice::avr64ea48();
        d.clear_reset_flags(ResetFlags::all());
        let mut wd = selftest();
        assert_eq!(wd.run_startup_step(&mut d), Ok(()));
        assert_eq!(wd.result(), Verdict::Fail);
    }

    // ─── Interrupt masking ───────────────────────────────────────────────

    /// Device wrapper counting ticks waited with interrupts enabled.
    struct InterruptAudit {
        device: SimulatedDevice,
        unmasked_ticks: u32,
    }

    impl Watchdog for InterruptAudit {
        fn is_locked(&self) -> bool {
            self.device.is_locked()
        }
        fn arm_shortest_period(&mut self) {
            self.device.arm_shortest_period();
        }
        fn disable(&mut self) {
            self.device.disable();
        }
        fn restart_counter(&mut self) {
            self.device.restart_counter();
        }
        fn reset_flags(&self) -> ResetFlags {
            self.device.reset_flags()
        }
        fn clear_reset_flags(&mut self, flags: ResetFlags) {
            self.device.clear_reset_flags(flags);
        }
    }

    impl TickTimer for InterruptAudit {
        fn start(&mut self) {
            self.device.start();
        }
        fn restart(&mut self) {
            self.device.restart();
        }
        fn stop(&mut self) {
            self.device.stop();
        }
        fn wait_tick(&mut self) -> Result<(), DeviceReset> {
            if self.device.interrupts_enabled() {
                self.unmasked_ticks += 1;
            }
            self.device.wait_tick()
        }
    }

    impl InterruptControl for InterruptAudit {
        fn interrupts_enabled(&self) -> bool {
            self.device.interrupts_enabled()
        }
        fn set_interrupts_enabled(&mut self, enabled: bool) {
            self.device.set_interrupts_enabled(enabled);
        }
    }

    #[test]
    fn every_step_waits_with_interrupts_masked() {
        let mut hal = InterruptAudit {
            device: SimulatedDevice::avr64ea48(),
            unmasked_ticks: 0,
        };
        let mut wd = selftest();
        let mut resets = 0;
        loop {
            hal.set_interrupts_enabled(true);
            match wd.run_startup_step(&mut hal) {
                Ok(()) => break,
                Err(DeviceReset) => {
                    // the reset left the CPU with interrupts off
                    assert!(!hal.interrupts_enabled());
                    resets += 1;
                    assert!(resets <= 4);
                }
            }
        }
        assert_eq!(resets, 2);
        assert_eq!(wd.result(), Verdict::Pass);
        assert!(hal.device.ticks_elapsed() > 0);
        assert_eq!(hal.unmasked_ticks, 0);
        assert!(hal.interrupts_enabled());
    }

    #[test]
    fn completed_step_keeps_interrupts_off_if_they_were() {
        let mut d = SimulatedDevice::avr64ea48();
        d.set_watchdog_behaviour(WatchdogBehaviour::Dead);
        d.set_interrupts_enabled(false);
        let mut wd = selftest();
        assert_eq!(wd.run_startup_step(&mut d), Ok(()));
        assert!(!d.interrupts_enabled());
    }

    // ─── Persisted-state corruption ──────────────────────────────────────

    #[test]
    fn corrupt_state_between_resets_fails() {
        let mut d = SimulatedDevice::avr64ea48();
        let mut wd = selftest();
        assert_eq!(wd.run_startup_step(&mut d), Err(DeviceReset));
        wd.state_cell_mut().corrupt_value(0x10);
        assert_eq!(wd.state(), None);
        assert_eq!(wd.run_startup_step(&mut d), Ok(()));
        assert_eq!(wd.result(), Verdict::Fail);
    }

    #[test]
    fn corrupt_result_reads_as_fail() {
        let mut d = SimulatedDevice::avr64ea48();
        let mut wd = selftest();
        run_to_completion(&mut wd, &mut d);
        wd.result_cell_mut().corrupt_inverse(0x01);
        assert_eq!(wd.result(), Verdict::Fail);
        assert!(wd.result_cell_mut().is_intact());
    }

    #[test]
    fn corrupt_snapshot_reads_as_invalid() {
        let mut d = SimulatedDevice::avr64ea48();
        let mut wd = selftest();
        run_to_completion(&mut wd, &mut d);
        wd.reset_flags_cell_mut().corrupt_value(0x04);
        assert_eq!(wd.reset_cause_snapshot(), ResetFlags::INVALID);
    }
}
