//! Non-destructive sectioned test, one section per call.
//!
//! Section `i` starts at `region.start + i * (section - overlap)`. The words
//! of section `i` not already covered by the backup buffer are copied into
//! the buffer at the start of the region, the section is marched, and the
//! copy is put back. Sections that reach past the stack pointer run on the
//! scratch stack that follows the buffer.
//!
//! Section 0 contains the buffer and scratch stack themselves; its content is
//! not preserved.

use platform::{Cpu, DataMemory, InterruptControl, InterruptFreeSection};

use super::{elements, verdict_of, SramMarchTest};
use crate::log::{diag_trace, diag_warn};
use crate::verdict::Verdict;

impl SramMarchTest {
    /// Test the next section and advance, wrapping after the last one.
    ///
    /// Interrupts are off for the whole call. Content outside section 0 is
    /// restored before returning, whatever the verdict; so is the stack
    /// pointer.
    pub fn run_periodic_slice<H>(&mut self, hal: &mut H) -> Verdict
    where
        H: DataMemory + Cpu + InterruptControl,
    {
        let layout = self.layout;
        let index = self.section_index;
        let count = layout.section_count();
        let section = layout.section_size;
        let Some((start, last)) = (index < count)
            .then(|| layout.section_start(index))
            .flatten()
            .and_then(|s| Some((s, s.checked_add(section.saturating_sub(1))?)))
        else {
            diag_warn!("march periodic: section {} out of range", index);
            self.section_index = 0;
            return Verdict::InvalidArgument;
        };
        diag_trace!("march periodic: section {} of {} at {:#x}", index, count, start);

        // Words already shared with the buffer need no copy.
        let copied = section.min(layout.step().saturating_mul(index));
        let first_copied = start.saturating_add(section.saturating_sub(copied));
        let buffer = layout.backup_buffer();

        let mut guard = InterruptFreeSection::enter(hal);
        copy_words(&mut *guard, first_copied, buffer, copied);

        let saved_sp = guard.stack_pointer();
        let redirect = start.saturating_add(section) > u32::from(saved_sp);
        if redirect {
            let scratch_top = layout.scratch_stack_top();
            guard.set_stack_pointer(u16::try_from(scratch_top).unwrap_or(saved_sp));
        }

        let verdict = verdict_of(elements::run(&mut *guard, start, last));

        copy_words(&mut *guard, buffer, first_copied, copied);
        if redirect {
            guard.set_stack_pointer(saved_sp);
        }
        drop(guard);

        self.section_index = index.saturating_add(1).checked_rem(count).unwrap_or(0);
        verdict
    }
}

fn copy_words<M: DataMemory + ?Sized>(mem: &mut M, from: u32, to: u32, count: u32) {
    for offset in 0..count {
        let value = mem.read_word(from.wrapping_add(offset));
        mem.write_word(to.wrapping_add(offset), value);
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
    use crate::config::{DiagnosticsConfig, SramTestLayout};
    use platform::mocks::{Cell, SimulatedDevice, SramFault};
    use platform::AddressRange;

    const LAYOUT: SramTestLayout = DiagnosticsConfig::AVR64EA48_GAS_MONITOR.sram;

    fn engine() -> SramMarchTest {
        SramMarchTest::new(LAYOUT).unwrap()
    }

    /// Device whose stack pointer lies in the last section only.
    fn device() -> SimulatedDevice {
        let mut d = SimulatedDevice::avr64ea48();
        d.set_stack_pointer(0x7F80);
        d
    }

    // ─── Sweep bookkeeping ───────────────────────────────────────────────

    #[test]
    fn sweeps_24_sections_then_wraps() {
        let mut d = device();
        let mut m = engine();
        for expected in 0..24 {
            assert_eq!(m.section_index(), expected);
            assert_eq!(m.run_periodic_slice(&mut d), Verdict::Pass);
        }
        assert_eq!(m.section_index(), 0);
        // 25th call retests the first section.
        assert_eq!(m.run_periodic_slice(&mut d), Verdict::Pass);
        assert_eq!(m.section_index(), 1);
    }

    #[test]
    fn fault_is_found_when_its_section_comes_round() {
        let mut d = device();
        d.sram()
            .inject(SramFault::StuckAt {
                cell: Cell::new(0x6C34, 2),
                level: true,
            })
            .unwrap();
        let mut m = engine();
        let verdicts: Vec<_> = (0..24).map(|_| m.run_periodic_slice(&mut d)).collect();
        // 0x6C34 lies in section 4.
        for (i, v) in verdicts.iter().enumerate() {
            let expected = if i == 4 { Verdict::Fail } else { Verdict::Pass };
            assert_eq!(*v, expected, "section {i}");
        }
    }

    // ─── Content preservation ────────────────────────────────────────────

    #[test]
    fn sections_after_the_first_are_restored() {
        let mut d = device();
        let mut m = engine();
        let _ = m.run_periodic_slice(&mut d); // section 0: buffer and scratch
        let reserved = LAYOUT.section_size + LAYOUT.scratch_stack;
        let before = d.sram().raw(0x6800 + reserved, 0x1800 - reserved as usize).to_vec();
        for _ in 1..24 {
            assert_eq!(m.run_periodic_slice(&mut d), Verdict::Pass);
        }
        let after = d.sram().raw(0x6800 + reserved, 0x1800 - reserved as usize).to_vec();
        assert_eq!(before, after);
    }

    #[test]
    fn failing_section_is_still_restored() {
        let mut d = device();
        let mut m = engine();
        let _ = m.run_periodic_slice(&mut d);
        let before = d.sram().raw(0x6900, 0x100).to_vec();
        d.sram()
            .inject(SramFault::State {
                aggressor: Cell::new(0x6910, 0),
                when: true,
                victim: Cell::new(0x6911, 0),
                forced: false,
            })
            .unwrap();
        assert_eq!(m.run_periodic_slice(&mut d), Verdict::Fail);
        assert_eq!(d.sram().raw(0x6900, 0x100), &before[..]);
    }

    #[test]
    fn overlapping_sections_restore_content() {
        let layout = SramTestLayout {
            region: AddressRange::new(0x6800, 0x1710),
            section_size: 0x110,
            overlap: 0x10,
            ..LAYOUT
        };
        let mut d = device();
        let mut m = SramMarchTest::new(layout).unwrap();
        assert_eq!(layout.section_count(), 23);
        let _ = m.run_periodic_slice(&mut d);
        let keep_from = 0x6800 + 0x120;
        let before = d.sram().raw(keep_from, 0x1710 - 0x120).to_vec();
        for _ in 1..23 {
            assert_eq!(m.run_periodic_slice(&mut d), Verdict::Pass);
        }
        assert_eq!(d.sram().raw(keep_from, 0x1710 - 0x120), &before[..]);
        assert_eq!(m.section_index(), 0);
    }

    // ─── Stack handling ──────────────────────────────────────────────────

    #[test]
    fn live_stack_frame_is_never_written() {
        let mut d = device();
        let mut m = engine();
        for _ in 0..23 {
            let _ = m.run_periodic_slice(&mut d);
        }
        // Section 23 covers 0x7F00..=0x7FFF and the stack pointer.
        d.guard_stack_frame(0x20);
        assert_eq!(m.run_periodic_slice(&mut d), Verdict::Pass);
        assert_eq!(d.stack_frame_writes(), 0);
        assert_eq!(d.stack_pointer(), 0x7F80);
    }

    #[test]
    fn stack_pointer_untouched_below_the_stack() {
        let mut d = device();
        let mut m = engine();
        let _ = m.run_periodic_slice(&mut d);
        d.guard_stack_frame(0x20);
        assert_eq!(m.run_periodic_slice(&mut d), Verdict::Pass);
        assert_eq!(d.stack_frame_writes(), 0);
        assert_eq!(d.stack_pointer(), 0x7F80);
    }

    #[test]
    fn interrupts_are_restored_after_each_slice() {
        let mut d = device();
        d.set_interrupts_enabled(true);
        let mut m = engine();
        let _ = m.run_periodic_slice(&mut d);
        assert!(d.interrupts_enabled());
    }
}
