//! SRAM March engine properties against the simulated SRAM.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    missing_docs
)]

use diagnostics::{DiagnosticsConfig, MarchMode, SramMarchTest, Verdict};
use platform::mocks::{Cell, SimulatedDevice, SramFault};
use platform::Cpu;
use proptest::prelude::*;

const LAYOUT: diagnostics::SramTestLayout = DiagnosticsConfig::AVR64EA48_GAS_MONITOR.sram;

/// Two cells of the same section.
fn cell_pair() -> impl Strategy<Value = (Cell, Cell)> {
    (0..LAYOUT.section_count(), 0..LAYOUT.section_size, 0u8..8, 0..LAYOUT.section_size, 0u8..8)
        .prop_map(|(section, a, a_bit, v, v_bit)| {
            let base = 0x6800 + section * LAYOUT.section_size;
            (Cell::new(base + a, a_bit), Cell::new(base + v, v_bit))
        })
        .prop_filter("distinct cells", |(a, v)| a != v)
}

fn sram_fault() -> impl Strategy<Value = SramFault> {
    prop_oneof![
        (cell_pair(), any::<bool>())
            .prop_map(|((cell, _), level)| SramFault::StuckAt { cell, level }),
        cell_pair().prop_map(|(aggressor, victim)| SramFault::Inversion { aggressor, victim }),
        (cell_pair(), any::<bool>(), any::<bool>()).prop_map(
            |((aggressor, victim), rising, forced)| SramFault::Idempotent {
                aggressor,
                rising,
                victim,
                forced,
            }
        ),
    ]
}

fn victim_of(fault: &SramFault) -> Cell {
    match *fault {
        SramFault::StuckAt { cell, .. } => cell,
        SramFault::Inversion { victim, .. }
        | SramFault::Idempotent { victim, .. }
        | SramFault::State { victim, .. } => victim,
    }
}

#[test]
fn startup_then_sweep_passes_on_clean_memory() {
    let mut d = SimulatedDevice::avr64ea48();
    let mut m = SramMarchTest::new(LAYOUT).unwrap();
    assert_eq!(m.run_at_startup(&mut d), Verdict::Undefined);
    assert_eq!(m.startup_result(), Verdict::Pass);
    for _ in 0..LAYOUT.section_count() {
        assert_eq!(m.run_periodic_slice(&mut d), Verdict::Pass);
    }
}

/// Failing slices in one full sweep of `layout` with `fault` injected.
fn sweep_failures(layout: diagnostics::SramTestLayout, fault: SramFault) -> Vec<u32> {
    let mut d = SimulatedDevice::avr64ea48();
    d.sram().inject(fault).unwrap();
    let mut m = SramMarchTest::new(layout).unwrap();
    (0..layout.section_count())
        .filter(|_| m.run_periodic_slice(&mut d) == Verdict::Fail)
        .collect()
}

#[test]
fn overlap_catches_coupling_across_a_section_boundary() {
    let straddling = SramFault::Inversion {
        aggressor: Cell::new(0x6AFF, 0),
        victim: Cell::new(0x6B00, 0),
    };

    // Sections 2 and 3 meet between the two cells; neither sees both.
    assert!(sweep_failures(LAYOUT, straddling).is_empty());

    let overlapping = diagnostics::SramTestLayout {
        region: platform::AddressRange::new(0x6800, 0x1710),
        section_size: 0x110,
        overlap: 0x10,
        ..LAYOUT
    };
    // Section 2 now spans 0x6A00..=0x6B0F and holds the pair.
    assert_eq!(sweep_failures(overlapping, straddling), vec![2]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// A fault confined to one section is found by the slice covering it and
    /// by the full startup run.
    #[test]
    fn any_fault_within_a_section_is_detected(fault in sram_fault()) {
        let victim = victim_of(&fault);
        let mut d = SimulatedDevice::avr64ea48();
        d.sram().inject(fault).unwrap();
        let mut m = SramMarchTest::new(LAYOUT).unwrap();

        let _ = m.run_at_startup(&mut d);
        prop_assert_eq!(m.startup_result(), Verdict::Fail);

        let verdicts: Vec<Verdict> = (0..LAYOUT.section_count())
            .map(|_| m.run_periodic_slice(&mut d))
            .collect();
        let section = ((victim.addr - 0x6800) / LAYOUT.section_size) as usize;
        prop_assert_eq!(verdicts[section], Verdict::Fail);
    }

    /// Partial mode returns a verdict and clean memory passes wherever the
    /// range lies.
    #[test]
    fn partial_march_passes_clean_ranges(start in 0x6800u32..0x7F00, length in 2u32..0x100) {
        let mut d = SimulatedDevice::avr64ea48();
        let mut m = SramMarchTest::new(LAYOUT).unwrap();
        prop_assert_eq!(m.march_test(&mut d, start, length, MarchMode::Partial), Verdict::Pass);
    }

    /// Every slice past the first leaves the rest of the region untouched.
    #[test]
    fn periodic_slices_preserve_content(fill in any::<u8>(), slices in 1usize..48) {
        let mut d = SimulatedDevice::avr64ea48();
        d.set_stack_pointer(0x7F80);
        let mut m = SramMarchTest::new(LAYOUT).unwrap();
        let _ = m.run_periodic_slice(&mut d);
        d.sram().fill(fill);
        let reserved = LAYOUT.section_size + LAYOUT.scratch_stack;
        let keep = 0x6800 + reserved;
        let before = d.sram().raw(keep, (0x1800 - reserved) as usize).to_vec();
        for _ in 0..slices {
            if m.section_index() == 0 {
                // section 0 is scratch
                let _ = m.run_periodic_slice(&mut d);
                continue;
            }
            prop_assert_eq!(m.run_periodic_slice(&mut d), Verdict::Pass);
        }
        prop_assert_eq!(d.sram().raw(keep, (0x1800 - reserved) as usize), &before[..]);
    }
}
