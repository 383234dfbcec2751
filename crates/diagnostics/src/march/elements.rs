//! March C- element table at word granularity.
//!
//! Bits of a word cannot be addressed one at a time, so the classic bit-level
//! March C- is run twice: once with all-zero/all-one words to find faults
//! between words (M0..M4), then with complementary intra-word backgrounds to
//! find faults between bits of the same word (M5..M14).
//!
//! ```text
//! M0  ⇕ (w00)
//! M1  ⇑ (r00, wFF)   M2  ⇑ (rFF, w00)   M3  ⇓ (r00, wFF)   M4  ⇓ (rFF, w00)
//! M5  ⇓ (r00, w55)   M6  ⇑ (r55, wAA)   M7  ⇓ (rAA, w55)
//! M8  ⇑ (r55, w33)   M9  ⇓ (r33, wCC)   M10 ⇑ (rCC, w33)
//! M11 ⇓ (r33, w0F)   M12 ⇑ (r0F, wF0)   M13 ⇓ (rF0, w0F)   M14 ⇑ (r0F)
//! ```

use platform::DataMemory;

/// Address order of one element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Lowest address first.
    Up,
    /// Highest address first.
    Down,
}

/// One March element: optional read-and-compare, then optional write, applied
/// to each word in `direction` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarchElement {
    /// Traversal order.
    pub direction: Direction,
    /// Expected content, if the element reads.
    pub read: Option<u8>,
    /// Content written after the read.
    pub write: Option<u8>,
}

const fn element(direction: Direction, read: Option<u8>, write: Option<u8>) -> MarchElement {
    MarchElement {
        direction,
        read,
        write,
    }
}

use Direction::{Down, Up};

/// The fifteen elements, in execution order.
pub const MARCH_C_MINUS: [MarchElement; 15] = [
    element(Up, None, Some(0x00)),
    // Inter-word
    element(Up, Some(0x00), Some(0xFF)),
    element(Up, Some(0xFF), Some(0x00)),
    element(Down, Some(0x00), Some(0xFF)),
    element(Down, Some(0xFF), Some(0x00)),
    // Intra-word
    element(Down, Some(0x00), Some(0x55)),
    element(Up, Some(0x55), Some(0xAA)),
    element(Down, Some(0xAA), Some(0x55)),
    element(Up, Some(0x55), Some(0x33)),
    element(Down, Some(0x33), Some(0xCC)),
    element(Up, Some(0xCC), Some(0x33)),
    element(Down, Some(0x33), Some(0x0F)),
    element(Up, Some(0x0F), Some(0xF0)),
    element(Down, Some(0xF0), Some(0x0F)),
    element(Up, Some(0x0F), None),
];

/// Where a March run found its first fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarchFault {
    /// Index of the element (0..=14).
    pub element: usize,
    /// Faulty word.
    pub addr: u32,
    /// Expected content.
    pub expected: u8,
    /// Content read.
    pub found: u8,
}

/// Run every element over `first..=last`, stopping at the first mismatch.
///
/// Destroys the content of the range; the caller backs it up if needed.
pub fn run<M: DataMemory + ?Sized>(mem: &mut M, first: u32, last: u32) -> Result<(), MarchFault> {
    for (index, el) in MARCH_C_MINUS.iter().enumerate() {
        match el.direction {
            Up => apply(mem, index, el, first..=last)?,
            Down => apply(mem, index, el, (first..=last).rev())?,
        }
    }
    Ok(())
}

fn apply<M, I>(mem: &mut M, index: usize, el: &MarchElement, addrs: I) -> Result<(), MarchFault>
where
    M: DataMemory + ?Sized,
    I: Iterator<Item = u32>,
{
    for addr in addrs {
        if let Some(expected) = el.read {
            let found = mem.read_word(addr);
            if found != expected {
                return Err(MarchFault {
                    element: index,
                    addr,
                    expected,
                    found,
                });
            }
        }
        if let Some(value) = el.write {
            mem.write_word(addr, value);
        }
    }
    Ok(())
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
    use platform::mocks::{Cell, SimulatedDevice, SramFault};

    const FIRST: u32 = 0x7000;
    const LAST: u32 = 0x70FF;

    fn faulty(fault: SramFault) -> Option<MarchFault> {
        let mut d = SimulatedDevice::avr64ea48();
        d.sram().inject(fault).unwrap();
        run(&mut d, FIRST, LAST).err()
    }

    #[test]
    fn each_element_reads_what_the_previous_wrote() {
        for pair in MARCH_C_MINUS.windows(2) {
            assert_eq!(pair[1].read, pair[0].write);
        }
        assert_eq!(MARCH_C_MINUS[0].read, None);
        assert_eq!(MARCH_C_MINUS[14].write, None);
    }

    #[test]
    fn clean_memory_passes_and_ends_at_0f() {
        let mut d = SimulatedDevice::avr64ea48();
        run(&mut d, FIRST, LAST).unwrap();
        assert!(d.sram().raw(FIRST, 0x100).iter().all(|&b| b == 0x0F));
    }

    #[test]
    fn stuck_at_zero_and_one_are_found() {
        for level in [false, true] {
            for bit in 0..8 {
                let fault = faulty(SramFault::StuckAt {
                    cell: Cell::new(0x7042, bit),
                    level,
                });
                assert_eq!(fault.map(|f| f.addr), Some(0x7042), "bit {bit} level {level}");
            }
        }
    }

    #[test]
    fn inter_word_inversion_coupling_is_found() {
        for (aggressor, victim) in [(0x7010, 0x7080), (0x7080, 0x7010)] {
            let fault = faulty(SramFault::Inversion {
                aggressor: Cell::new(aggressor, 0),
                victim: Cell::new(victim, 0),
            });
            assert!(fault.is_some(), "aggressor {aggressor:#x} victim {victim:#x}");
        }
    }

    #[test]
    fn inter_word_idempotent_coupling_is_found() {
        for (aggressor, victim) in [(0x7010, 0x7080), (0x7080, 0x7010)] {
            for rising in [false, true] {
                for forced in [false, true] {
                    let fault = faulty(SramFault::Idempotent {
                        aggressor: Cell::new(aggressor, 5),
                        rising,
                        victim: Cell::new(victim, 5),
                        forced,
                    });
                    assert!(fault.is_some(), "rising {rising} forced {forced}");
                }
            }
        }
    }

    #[test]
    fn intra_word_coupling_is_found() {
        for (a, v) in [(0u8, 1u8), (1, 0), (2, 6), (7, 3)] {
            for forced in [false, true] {
                let fault = faulty(SramFault::Idempotent {
                    aggressor: Cell::new(0x7020, a),
                    rising: true,
                    victim: Cell::new(0x7020, v),
                    forced,
                });
                assert!(fault.is_some(), "bits {a}->{v} forced {forced}");
            }
        }
    }

    #[test]
    fn state_coupling_is_found() {
        for when in [false, true] {
            for forced in [false, true] {
                let fault = faulty(SramFault::State {
                    aggressor: Cell::new(0x7001, 2),
                    when,
                    victim: Cell::new(0x7002, 4),
                    forced,
                });
                assert!(fault.is_some(), "when {when} forced {forced}");
            }
        }
    }

    #[test]
    fn faults_outside_the_range_are_not_seen() {
        assert_eq!(
            faulty(SramFault::StuckAt {
                cell: Cell::new(0x7100, 0),
                level: true,
            }),
            None
        );
    }
}
