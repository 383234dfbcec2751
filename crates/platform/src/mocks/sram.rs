//! Simulated SRAM array with injectable cell faults.

use crate::memory::MemoryBounds;

/// Maximum number of simultaneously injected SRAM faults.
pub const MAX_SRAM_FAULTS: usize = 16;

/// One bit of one word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    /// Word address.
    pub addr: u32,
    /// Bit index 0..=7.
    pub bit: u8,
}

impl Cell {
    /// Bit `bit` of the word at `addr`.
    pub const fn new(addr: u32, bit: u8) -> Self {
        Self { addr, bit }
    }

    fn mask(self) -> u8 {
        1u8.checked_shl(u32::from(self.bit)).unwrap_or(0)
    }
}

/// Fault models covered by March C-.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SramFault {
    /// The cell always reads and stores `level`.
    StuckAt {
        /// Faulty cell.
        cell: Cell,
        /// Stuck level.
        level: bool,
    },
    /// Any transition of the aggressor inverts the victim.
    Inversion {
        /// Cell whose writes disturb the victim.
        aggressor: Cell,
        /// Disturbed cell.
        victim: Cell,
    },
    /// A rising (or falling) transition of the aggressor forces the victim.
    Idempotent {
        /// Cell whose writes disturb the victim.
        aggressor: Cell,
        /// `true` for a 0→1 trigger, `false` for 1→0.
        rising: bool,
        /// Disturbed cell.
        victim: Cell,
        /// Level forced into the victim.
        forced: bool,
    },
    /// While the aggressor holds `when`, the victim reads as `forced`.
    State {
        /// Cell whose level disturbs the victim.
        aggressor: Cell,
        /// Aggressor level that activates the fault.
        when: bool,
        /// Disturbed cell.
        victim: Cell,
        /// Level the victim reads as.
        forced: bool,
    },
}

/// Word-addressed SRAM.
pub struct SimulatedSram {
    bounds: MemoryBounds,
    cells: Vec<u8>,
    faults: heapless::Vec<SramFault, MAX_SRAM_FAULTS>,
}

impl SimulatedSram {
    /// SRAM covering `bounds`, pre-loaded with a non-trivial pattern so a test
    /// that fails to restore content is visible.
    pub fn new(bounds: MemoryBounds) -> Self {
        let cells = (0..bounds.len())
            .map(|i| (i.wrapping_mul(31).wrapping_add(7) & 0xFF) as u8)
            .collect();
        Self {
            bounds,
            cells,
            faults: heapless::Vec::new(),
        }
    }

    /// Address bounds.
    pub fn bounds(&self) -> MemoryBounds {
        self.bounds
    }

    /// Add a fault; returns it back when the fault table is full.
    pub fn inject(&mut self, fault: SramFault) -> Result<(), SramFault> {
        self.faults.push(fault)
    }

    /// Remove every injected fault.
    pub fn clear_faults(&mut self) {
        self.faults.clear();
    }

    /// Stored content of `[start, start + len)`, bypassing read faults.
    pub fn raw(&self, start: u32, len: usize) -> &[u8] {
        let Some(offset) = self.offset(start) else {
            return &[];
        };
        let end = offset.saturating_add(len).min(self.cells.len());
        self.cells.get(offset..end).unwrap_or(&[])
    }

    /// Fill the whole array with `value`, bypassing faults.
    pub fn fill(&mut self, value: u8) {
        self.cells.iter_mut().for_each(|c| *c = value);
    }

    pub(crate) fn read(&self, addr: u32) -> u8 {
        let Some(mut value) = self.offset(addr).and_then(|o| self.cells.get(o).copied()) else {
            return 0;
        };
        for fault in &self.faults {
            if let SramFault::State {
                aggressor,
                when,
                victim,
                forced,
            } = *fault
            {
                if victim.addr == addr && self.stored_bit(aggressor) == when {
                    value = set_bit(value, victim.mask(), forced);
                }
            }
        }
        self.apply_stuck(addr, value)
    }

    pub(crate) fn write(&mut self, addr: u32, value: u8) {
        let Some(offset) = self.offset(addr) else {
            return;
        };
        let old = self.cells.get(offset).copied().unwrap_or(0);
        let new = self.apply_stuck(addr, value);
        if let Some(c) = self.cells.get_mut(offset) {
            *c = new;
        }

        let disturbs: heapless::Vec<(Cell, Option<bool>), MAX_SRAM_FAULTS> = self
            .faults
            .iter()
            .filter_map(|fault| match *fault {
                SramFault::Inversion { aggressor, victim } if aggressor.addr == addr => {
                    let m = aggressor.mask();
                    ((old ^ new) & m != 0).then_some((victim, None))
                }
                SramFault::Idempotent {
                    aggressor,
                    rising,
                    victim,
                    forced,
                } if aggressor.addr == addr => {
                    let m = aggressor.mask();
                    let toggled = (old ^ new) & m != 0;
                    let now_high = new & m != 0;
                    (toggled && now_high == rising).then_some((victim, Some(forced)))
                }
                _ => None,
            })
            .collect();

        for (victim, forced) in disturbs {
            let Some(vo) = self.offset(victim.addr) else {
                continue;
            };
            let current = self.cells.get(vo).copied().unwrap_or(0);
            let disturbed = match forced {
                None => current ^ victim.mask(),
                Some(level) => set_bit(current, victim.mask(), level),
            };
            let settled = self.apply_stuck(victim.addr, disturbed);
            if let Some(c) = self.cells.get_mut(vo) {
                *c = settled;
            }
        }
    }

    fn offset(&self, addr: u32) -> Option<usize> {
        if self.bounds.contains(addr) {
            usize::try_from(addr.wrapping_sub(self.bounds.first())).ok()
        } else {
            None
        }
    }

    fn stored_bit(&self, cell: Cell) -> bool {
        self.offset(cell.addr)
            .and_then(|o| self.cells.get(o))
            .is_some_and(|v| v & cell.mask() != 0)
    }

    fn apply_stuck(&self, addr: u32, mut value: u8) -> u8 {
        for fault in &self.faults {
            if let SramFault::StuckAt { cell, level } = *fault {
                if cell.addr == addr {
                    value = set_bit(value, cell.mask(), level);
                }
            }
        }
        value
    }
}

fn set_bit(value: u8, mask: u8, level: bool) -> u8 {
    if level {
        value | mask
    } else {
        value & !mask
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

    fn sram() -> SimulatedSram {
        SimulatedSram::new(MemoryBounds::new(0x100, 0x1FF))
    }

    #[test]
    fn stuck_at_one_survives_writes() {
        let mut s = sram();
        s.inject(SramFault::StuckAt {
            cell: Cell::new(0x120, 3),
            level: true,
        })
        .unwrap();
        s.write(0x120, 0x00);
        assert_eq!(s.read(0x120), 0x08);
    }

    #[test]
    fn inversion_coupling_flips_victim_on_each_transition() {
        let mut s = sram();
        s.fill(0);
        s.inject(SramFault::Inversion {
            aggressor: Cell::new(0x110, 0),
            victim: Cell::new(0x150, 7),
        })
        .unwrap();
        s.write(0x110, 0x01);
        assert_eq!(s.read(0x150), 0x80);
        s.write(0x110, 0x01); // no transition
        assert_eq!(s.read(0x150), 0x80);
        s.write(0x110, 0x00);
        assert_eq!(s.read(0x150), 0x00);
    }

    #[test]
    fn idempotent_coupling_only_on_selected_edge() {
        let mut s = sram();
        s.fill(0xFF);
        s.inject(SramFault::Idempotent {
            aggressor: Cell::new(0x110, 1),
            rising: true,
            victim: Cell::new(0x111, 1),
            forced: false,
        })
        .unwrap();
        s.write(0x110, 0x00); // falling: no effect
        assert_eq!(s.read(0x111), 0xFF);
        s.write(0x110, 0x02); // rising: victim forced low
        assert_eq!(s.read(0x111), 0xFD);
    }

    #[test]
    fn state_coupling_masks_reads_only() {
        let mut s = sram();
        s.fill(0);
        s.inject(SramFault::State {
            aggressor: Cell::new(0x100, 0),
            when: true,
            victim: Cell::new(0x101, 0),
            forced: true,
        })
        .unwrap();
        assert_eq!(s.read(0x101), 0x00);
        s.write(0x100, 0x01);
        assert_eq!(s.read(0x101), 0x01);
        assert_eq!(s.raw(0x101, 1), &[0x00]);
    }

    #[test]
    fn out_of_bounds_access_is_inert() {
        let mut s = sram();
        s.write(0x200, 0xAA);
        assert_eq!(s.read(0x200), 0);
        assert!(s.raw(0x50, 4).is_empty());
    }
}
