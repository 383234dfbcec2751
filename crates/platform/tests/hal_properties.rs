//! Property tests for the HAL building blocks the diagnostics rely on.
//!
//! Run with: cargo test -p platform --test hal_properties --features std

// Integration test file -- intentional test patterns permitted.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::cast_possible_truncation,
    missing_docs
)]

use embedded_storage::nor_flash::ReadNorFlash;
use platform::mocks::{SimulatedDevice, SimulatedFlash};
use platform::{flash, DataMemory, Duplicated, ResetFlags};
use proptest::prelude::*;

proptest! {
    /// Any corruption of either copy of a cell is noticed.
    #[test]
    fn duplicated_cell_detects_any_corruption(
        value in any::<u16>(),
        mask in 1u16..,
        inverse_side in any::<bool>(),
    ) {
        let mut cell = Duplicated::new(value);
        if inverse_side {
            cell.corrupt_inverse(mask);
        } else {
            cell.corrupt_value(mask);
        }
        prop_assert!(!cell.is_intact());
        prop_assert_eq!(cell.read(), None);
        prop_assert_eq!(cell.read_or_commit(0x5A5A), 0x5A5A);
        prop_assert_eq!(cell.read(), Some(0x5A5A));
    }

    /// Reset-cause snapshots survive the round trip bit for bit.
    #[test]
    fn reset_flags_survive_a_duplicated_cell(bits in any::<u8>()) {
        let flags = ResetFlags::from_bits_retain(bits);
        let cell = Duplicated::new(flags);
        prop_assert_eq!(cell.read(), Some(flags));
    }

    /// Patching flash changes exactly the patched bytes.
    #[test]
    fn flash_program_touches_only_the_target(
        offset in 0u32..0xFF00,
        data in proptest::collection::vec(any::<u8>(), 1..0x100),
    ) {
        let mut f = SimulatedFlash::new(0x1_0000);
        let image: Vec<u8> = (0..f.capacity()).map(|i| (i % 241) as u8).collect();
        f.load(0, &image);

        flash::program(&mut f, offset, &data).unwrap();

        let start = offset as usize;
        let end = start + data.len();
        prop_assert_eq!(&f.bytes()[..start], &image[..start]);
        prop_assert_eq!(&f.bytes()[start..end], &data[..]);
        prop_assert_eq!(&f.bytes()[end..], &image[end..]);
    }

    /// Data memory reads back what was written anywhere inside its bounds.
    #[test]
    fn clean_sram_reads_back_writes(addr in 0x6800u32..=0x7FFF, value in any::<u8>()) {
        let mut d = SimulatedDevice::avr64ea48();
        d.write_word(addr, value);
        prop_assert_eq!(d.read_word(addr), value);
    }
}
