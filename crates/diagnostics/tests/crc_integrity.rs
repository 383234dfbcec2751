//! CRC engine against the simulated flash and EEPROM.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    missing_docs
)]

use diagnostics::crc::{checksum, EepromPort, FlashPort};
use diagnostics::{CrcAlgorithm, CrcIntegrity, CrcParams, DiagnosticsConfig, Verdict};
use platform::mocks::SimulatedDevice;
use platform::{AddressRange, DiagnosticsHal, EepromMemory, InterruptControl, MemorySpace};
use proptest::prelude::*;

const REFERENCE: DiagnosticsConfig = DiagnosticsConfig::AVR64EA48_GAS_MONITOR;

fn image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_mul(7) ^ (i >> 5)) as u8).collect()
}

fn calibration() -> Vec<u8> {
    (0u8..=254).map(|i| i.wrapping_mul(13).wrapping_add(1)).collect()
}

fn device_with_image() -> SimulatedDevice {
    let mut d = SimulatedDevice::avr64ea48();
    d.flash.load(0, &image(REFERENCE.flash.region.length as usize));
    d
}

// ─── Whole-device entry points ───────────────────────────────────────────────

#[test]
fn device_entry_points_mask_interrupts_and_restore_them() {
    let mut d = device_with_image();
    d.eeprom.load(REFERENCE.eeprom.region.start, &calibration());
    d.set_interrupts_enabled(true);

    for cfg in [REFERENCE.flash, REFERENCE.eeprom] {
        assert_eq!(cfg.store_on(&mut d), Verdict::Pass);
        assert_eq!(cfg.validate_on(&mut d), Verdict::Pass);
    }
    assert_eq!(d.unmasked_nvm_accesses(), 0);
    assert!(d.interrupts_enabled());

    // a bare accessor call is what the audit is there to catch
    let _ = d.flash();
    assert_eq!(d.unmasked_nvm_accesses(), 1);
}

#[test]
fn device_entry_points_reject_data_memory() {
    let mut d = SimulatedDevice::avr64ea48();
    let cfg = diagnostics::CrcRegionConfig {
        space: MemorySpace::Data,
        ..REFERENCE.eeprom
    };
    assert_eq!(cfg.validate_on(&mut d), Verdict::InvalidArgument);
    assert_eq!(cfg.store_on(&mut d), Verdict::InvalidArgument);
}

// ─── Flash, CRC-32 ───────────────────────────────────────────────────────────

#[test]
fn flash_checksum_is_stored_big_endian() {
    let mut d = device_with_image();
    let cfg = REFERENCE.flash;
    let engine = cfg.engine();
    assert_eq!(
        engine.calculate_and_store(&mut FlashPort::new(&mut d.flash), cfg.region, cfg.store_addr),
        Verdict::Pass
    );
    let expected = crc32fast::hash(&image(cfg.region.length as usize));
    assert_eq!(&d.flash.bytes()[0xFFFC..], &expected.to_be_bytes());
    // image untouched by the page patch
    assert_eq!(
        &d.flash.bytes()[..cfg.region.length as usize],
        &image(cfg.region.length as usize)[..]
    );
}

#[test]
fn flash_round_trip_then_bit_flip() {
    let mut d = device_with_image();
    let cfg = REFERENCE.flash;
    let engine = cfg.engine();
    let _ = engine.calculate_and_store(&mut FlashPort::new(&mut d.flash), cfg.region, cfg.store_addr);
    assert_eq!(
        engine.validate(&mut FlashPort::new(&mut d.flash), cfg.region, cfg.store_addr),
        Verdict::Pass
    );

    d.flash.flip_bit(0x1234, 6);
    assert_eq!(
        engine.validate(&mut FlashPort::new(&mut d.flash), cfg.region, cfg.store_addr),
        Verdict::Fail
    );
}

#[test]
fn flash_crc16_variant_stores_two_bytes() {
    let mut d = device_with_image();
    let engine = CrcIntegrity::new(CrcParams::CRC16_CCITT, CrcAlgorithm::Table);
    let region = AddressRange::new(0, 0x400);
    assert_eq!(
        engine.calculate_and_store(&mut FlashPort::new(&mut d.flash), region, 0xFFFE),
        Verdict::Pass
    );
    let expected = checksum(CrcParams::CRC16_CCITT, CrcAlgorithm::Bitwise, &image(0x400));
    assert_eq!(&d.flash.bytes()[0xFFFE..], &(expected as u16).to_be_bytes());
    assert_eq!(d.flash.bytes()[0xFFFC], 0xFF);
    assert_eq!(
        engine.validate(&mut FlashPort::new(&mut d.flash), region, 0xFFFE),
        Verdict::Pass
    );
}

#[test]
fn flash_erase_failure_is_a_store_error() {
    let mut d = device_with_image();
    d.flash.fail_erase = true;
    let cfg = REFERENCE.flash;
    assert_eq!(
        cfg.engine()
            .calculate_and_store(&mut FlashPort::new(&mut d.flash), cfg.region, cfg.store_addr),
        Verdict::NonVolatileStoreError
    );
}

#[test]
fn flash_write_failure_is_a_store_error() {
    let mut d = device_with_image();
    d.flash.fail_write = true;
    let cfg = REFERENCE.flash;
    assert_eq!(
        cfg.engine()
            .calculate_and_store(&mut FlashPort::new(&mut d.flash), cfg.region, cfg.store_addr),
        Verdict::NonVolatileStoreError
    );
}

// ─── EEPROM, CRC-16 ──────────────────────────────────────────────────────────

#[test]
fn eeprom_round_trip_then_bit_flip() {
    let mut d = SimulatedDevice::avr64ea48();
    let cfg = REFERENCE.eeprom;
    d.eeprom.load(0x1400, &calibration());
    let engine = cfg.engine();

    assert_eq!(
        engine.calculate_and_store(&mut EepromPort::new(&mut d.eeprom), cfg.region, cfg.store_addr),
        Verdict::Pass
    );
    assert_eq!(d.eeprom.write_count(), 2);
    let expected = checksum(CrcParams::CRC16_CCITT, CrcAlgorithm::Bitwise, &calibration()) as u16;
    let mut port = EepromPort::new(&mut d.eeprom);
    assert_eq!(engine.validate(&mut port, cfg.region, cfg.store_addr), Verdict::Pass);

    let [high, low] = expected.to_be_bytes();
    assert_eq!(d.eeprom.read_byte(0x15FE), high);
    assert_eq!(d.eeprom.read_byte(0x15FF), low);

    d.eeprom.flip_bit(0x14A0, 0);
    assert_eq!(
        engine.validate(&mut EepromPort::new(&mut d.eeprom), cfg.region, cfg.store_addr),
        Verdict::Fail
    );
}

#[test]
fn uncalibrated_eeprom_fails_validation() {
    let mut d = SimulatedDevice::avr64ea48();
    let cfg = REFERENCE.eeprom;
    assert_eq!(
        cfg.engine()
            .validate(&mut EepromPort::new(&mut d.eeprom), cfg.region, cfg.store_addr),
        Verdict::Fail
    );
}

#[test]
fn eeprom_controller_error_is_a_store_error() {
    let mut d = SimulatedDevice::avr64ea48();
    d.eeprom.fail_writes = true;
    let cfg = REFERENCE.eeprom;
    assert_eq!(
        cfg.engine()
            .calculate_and_store(&mut EepromPort::new(&mut d.eeprom), cfg.region, cfg.store_addr),
        Verdict::NonVolatileStoreError
    );
}

#[test]
fn eeprom_dropped_write_fails_verification() {
    let mut d = SimulatedDevice::avr64ea48();
    let cfg = REFERENCE.eeprom;
    d.eeprom.load(0x1400, &calibration());
    // Pre-load the complement so a dropped write cannot verify by accident.
    let crc = checksum(CrcParams::CRC16_CCITT, CrcAlgorithm::Bitwise, &calibration()) as u16;
    d.eeprom.load(0x15FE, &(!crc).to_be_bytes());
    d.eeprom.drop_writes = true;
    assert_eq!(
        cfg.engine()
            .calculate_and_store(&mut EepromPort::new(&mut d.eeprom), cfg.region, cfg.store_addr),
        Verdict::NonVolatileStoreError
    );
    // Gave up after the first (low) byte.
    assert_eq!(d.eeprom.write_count(), 1);
}

// ─── Argument rejection ──────────────────────────────────────────────────────

#[test]
fn bad_arguments_are_rejected_for_both_widths() {
    let mut d = device_with_image();
    for engine in [
        CrcIntegrity::new(CrcParams::CRC32, CrcAlgorithm::Bitwise),
        CrcIntegrity::new(CrcParams::CRC16_CCITT, CrcAlgorithm::Bitwise),
    ] {
        let width = engine.params().width.bytes();
        let cases = [
            // empty region
            (AddressRange::new(0x100, 0), 0xFF00),
            // region past the end of flash
            (AddressRange::new(0xFF00, 0x200), 0x0000),
            // store inside the region
            (AddressRange::new(0x100, 0x100), 0x180),
            // store straddling the region start
            (AddressRange::new(0x100, 0x100), 0x100 - width + 1),
            // store straddling the end of flash
            (AddressRange::new(0x100, 0x100), 0x1_0000 - width + 1),
        ];
        for (region, store) in cases {
            let mut port = FlashPort::new(&mut d.flash);
            assert_eq!(
                engine.calculate_and_store(&mut port, region, store),
                Verdict::InvalidArgument,
                "store {region:?} at {store:#x}"
            );
            assert_eq!(
                engine.validate(&mut port, region, store),
                Verdict::InvalidArgument,
                "validate {region:?} at {store:#x}"
            );
        }
        // directly adjacent on either side is fine
        let mut port = FlashPort::new(&mut d.flash);
        let region = AddressRange::new(0x100, 0x100);
        assert_eq!(engine.calculate_and_store(&mut port, region, 0x200), Verdict::Pass);
        assert_eq!(engine.calculate_and_store(&mut port, region, 0x100 - width), Verdict::Pass);
    }
}

#[test]
fn eeprom_store_outside_eeprom_is_rejected() {
    let mut d = SimulatedDevice::avr64ea48();
    let engine = REFERENCE.eeprom.engine();
    let region = AddressRange::new(0x1400, 0x10);
    for store in [0x13FF, 0x15FF, 0x1600] {
        assert_eq!(
            engine.calculate_and_store(&mut EepromPort::new(&mut d.eeprom), region, store),
            Verdict::InvalidArgument,
            "store at {store:#x}"
        );
    }
    assert_eq!(d.eeprom.write_count(), 0);
}

// ─── Properties ──────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn flash_round_trip_detects_any_single_bit_flip(
        start in 0u32..0x7000,
        length in 1u32..0x400,
        flip in any::<prop::sample::Index>(),
        bit in 0u8..8,
        table in any::<bool>(),
    ) {
        let mut d = device_with_image();
        let algorithm = if table { CrcAlgorithm::Table } else { CrcAlgorithm::Bitwise };
        let engine = CrcIntegrity::new(CrcParams::CRC32, algorithm);
        let region = AddressRange::new(start, length);

        let mut port = FlashPort::new(&mut d.flash);
        prop_assert_eq!(engine.calculate_and_store(&mut port, region, 0xFFFC), Verdict::Pass);
        prop_assert_eq!(engine.validate(&mut port, region, 0xFFFC), Verdict::Pass);

        let addr = start as usize + flip.index(length as usize);
        d.flash.flip_bit(addr, bit);
        prop_assert_eq!(
            engine.validate(&mut FlashPort::new(&mut d.flash), region, 0xFFFC),
            Verdict::Fail
        );
    }

    #[test]
    fn eeprom_round_trip_detects_any_single_bit_flip(
        data in proptest::collection::vec(any::<u8>(), 1..255),
        flip in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let mut d = SimulatedDevice::avr64ea48();
        d.eeprom.load(0x1400, &data);
        let engine = REFERENCE.eeprom.engine();
        let region = AddressRange::new(0x1400, data.len() as u32);

        prop_assert_eq!(
            engine.calculate_and_store(&mut EepromPort::new(&mut d.eeprom), region, 0x15FE),
            Verdict::Pass
        );
        let addr = 0x1400 + flip.index(data.len()) as u32;
        d.eeprom.flip_bit(addr, bit);
        prop_assert_eq!(
            engine.validate(&mut EepromPort::new(&mut d.eeprom), region, 0x15FE),
            Verdict::Fail
        );
    }
}
