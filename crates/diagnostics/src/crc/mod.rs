//! CRC integrity engine for non-volatile memory.
//!
//! Two parameter sets are fixed per memory space:
//!
//! | Set | Width | Poly | Init | XorOut | Bit order | Used for |
//! |-----|-------|------|------|--------|-----------|----------|
//! | [`CrcParams::CRC32`] | 32 | `0xEDB88320` | `0xFFFFFFFF` | `0xFFFFFFFF` | LSB first | program flash |
//! | [`CrcParams::CRC16_CCITT`] | 16 | `0x1021` | `0xFFFF` | `0` | MSB first | data EEPROM |
//!
//! The bit-serial engine is the reference; [`CrcTable`] trades 1 KiB of flash
//! for byte-at-a-time speed and must give identical results.
//!
//! ```
//! use diagnostics::crc::{checksum, CrcAlgorithm, CrcParams};
//!
//! assert_eq!(checksum(CrcParams::CRC32, CrcAlgorithm::Bitwise, b"123456789"), 0xCBF4_3926);
//! assert_eq!(checksum(CrcParams::CRC16_CCITT, CrcAlgorithm::Table, b"123456789"), 0x29B1);
//! ```

mod region;
mod table;

pub use region::{ChecksumMemory, CrcIntegrity, EepromPort, FlashPort};
pub use table::{CrcTable, CRC16_CCITT_TABLE, CRC32_TABLE};

/// Register width of a CRC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CrcWidth {
    /// 16-bit register, stored as two bytes.
    Bits16,
    /// 32-bit register, stored as four bytes.
    Bits32,
}

impl CrcWidth {
    /// Number of bits.
    pub const fn bits(self) -> u32 {
        match self {
            Self::Bits16 => 16,
            Self::Bits32 => 32,
        }
    }

    /// Number of bytes the stored checksum occupies.
    pub const fn bytes(self) -> u32 {
        match self {
            Self::Bits16 => 2,
            Self::Bits32 => 4,
        }
    }

    /// Mask of the valid register bits.
    pub const fn mask(self) -> u32 {
        match self {
            Self::Bits16 => 0xFFFF,
            Self::Bits32 => 0xFFFF_FFFF,
        }
    }

    const fn top_bit(self) -> u32 {
        match self {
            Self::Bits16 => 0x8000,
            Self::Bits32 => 0x8000_0000,
        }
    }

    /// Shift that aligns a byte with the top of the register.
    const fn byte_shift(self) -> u32 {
        match self {
            Self::Bits16 => 8,
            Self::Bits32 => 24,
        }
    }
}

/// Polynomial, seed, final XOR and bit order of one CRC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CrcParams {
    /// Register width.
    pub width: CrcWidth,
    /// Generator polynomial, bit-reversed when `reflected`.
    pub poly: u32,
    /// Initial register value.
    pub init: u32,
    /// Value XORed into the register at the end.
    pub xorout: u32,
    /// LSB-first processing.
    pub reflected: bool,
}

impl CrcParams {
    /// CRC-16/CCITT-FALSE.
    pub const CRC16_CCITT: Self = Self {
        width: CrcWidth::Bits16,
        poly: 0x1021,
        init: 0xFFFF,
        xorout: 0x0000,
        reflected: false,
    };

    /// CRC-32/ISO-HDLC, the zlib/Ethernet CRC.
    pub const CRC32: Self = Self {
        width: CrcWidth::Bits32,
        poly: 0xEDB8_8320,
        init: 0xFFFF_FFFF,
        xorout: 0xFFFF_FFFF,
        reflected: true,
    };

    /// Short name for log output.
    pub const fn as_str(&self) -> &'static str {
        match self.width {
            CrcWidth::Bits16 => "crc16",
            CrcWidth::Bits32 => "crc32",
        }
    }

    /// Feed one byte through the register bit by bit.
    pub const fn update_bitwise(&self, crc: u32, byte: u8) -> u32 {
        let mut crc = crc;
        let mut bit = 0u8;
        if self.reflected {
            crc ^= byte as u32;
            while bit < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ self.poly
                } else {
                    crc >> 1
                };
                bit = bit.wrapping_add(1);
            }
        } else {
            crc ^= (byte as u32) << self.width.byte_shift();
            while bit < 8 {
                crc = if crc & self.width.top_bit() != 0 {
                    (crc << 1) ^ self.poly
                } else {
                    crc << 1
                };
                bit = bit.wrapping_add(1);
            }
        }
        crc & self.width.mask()
    }
}

/// How the register is advanced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CrcAlgorithm {
    /// Eight shift/XOR steps per byte. No tables in flash.
    #[default]
    Bitwise,
    /// One lookup per byte through a precomputed [`CrcTable`]. Falls back to
    /// bitwise for parameter sets without a built-in table.
    Table,
}

/// Streaming CRC computation.
#[derive(Debug, Clone)]
pub struct Crc {
    params: CrcParams,
    table: Option<&'static CrcTable>,
    state: u32,
}

impl Crc {
    /// Register loaded with the seed.
    pub fn new(params: CrcParams, algorithm: CrcAlgorithm) -> Self {
        let table = match algorithm {
            CrcAlgorithm::Bitwise => None,
            CrcAlgorithm::Table => CrcTable::builtin(&params),
        };
        Self {
            params,
            table,
            state: params.init & params.width.mask(),
        }
    }

    /// Feed `bytes`.
    pub fn update(&mut self, bytes: &[u8]) {
        self.state = match self.table {
            Some(table) => bytes.iter().fold(self.state, |crc, &b| table.update(crc, b)),
            None => bytes
                .iter()
                .fold(self.state, |crc, &b| self.params.update_bitwise(crc, b)),
        };
    }

    /// Final checksum.
    pub fn finalize(&self) -> u32 {
        (self.state ^ self.params.xorout) & self.params.width.mask()
    }
}

/// One-shot checksum of `bytes`.
pub fn checksum(params: CrcParams, algorithm: CrcAlgorithm, bytes: &[u8]) -> u32 {
    let mut crc = Crc::new(params, algorithm);
    crc.update(bytes);
    crc.finalize()
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
    use proptest::prelude::*;

    const CHECK: &[u8] = b"123456789";

    #[test]
    fn crc32_check_value() {
        assert_eq!(checksum(CrcParams::CRC32, CrcAlgorithm::Bitwise, CHECK), 0xCBF4_3926);
        assert_eq!(checksum(CrcParams::CRC32, CrcAlgorithm::Table, CHECK), 0xCBF4_3926);
    }

    #[test]
    fn crc16_ccitt_check_value() {
        assert_eq!(checksum(CrcParams::CRC16_CCITT, CrcAlgorithm::Bitwise, CHECK), 0x29B1);
        assert_eq!(checksum(CrcParams::CRC16_CCITT, CrcAlgorithm::Table, CHECK), 0x29B1);
    }

    #[test]
    fn empty_input_is_seed_xor_final() {
        assert_eq!(checksum(CrcParams::CRC32, CrcAlgorithm::Bitwise, &[]), 0);
        assert_eq!(checksum(CrcParams::CRC16_CCITT, CrcAlgorithm::Bitwise, &[]), 0xFFFF);
    }

    #[test]
    fn streaming_matches_one_shot() {
        let mut crc = Crc::new(CrcParams::CRC32, CrcAlgorithm::Table);
        crc.update(b"1234");
        crc.update(b"");
        crc.update(b"56789");
        assert_eq!(crc.finalize(), 0xCBF4_3926);
    }

    #[test]
    fn unknown_params_fall_back_to_bitwise() {
        let custom = CrcParams {
            init: 0x0000,
            ..CrcParams::CRC16_CCITT
        };
        assert_eq!(
            checksum(custom, CrcAlgorithm::Table, CHECK),
            checksum(custom, CrcAlgorithm::Bitwise, CHECK)
        );
        // CRC-16/XMODEM
        assert_eq!(checksum(custom, CrcAlgorithm::Bitwise, CHECK), 0x31C3);
    }

    proptest! {
        #[test]
        fn crc32_agrees_with_crc32fast(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let expected = crc32fast::hash(&data);
            prop_assert_eq!(checksum(CrcParams::CRC32, CrcAlgorithm::Bitwise, &data), expected);
            prop_assert_eq!(checksum(CrcParams::CRC32, CrcAlgorithm::Table, &data), expected);
        }

        #[test]
        fn table_and_bitwise_agree_for_crc16(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            prop_assert_eq!(
                checksum(CrcParams::CRC16_CCITT, CrcAlgorithm::Table, &data),
                checksum(CrcParams::CRC16_CCITT, CrcAlgorithm::Bitwise, &data)
            );
        }
    }
}
