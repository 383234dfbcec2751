//! Compile-time CRC lookup tables.

use super::CrcParams;

/// 256-entry lookup table for one parameter set, generated at compile time
/// from the bit-serial engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrcTable {
    params: CrcParams,
    entries: [u32; 256],
}

/// CRC-32 table for program flash.
pub static CRC32_TABLE: CrcTable = CrcTable::new(CrcParams::CRC32);

/// CRC-16/CCITT table for the data EEPROM.
pub static CRC16_CCITT_TABLE: CrcTable = CrcTable::new(CrcParams::CRC16_CCITT);

impl CrcTable {
    /// Build the table for `params`.
    #[allow(clippy::indexing_slicing)] // i < 256
    pub const fn new(params: CrcParams) -> Self {
        let mut entries = [0u32; 256];
        let mut i = 0usize;
        while i < 256 {
            entries[i] = params.update_bitwise(0, i as u8);
            i = i.wrapping_add(1);
        }
        Self { params, entries }
    }

    /// Built-in table for `params`, if one exists.
    pub fn builtin(params: &CrcParams) -> Option<&'static Self> {
        [&CRC32_TABLE, &CRC16_CCITT_TABLE]
            .into_iter()
            .find(|t| t.params == *params)
    }

    /// Parameter set the table was generated for.
    pub const fn params(&self) -> &CrcParams {
        &self.params
    }

    /// Entry for `index`.
    #[allow(clippy::indexing_slicing)] // a u8 index cannot leave 256 entries
    pub const fn entry(&self, index: u8) -> u32 {
        self.entries[index as usize]
    }

    /// Feed one byte.
    pub const fn update(&self, crc: u32, byte: u8) -> u32 {
        let width = self.params.width;
        if self.params.reflected {
            let index = (crc ^ byte as u32) as u8;
            self.entry(index) ^ (crc >> 8)
        } else {
            let index = ((crc >> width.bits().saturating_sub(8)) ^ byte as u32) as u8;
            (self.entry(index) ^ (crc << 8)) & width.mask()
        }
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

    #[test]
    fn crc32_table_matches_published_entries() {
        assert_eq!(CRC32_TABLE.entry(0), 0x0000_0000);
        assert_eq!(CRC32_TABLE.entry(1), 0x7707_3096);
        assert_eq!(CRC32_TABLE.entry(0xFF), 0x2D02_EF8D);
    }

    #[test]
    fn crc16_table_matches_published_entries() {
        assert_eq!(CRC16_CCITT_TABLE.entry(0), 0x0000);
        assert_eq!(CRC16_CCITT_TABLE.entry(1), 0x1021);
        assert_eq!(CRC16_CCITT_TABLE.entry(0xFF), 0x1EF0);
    }

    #[test]
    fn builtin_lookup_by_params() {
        assert!(core::ptr::eq(
            CrcTable::builtin(&CrcParams::CRC32).unwrap(),
            &CRC32_TABLE
        ));
        assert!(CrcTable::builtin(&CrcParams {
            poly: 0x8005,
            ..CrcParams::CRC16_CCITT
        })
        .is_none());
    }
}
