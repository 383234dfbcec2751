//! xtask image-crc: checksum a raw flash image the way the start-up test
//! does, and embed the result at the store address.
//!
//! Bytes the image does not cover read as erased flash (`0xFF`).

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use colored::Colorize;
use diagnostics::crc::{checksum, CrcAlgorithm, CrcParams};
use diagnostics::DiagnosticsConfig;

const ERASED: u8 = 0xFF;

pub struct ImageCrcArgs {
    pub image: PathBuf,
    pub crc16: bool,
    pub length: Option<u32>,
    pub store: Option<u32>,
    pub patch: Option<PathBuf>,
}

/// Decimal or `0x`-prefixed hexadecimal.
pub fn parse_number(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("{s}: {e}"))
}

/// Checksum and optionally patched copy of one image.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Embedded {
    pub crc: u32,
    pub stored: Vec<u8>,
    pub patched: Vec<u8>,
}

/// Checksum `[0, length)` of `image` and write it big-endian at `store`.
pub(crate) fn embed(image: &[u8], params: CrcParams, length: u32, store: u32) -> Result<Embedded> {
    let width = params.width.bytes();
    let store_end = store.checked_add(width).context("store address overflows")?;
    if store < length {
        bail!("checksum at {store:#x} overlaps the checksummed range [0, {length:#x})");
    }
    let length = usize::try_from(length)?;
    let store = usize::try_from(store)?;
    let store_end = usize::try_from(store_end)?;

    let mut patched = image.to_vec();
    if patched.len() < store_end {
        patched.resize(store_end, ERASED);
    }
    let mut region = patched.get(..length.min(patched.len())).unwrap_or_default().to_vec();
    region.resize(length, ERASED);

    let crc = checksum(params, CrcAlgorithm::Table, &region);
    let stored = match width {
        2 => u16::try_from(crc)?.to_be_bytes().to_vec(),
        _ => crc.to_be_bytes().to_vec(),
    };
    patched
        .get_mut(store..store_end)
        .context("store range outside the image")?
        .copy_from_slice(&stored);
    Ok(Embedded {
        crc,
        stored,
        patched,
    })
}

pub fn run(args: &ImageCrcArgs) -> Result<()> {
    let reference = DiagnosticsConfig::AVR64EA48_GAS_MONITOR.flash;
    let params = if args.crc16 {
        CrcParams::CRC16_CCITT
    } else {
        reference.params
    };
    let length = args.length.unwrap_or(reference.region.length);
    let store = args.store.unwrap_or(reference.store_addr);

    let image = std::fs::read(&args.image)
        .with_context(|| format!("Failed to read {}", args.image.display()))?;
    let out = embed(&image, params, length, store)?;

    println!(
        "{} {} over [0, {:#x}) = {}",
        params.as_str().cyan().bold(),
        args.image.display(),
        length,
        format!("{:#x}", out.crc).green()
    );
    let bytes: Vec<String> = out.stored.iter().map(|b| format!("{b:02X}")).collect();
    println!("   stored at {store:#06x} as {}", bytes.join(" "));

    if let Some(path) = &args.patch {
        write_image(path, &out.patched)?;
        println!("{}", format!("✓ Patched image written to {}", path.display()).green());
    }
    Ok(())
}

fn write_image(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
#[allow(clippy::indexing_slicing, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;

    #[test]
    fn numbers_parse_as_decimal_or_hex() {
        assert_eq!(parse_number("32766"), Ok(32_766));
        assert_eq!(parse_number("0xFFFC"), Ok(0xFFFC));
        assert!(parse_number("0xZZ").is_err());
    }

    #[test]
    fn crc32_matches_the_check_value_and_is_big_endian() {
        let out = embed(b"123456789", CrcParams::CRC32, 9, 12).unwrap();
        assert_eq!(out.crc, 0xCBF4_3926);
        assert_eq!(out.stored, [0xCB, 0xF4, 0x39, 0x26]);
        assert_eq!(&out.patched[..9], b"123456789");
        // gap up to the store address reads as erased flash
        assert_eq!(&out.patched[9..12], &[ERASED; 3]);
        assert_eq!(&out.patched[12..], &out.stored[..]);
    }

    #[test]
    fn short_image_is_padded_with_erased_flash() {
        let padded = embed(&[0x12; 4], CrcParams::CRC16_CCITT, 8, 8).unwrap();
        let mut full = vec![0x12; 4];
        full.resize(8, ERASED);
        let direct = embed(&full, CrcParams::CRC16_CCITT, 8, 8).unwrap();
        assert_eq!(padded.crc, direct.crc);
        assert_eq!(padded.stored.len(), 2);
    }

    #[test]
    fn store_inside_the_range_is_rejected() {
        assert!(embed(&[0; 16], CrcParams::CRC32, 16, 12).is_err());
    }

    #[test]
    fn patched_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.bin");
        let out = embed(&[0xA5; 32], CrcParams::CRC32, 28, 28).unwrap();
        write_image(&path, &out.patched).unwrap();
        let back = std::fs::read(&path).unwrap();
        assert_eq!(back.len(), 32);
        assert_eq!(&back[28..], &out.stored[..]);
    }
}
