//! Program-flash helpers on top of [`embedded_storage::nor_flash`].
//!
//! Flash can only be cleared a page at a time, so patching a few bytes (a
//! stored checksum, typically) means: read the page, merge the new bytes,
//! erase, write the page back. [`program`] does exactly that for any driver
//! implementing [`NorFlash`]. Offsets are flash addresses; the program space
//! starts at 0 on the target class.

use embedded_storage::nor_flash::{NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash};

use crate::eeprom::NvmError;
use crate::memory::MemoryBounds;

/// Largest erase page the merge buffer holds.
pub const MAX_PAGE_SIZE: usize = 512;

/// Bounds of a flash device as seen through [`ReadNorFlash::capacity`].
pub fn flash_bounds<F: ReadNorFlash>(flash: &F) -> Option<MemoryBounds> {
    let capacity = u32::try_from(flash.capacity()).ok()?;
    MemoryBounds::from_start_len(0, capacity)
}

/// Read `buf.len()` bytes at `offset`.
pub fn read<F: ReadNorFlash>(flash: &mut F, offset: u32, buf: &mut [u8]) -> Result<(), NvmError> {
    flash
        .read(offset, buf)
        .map_err(|e| classify(&e, offset))
}

/// Overwrite `data` at `offset`, preserving the rest of every touched page.
pub fn program<F: NorFlash>(flash: &mut F, offset: u32, data: &[u8]) -> Result<(), NvmError> {
    let page_size = F::ERASE_SIZE;
    if page_size == 0 || page_size > MAX_PAGE_SIZE {
        return Err(NvmError::PageTooLarge { page_size });
    }
    let page = u32::try_from(page_size).map_err(|_| NvmError::PageTooLarge { page_size })?;

    let data_len = u32::try_from(data.len()).map_err(|_| NvmError::OutOfBounds { addr: offset })?;
    let end = offset
        .checked_add(data_len)
        .ok_or(NvmError::OutOfBounds { addr: offset })?;
    let capacity = u32::try_from(flash.capacity()).unwrap_or(u32::MAX);
    if end > capacity {
        return Err(NvmError::OutOfBounds { addr: offset });
    }

    let mut merge: heapless::Vec<u8, MAX_PAGE_SIZE> = heapless::Vec::new();
    merge
        .resize(page_size, 0xFF)
        .map_err(|_| NvmError::PageTooLarge { page_size })?;

    let mut addr = offset;
    let mut remaining = data;
    while !remaining.is_empty() {
        let in_page = addr.checked_rem(page).unwrap_or(0);
        let page_start = addr.wrapping_sub(in_page);
        let take = remaining.len().min(page_size.saturating_sub(in_page as usize));
        let (chunk, rest) = remaining.split_at(take);

        read(flash, page_start, &mut merge)?;
        let start = in_page as usize;
        let window = merge
            .get_mut(start..start.saturating_add(take))
            .ok_or(NvmError::OutOfBounds { addr })?;
        window.copy_from_slice(chunk);

        let page_end = page_start.saturating_add(page);
        flash
            .erase(page_start, page_end)
            .map_err(|e| classify(&e, page_start))?;
        flash
            .write(page_start, &merge)
            .map_err(|e| classify(&e, page_start))?;

        addr = page_end;
        remaining = rest;
    }
    Ok(())
}

fn classify<E: NorFlashError>(err: &E, addr: u32) -> NvmError {
    match err.kind() {
        NorFlashErrorKind::NotAligned => NvmError::Unaligned { addr },
        NorFlashErrorKind::OutOfBounds => NvmError::OutOfBounds { addr },
        _ => NvmError::Controller { addr },
    }
}
