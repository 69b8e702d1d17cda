// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Hardware abstraction for the translation-slot register file.

pub mod sim;

use crate::plan::TileSize;
use crate::types::MemFlags;

/// Number of address-translation slots the window hardware provides.
pub const NR_SLOTS: usize = 16;

/// Valid bit in the slot data register.
pub const DATA_VALID: usize = 1 << 0;
/// Position of the two-bit tile size code in the data register.
pub const DATA_SIZE_SHIFT: u32 = 1;
pub const DATA_SIZE_MASK: usize = 0b11 << DATA_SIZE_SHIFT;
/// Attribute field; bit positions are shared with [`MemFlags`].
pub const DATA_ATTR_MASK: usize = MemFlags::all().bits();
/// Page-base field: addresses are at least 16 MiB aligned, so everything
/// below the smallest tile is register bookkeeping.
pub const BASE_MASK: usize = !(TileSize::M16.bytes() - 1);

/// Encodes the data half of a slot register.
#[inline]
pub fn encode_data(ppn: usize, size: TileSize, flags: MemFlags) -> usize {
    (ppn & BASE_MASK) | (size.code() << DATA_SIZE_SHIFT) | flags.bits() | DATA_VALID
}

/// Returns the decoded (ppn, size, flags) of a data register, if valid.
#[inline]
pub fn decode_data(data: usize) -> Option<(usize, TileSize, MemFlags)> {
    if data & DATA_VALID == 0 {
        return None;
    }
    let size = TileSize::from_code((data & DATA_SIZE_MASK) >> DATA_SIZE_SHIFT)?;
    let flags = MemFlags::from_bits_truncate(data & DATA_ATTR_MASK);
    Some((data & BASE_MASK, size, flags))
}

/// Raw access to the chip-wide translation window.
///
/// Implementations touch live registers; callers serialize through the
/// mapper's write lock and hold the uncached-mode guard around every
/// write, because reprogramming the table that maps the running code must
/// not leave a window of inaccessible memory. Mode switches may nest.
pub trait Tlb {
    /// Writes the address half (virtual page base) of `index`.
    ///
    /// # Safety
    /// Caller must hold the write lock and the uncached-mode switch; the
    /// value must come from [`encode_data`]-compatible bookkeeping.
    unsafe fn write_addr(&self, index: usize, value: usize);

    /// Writes the data half (physical base, size code, attributes, valid).
    ///
    /// # Safety
    /// Same contract as [`Tlb::write_addr`].
    unsafe fn write_data(&self, index: usize, value: usize);

    /// Reads back the address half; used to defeat write posting.
    ///
    /// # Safety
    /// Caller must hold the write lock.
    unsafe fn read_addr(&self, index: usize) -> usize;

    /// Flushes the entire translation cache.
    fn flush_all(&self);

    /// Switches the CPU into the uncached addressing mode.
    fn enter_uncached(&self);

    /// Restores the previous addressing mode.
    fn leave_uncached(&self);
}

#[cfg(test)]
mod tests {
    use super::{decode_data, encode_data, DATA_VALID};
    use crate::plan::TileSize;
    use crate::types::MemFlags;

    #[test]
    fn data_register_roundtrip() {
        let data = encode_data(0x0c00_0000, TileSize::M64, MemFlags::CACHED);
        assert_ne!(data & DATA_VALID, 0);
        let (ppn, size, flags) = decode_data(data).unwrap();
        assert_eq!(ppn, 0x0c00_0000);
        assert_eq!(size, TileSize::M64);
        assert_eq!(flags, MemFlags::CACHED);
    }

    #[test]
    fn invalid_register_does_not_decode() {
        assert!(decode_data(0).is_none());
        assert!(decode_data(encode_data(0, TileSize::M16, MemFlags::empty()) & !DATA_VALID).is_none());
    }
}
