// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Size-tier planner tiling physical ranges onto translation slots
//! OWNERS: @kernel-mm-team
//! PUBLIC API: TileSize, Tile, TilePlan, plan(phys,size,max_tier)
//! INVARIANTS: Tiles are self-aligned, contiguous, never re-cover planned
//!             space; plan alignment is the largest tile chosen; the offset
//!             correction keeps mixed-size plans placeable with one base

extern crate alloc;

use alloc::vec::Vec;
use static_assertions::const_assert;

use crate::types::{align_down, MapError};

/// Block sizes the translation hardware supports, ascending.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TileSize {
    M16,
    M64,
    M128,
    M512,
}

impl TileSize {
    /// All supported sizes, smallest first. `plan` walks a prefix of this
    /// table when the maximum tier is capped.
    pub const ALL: [TileSize; 4] = [TileSize::M16, TileSize::M64, TileSize::M128, TileSize::M512];

    /// Size of the tile in bytes.
    #[inline]
    pub const fn bytes(self) -> usize {
        match self {
            TileSize::M16 => 16 << 20,
            TileSize::M64 => 64 << 20,
            TileSize::M128 => 128 << 20,
            TileSize::M512 => 512 << 20,
        }
    }

    /// Hardware size code stored in the slot data register.
    #[inline]
    pub const fn code(self) -> usize {
        match self {
            TileSize::M16 => 0,
            TileSize::M64 => 1,
            TileSize::M128 => 2,
            TileSize::M512 => 3,
        }
    }

    /// Inverse of [`TileSize::code`], for register decoding.
    #[inline]
    pub const fn from_code(code: usize) -> Option<TileSize> {
        match code {
            0 => Some(TileSize::M16),
            1 => Some(TileSize::M64),
            2 => Some(TileSize::M128),
            3 => Some(TileSize::M512),
            _ => None,
        }
    }

    /// Looks up the tier for an exact byte size.
    #[inline]
    pub const fn from_bytes(bytes: usize) -> Option<TileSize> {
        match bytes {
            b if b == TileSize::M16.bytes() => Some(TileSize::M16),
            b if b == TileSize::M64.bytes() => Some(TileSize::M64),
            b if b == TileSize::M128.bytes() => Some(TileSize::M128),
            b if b == TileSize::M512.bytes() => Some(TileSize::M512),
            _ => None,
        }
    }
}

const_assert!(TileSize::M16.bytes() < TileSize::M64.bytes());
const_assert!(TileSize::M64.bytes() < TileSize::M128.bytes());
const_assert!(TileSize::M128.bytes() < TileSize::M512.bytes());
const_assert!(TileSize::M16.bytes().is_power_of_two());
const_assert!(TileSize::M64.bytes().is_power_of_two());
const_assert!(TileSize::M128.bytes().is_power_of_two());
const_assert!(TileSize::M512.bytes().is_power_of_two());

/// One planned hardware tile: a self-aligned physical sub-range.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Tile {
    pub base: usize,
    pub size: TileSize,
}

impl Tile {
    #[inline]
    pub fn end(&self) -> usize {
        self.base + self.size.bytes()
    }
}

/// Result of tiling one physical range.
///
/// `tiles` is never empty. The first tile may start below the requested
/// physical base when the cheapest coverage comes from a larger tile
/// containing it; callers map the whole span and hand out interior
/// addresses.
#[derive(Debug, Clone)]
pub struct TilePlan {
    pub tiles: Vec<Tile>,
    /// Virtual alignment the plan demands: the largest tile size chosen.
    pub align: usize,
    /// Correction added after aligning, so that every tile ends up with
    /// equal physical and virtual start bits despite mixed sizes.
    pub offset: usize,
}

impl TilePlan {
    /// Physical base of the mapped span (start of the first tile).
    #[inline]
    pub fn base(&self) -> usize {
        self.tiles[0].base
    }

    /// Total bytes the plan maps, surplus included.
    pub fn span(&self) -> usize {
        self.tiles.iter().map(|t| t.size.bytes()).sum()
    }
}

/// Tiles `[phys, phys + size)` using sizes up to `TileSize::ALL[max_tier]`.
///
/// Greedy per-tile choice: the candidate of size `t` is the `t`-aligned
/// tile containing the cursor; a larger tile wins over the best smaller one
/// only when it strictly extends coverage and wastes at most half of
/// itself. Candidates that would re-cover already planned space are
/// skipped. Physical ranges must not wrap the address space.
pub(crate) fn plan(phys: usize, size: usize, max_tier: usize) -> Result<TilePlan, MapError> {
    if size == 0 {
        return Err(MapError::ZeroSize);
    }
    let end = phys.checked_add(size).ok_or(MapError::OutOfVirtualSpace)?;

    let mut tiles: Vec<Tile> = Vec::new();
    let mut pos = phys;
    while pos < end {
        // The smallest tier is always admissible: after the first tile the
        // cursor sits on a 16 MiB boundary, so its candidate starts at the
        // cursor and cannot re-cover planned space.
        let min = TileSize::ALL[0];
        let min_base = align_down(pos, min.bytes());
        let mut pick = min;
        let mut cover = min_base.saturating_add(min.bytes()).min(end) - pos;

        for &tsize in TileSize::ALL[..=max_tier].iter().skip(1) {
            let t = tsize.bytes();
            let base = align_down(pos, t);
            if base < pos && !tiles.is_empty() {
                continue;
            }
            let candidate = base.saturating_add(t).min(end) - pos;
            if candidate > cover && t - candidate <= t / 2 {
                pick = tsize;
                cover = candidate;
            }
        }

        tiles.push(Tile { base: align_down(pos, pick.bytes()), size: pick });
        pos += cover;
    }

    debug_assert!(tiles.windows(2).all(|w| w[0].end() == w[1].base));

    let align = tiles
        .iter()
        .map(|t| t.size.bytes())
        .max()
        .unwrap_or(TileSize::ALL[0].bytes());
    let offset = tiles[0].base % align;
    Ok(TilePlan { tiles, align, offset })
}

#[cfg(test)]
mod tests_prop;

#[cfg(test)]
mod tests {
    use super::{plan, Tile, TileSize};
    use crate::types::MapError;

    const M16: usize = TileSize::M16.bytes();
    const M64: usize = TileSize::M64.bytes();
    const M128: usize = TileSize::M128.bytes();

    #[test]
    fn zero_size_is_rejected() {
        assert_eq!(plan(0, 0, 3).unwrap_err(), MapError::ZeroSize);
    }

    #[test]
    fn aligned_range_uses_one_matching_tile() {
        let p = plan(0, M64, 3).unwrap();
        assert_eq!(p.tiles, [Tile { base: 0, size: TileSize::M64 }]);
        assert_eq!(p.align, M64);
        assert_eq!(p.offset, 0);
    }

    #[test]
    fn larger_tile_wins_when_waste_is_at_most_half() {
        // 80 MiB: one 128 MiB tile wastes 48 MiB, under the half-size bound.
        let p = plan(0, 80 << 20, 3).unwrap();
        assert_eq!(p.tiles, [Tile { base: 0, size: TileSize::M128 }]);
    }

    #[test]
    fn wasteful_tile_is_rejected() {
        // 24 MiB: a 64 MiB tile would waste 40 MiB, more than half of it.
        let p = plan(0, 24 << 20, 3).unwrap();
        assert_eq!(
            p.tiles,
            [
                Tile { base: 0, size: TileSize::M16 },
                Tile { base: M16, size: TileSize::M16 },
            ]
        );
        assert_eq!(p.align, M16);
    }

    #[test]
    fn unaligned_start_records_offset_correction() {
        // [112 MiB, 192 MiB): a 16 MiB tile reaches the 128 MiB boundary,
        // then a 64 MiB tile finishes the range.
        let p = plan(112 << 20, 80 << 20, 3).unwrap();
        assert_eq!(
            p.tiles,
            [
                Tile { base: 112 << 20, size: TileSize::M16 },
                Tile { base: M128, size: TileSize::M64 },
            ]
        );
        assert_eq!(p.align, M64);
        assert_eq!(p.offset, (112 << 20) % M64);
    }

    #[test]
    fn first_tile_may_start_below_the_request() {
        // [16 MiB, 48 MiB): one 64 MiB tile containing the range beats two
        // 16 MiB tiles; the request sits at an interior offset.
        let p = plan(M16, 32 << 20, 3).unwrap();
        assert_eq!(p.tiles, [Tile { base: 0, size: TileSize::M64 }]);
        assert!(p.base() < M16);
    }

    #[test]
    fn tier_cap_limits_tile_choice() {
        let p = plan(0, M128, 1).unwrap();
        assert_eq!(
            p.tiles,
            [
                Tile { base: 0, size: TileSize::M64 },
                Tile { base: M64, size: TileSize::M64 },
            ]
        );
    }

    #[test]
    fn span_covers_request_with_rounding_surplus() {
        let p = plan(0, (16 << 20) + 0x1000, 3).unwrap();
        assert!(p.span() >= (16 << 20) + 0x1000);
        assert_eq!(p.span() % M16, 0);
    }
}
