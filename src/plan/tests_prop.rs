// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for the size-tier planner
//! OWNERS: @kernel-mm-team
//! NOTE: Tests only; no mapper logic.
//!
//! TEST_SCOPE:
//!   - Tiles exactly cover the requested range: no gaps, no overlaps
//!   - Every tile is aligned to its own size
//!   - Plan alignment/offset describe a single placeable base
//!
//! TEST_SCENARIOS:
//!   - tiles_cover_request_contiguously(): union of tiles spans the range
//!   - tiles_are_self_aligned(): base % size == 0 for every tile
//!   - alignment_is_largest_tile(): align equals the biggest chosen size
//!   - offset_matches_first_tile(): offset reproduces the first tile's
//!     position within the alignment, so one aligned base satisfies all
//!     per-tile start-bit constraints
//!   - tier_cap_is_honored(): no tile exceeds the requested maximum tier

use super::{plan, TileSize};
use proptest::prelude::*;

const M16: usize = TileSize::M16.bytes();

fn arb_range() -> impl Strategy<Value = (usize, usize)> {
    // Physical bases below 8 GiB, sizes up to 1 GiB: large enough to mix
    // every tier, small enough to keep tile counts reasonable.
    (0usize..(8 << 30), 1usize..=(1 << 30))
}

proptest! {
    #[test]
    fn tiles_cover_request_contiguously((phys, size) in arb_range()) {
        let p = plan(phys, size, TileSize::ALL.len() - 1).unwrap();
        prop_assert!(!p.tiles.is_empty());
        prop_assert!(p.tiles[0].base <= phys);
        for pair in p.tiles.windows(2) {
            prop_assert_eq!(pair[0].end(), pair[1].base);
        }
        let last = p.tiles[p.tiles.len() - 1];
        prop_assert!(last.end() >= phys + size);
        prop_assert_eq!(p.span(), last.end() - p.tiles[0].base);
    }

    #[test]
    fn tiles_are_self_aligned((phys, size) in arb_range()) {
        let p = plan(phys, size, TileSize::ALL.len() - 1).unwrap();
        for tile in &p.tiles {
            prop_assert_eq!(tile.base % tile.size.bytes(), 0);
        }
    }

    #[test]
    fn alignment_is_largest_tile((phys, size) in arb_range()) {
        let p = plan(phys, size, TileSize::ALL.len() - 1).unwrap();
        let largest = p.tiles.iter().map(|t| t.size.bytes()).max().unwrap();
        prop_assert_eq!(p.align, largest);
        prop_assert!(p.offset < p.align);
    }

    #[test]
    fn offset_matches_first_tile((phys, size) in arb_range()) {
        let p = plan(phys, size, TileSize::ALL.len() - 1).unwrap();
        prop_assert_eq!(p.offset, p.base() % p.align);
        // A base satisfying align+offset satisfies every tile's own
        // start-bit constraint.
        let virt_base = (3usize << 32) + p.offset;
        for tile in &p.tiles {
            let tile_virt = virt_base + (tile.base - p.base());
            prop_assert_eq!(tile_virt % tile.size.bytes(), tile.base % tile.size.bytes());
        }
    }

    #[test]
    fn tier_cap_is_honored((phys, size) in arb_range(), cap in 0usize..TileSize::ALL.len()) {
        let p = plan(phys, size, cap).unwrap();
        for tile in &p.tiles {
            prop_assert!(tile.size <= TileSize::ALL[cap]);
        }
    }

    #[test]
    fn min_tier_plan_is_exact_for_aligned_ranges(blocks in 1usize..64, start_block in 0usize..256) {
        let phys = start_block * M16;
        let size = blocks * M16;
        let p = plan(phys, size, 0).unwrap();
        prop_assert_eq!(p.base(), phys);
        prop_assert_eq!(p.span(), size);
        prop_assert!(p.tiles.iter().all(|t| t.size == TileSize::M16));
    }
}
