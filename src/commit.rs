// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Commit protocol writing slot state into live registers
//! OWNERS: @kernel-mm-team
//! PUBLIC API: UncachedGuard, commit_entries, clear_slots, ClearStrategy
//! INVARIANTS: Every register write happens inside an uncached-mode guard
//!             that restores the addressing mode on all exit paths; the
//!             address half is read back after programming to defeat write
//!             posting; gapless configurations never leave a slot unmapped

use crate::hal::{encode_data, Tlb};
use crate::plan::TileSize;
use crate::slots::SlotEntry;
use crate::types::{MemFlags, SlotIndex};

/// Scoped CPU addressing-mode switch.
///
/// Reprogramming the table that maps the running code and data must happen
/// from the uncached window; the mode is restored when the guard drops,
/// early failure paths included. Guards may nest.
pub(crate) struct UncachedGuard<'a> {
    hw: &'a dyn Tlb,
}

impl<'a> UncachedGuard<'a> {
    pub fn new(hw: &'a dyn Tlb) -> Self {
        hw.enter_uncached();
        Self { hw }
    }
}

impl Drop for UncachedGuard<'_> {
    fn drop(&mut self) {
        self.hw.leave_uncached();
    }
}

/// Programs one slot: address half, data half, posted-write read-back.
fn program_slot(hw: &dyn Tlb, index: usize, vpn: usize, data: usize) {
    unsafe {
        hw.write_addr(index, vpn);
        hw.write_data(index, data);
        let _ = hw.read_addr(index);
    }
}

/// Writes every entry of a mapping into the hardware table.
pub(crate) fn commit_entries<'a>(
    hw: &dyn Tlb,
    entries: impl Iterator<Item = &'a SlotEntry>,
    flags: MemFlags,
) {
    let _mode = UncachedGuard::new(hw);
    for entry in entries {
        program_slot(hw, entry.index.as_index(), entry.vpn, encode_data(entry.ppn, entry.size, flags));
    }
}

/// How a withdrawn slot is left behind, chosen once at configuration.
pub(crate) trait ClearStrategy: Send + Sync {
    fn clear_slot(&self, hw: &dyn Tlb, index: usize);
}

/// Map-on-demand hardware: an unused slot is simply invalid.
pub(crate) struct DemandClear;

impl ClearStrategy for DemandClear {
    fn clear_slot(&self, hw: &dyn Tlb, index: usize) {
        unsafe {
            // Data half first so the valid bit drops before the address
            // half is scrubbed.
            hw.write_data(index, 0);
            hw.write_addr(index, 0);
            let _ = hw.read_addr(index);
        }
    }
}

/// Whole-window hardware: every slot always maps something, so a cleared
/// slot is rewritten as an uncached filler tile at its fixed window
/// position instead of leaving a hole.
pub(crate) struct GaplessClear {
    pub window_base: usize,
    pub stride: TileSize,
    pub filler_ppn: usize,
}

impl ClearStrategy for GaplessClear {
    fn clear_slot(&self, hw: &dyn Tlb, index: usize) {
        let vpn = self.window_base + index * self.stride.bytes();
        program_slot(hw, index, vpn, encode_data(self.filler_ppn, self.stride, MemFlags::empty()));
    }
}

/// Clears a batch of slots under one mode switch.
pub(crate) fn clear_slots(hw: &dyn Tlb, strategy: &dyn ClearStrategy, slots: &[SlotIndex]) {
    let _mode = UncachedGuard::new(hw);
    for slot in slots {
        strategy.clear_slot(hw, slot.as_index());
    }
}

#[cfg(test)]
mod tests {
    use super::{clear_slots, commit_entries, DemandClear, GaplessClear, UncachedGuard};
    use crate::hal::sim::SimWindow;
    use crate::plan::TileSize;
    use crate::slots::SlotEntry;
    use crate::types::{MemFlags, SlotIndex};

    #[test]
    fn guard_restores_mode_on_drop() {
        let hw = SimWindow::new();
        {
            let _outer = UncachedGuard::new(&hw);
            let _inner = UncachedGuard::new(&hw);
            assert_eq!(hw.uncached_depth(), 2);
        }
        assert_eq!(hw.uncached_depth(), 0);
    }

    #[test]
    fn commit_then_demand_clear_leaves_slot_invalid() {
        let hw = SimWindow::new();
        let entry = SlotEntry {
            index: SlotIndex::from_raw(2),
            vpn: 0x8000_0000,
            ppn: 0x0400_0000,
            size: TileSize::M16,
        };
        commit_entries(&hw, [&entry].into_iter(), MemFlags::CACHED);
        assert_eq!(hw.lookup(0x8000_0000), Some((0x0400_0000, MemFlags::CACHED)));

        clear_slots(&hw, &DemandClear, &[entry.index]);
        assert_eq!(hw.lookup(0x8000_0000), None);
        assert_eq!(hw.valid_slots(), 0);
        assert_eq!(hw.uncached_depth(), 0);
    }

    #[test]
    fn gapless_clear_substitutes_filler() {
        let hw = SimWindow::new();
        let strategy = GaplessClear {
            window_base: 0x8000_0000,
            stride: TileSize::M64,
            filler_ppn: 0x1000_0000,
        };
        clear_slots(&hw, &strategy, &[SlotIndex::from_raw(1)]);
        // Slot 1 covers its fixed 64 MiB window position, uncached.
        assert_eq!(
            hw.lookup(0x8000_0000 + TileSize::M64.bytes()),
            Some((0x1000_0000, MemFlags::empty()))
        );
        assert_eq!(hw.valid_slots(), 1);
    }
}
