// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Address-ordered registry of live mappings + placement search
//! OWNERS: @kernel-mm-team
//! PUBLIC API: Mapping, Registry (crate-internal)
//! INVARIANTS: Mappings sorted by virtual base; virtual ranges disjoint;
//!             ref_count > 0 for every registered mapping

extern crate alloc;

use alloc::vec::Vec;

use crate::types::{align_up, MapError, MemFlags, SlotIndex};

/// Software record of one logical remap result, possibly multi-tile.
#[derive(Debug, Clone)]
pub(crate) struct Mapping {
    pub phys_base: usize,
    pub virt_base: usize,
    pub total_size: usize,
    pub flags: MemFlags,
    pub ref_count: usize,
    pub slots: Vec<SlotIndex>,
}

impl Mapping {
    #[inline]
    pub fn virt_end(&self) -> usize {
        self.virt_base + self.total_size
    }

    #[inline]
    pub fn contains_virt(&self, virt: usize) -> bool {
        virt >= self.virt_base && virt < self.virt_end()
    }

    /// True when `[phys, phys + size)` lies fully inside this mapping.
    pub fn covers_phys(&self, phys: usize, size: usize) -> bool {
        phys >= self.phys_base
            && phys
                .checked_add(size)
                .is_some_and(|end| end <= self.phys_base + self.total_size)
    }

    /// Virtual address corresponding to a covered physical address.
    #[inline]
    pub fn virt_for_phys(&self, phys: usize) -> usize {
        self.virt_base + (phys - self.phys_base)
    }
}

/// Live mappings, ordered by virtual base address.
pub(crate) struct Registry {
    mappings: Vec<Mapping>,
}

impl Registry {
    pub const fn new() -> Self {
        Self { mappings: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn iter(&self) -> core::slice::Iter<'_, Mapping> {
        self.mappings.iter()
    }

    pub fn get(&self, index: usize) -> &Mapping {
        &self.mappings[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut Mapping {
        &mut self.mappings[index]
    }

    /// Looks for an existing mapping that fully covers the request with
    /// matching attributes; bumps its reference count on a hit.
    pub fn share_hit(&mut self, phys: usize, size: usize, flags: MemFlags) -> Option<usize> {
        let hit = self
            .mappings
            .iter_mut()
            .find(|m| m.flags == flags && m.covers_phys(phys, size))?;
        hit.ref_count += 1;
        Some(hit.virt_for_phys(phys))
    }

    /// Index of the mapping containing `virt`, if any.
    pub fn find_virt(&self, virt: usize) -> Option<usize> {
        let idx = self.mappings.partition_point(|m| m.virt_base <= virt);
        idx.checked_sub(1).filter(|i| self.mappings[*i].contains_virt(virt))
    }

    /// True when `[start, end)` intersects any registered virtual range.
    pub fn overlaps(&self, start: usize, end: usize) -> bool {
        self.mappings.iter().any(|m| m.virt_base < end && start < m.virt_end())
    }

    /// First-fit scan of the gaps between registered mappings.
    ///
    /// Walks the ordered list with a `prev_end` cursor and accepts the
    /// first gap where `align_up(prev_end, align) + offset + span` still
    /// fits, the top of the window counting as the final gap.
    pub fn place(
        &self,
        align: usize,
        offset: usize,
        span: usize,
        window_base: usize,
        window_top: usize,
    ) -> Result<usize, MapError> {
        let mut prev_end = window_base;
        for m in &self.mappings {
            // Forced mappings may sit outside the window; the search never
            // places past its top.
            if let Some(virt) = fit_in_gap(prev_end, m.virt_base.min(window_top), align, offset, span) {
                return Ok(virt);
            }
            prev_end = prev_end.max(m.virt_end());
        }
        fit_in_gap(prev_end, window_top, align, offset, span).ok_or(MapError::OutOfVirtualSpace)
    }

    /// Inserts in virtual-address order and returns the index.
    pub fn insert(&mut self, mapping: Mapping) -> usize {
        let pos = self.mappings.partition_point(|m| m.virt_base < mapping.virt_base);
        debug_assert!(pos == 0 || self.mappings[pos - 1].virt_end() <= mapping.virt_base);
        debug_assert!(
            pos == self.mappings.len() || mapping.virt_end() <= self.mappings[pos].virt_base
        );
        self.mappings.insert(pos, mapping);
        pos
    }

    pub fn remove(&mut self, index: usize) -> Mapping {
        self.mappings.remove(index)
    }

    /// Order and disjointness of all registered virtual ranges.
    pub fn is_disjoint(&self) -> bool {
        self.mappings.windows(2).all(|w| w[0].virt_end() <= w[1].virt_base)
    }
}

fn fit_in_gap(
    gap_start: usize,
    gap_end: usize,
    align: usize,
    offset: usize,
    span: usize,
) -> Option<usize> {
    let candidate = align_up(gap_start, align).checked_add(offset)?;
    let end = candidate.checked_add(span)?;
    (end <= gap_end).then_some(candidate)
}
