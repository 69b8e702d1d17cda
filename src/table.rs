// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Public facade of the translation-window mapper
//! OWNERS: @kernel-mm-team
//! PUBLIC API: WindowTable, WindowConfig, BootRegion, MappingInfo, SlotStats
//! DEPENDS_ON: plan, registry, slots, commit, power, hal
//! INVARIANTS: One process-wide RwLock guards pool + registry + power state;
//!             mutators commit hardware before releasing the write lock, so
//!             no observer sees a half-built mapping; lookups take the read
//!             side only

extern crate alloc;

use alloc::boxed::Box;
use alloc::vec::Vec;

use spin::RwLock;
use static_assertions::const_assert;

use crate::commit::{self, ClearStrategy, DemandClear, GaplessClear};
use crate::hal::{Tlb, NR_SLOTS};
use crate::{log_debug, log_info, log_warn};
use crate::plan::{self, TileSize};
use crate::power::{self, PowerState};
use crate::registry::{Mapping, Registry};
use crate::slots::{SlotEntry, SlotPool};
use crate::types::{MapError, MemFlags, PhysAddr, VirtAddr};

/// Default privileged window: 1 GiB starting at 2 GiB.
pub const DEFAULT_WINDOW_BASE: usize = 0x8000_0000;
pub const DEFAULT_WINDOW_SIZE: usize = 0x4000_0000;

const_assert!(DEFAULT_WINDOW_BASE % TileSize::M512.bytes() == 0);
const_assert!(DEFAULT_WINDOW_SIZE / NR_SLOTS == TileSize::M64.bytes());

/// Geometry and variant selection for one window table.
#[derive(Copy, Clone, Debug)]
pub struct WindowConfig {
    /// First virtual address the hardware window can translate.
    pub window_base: usize,
    /// Size of the addressable window in bytes.
    pub window_size: usize,
    /// Whole-window hardware variant: slots always map something, and a
    /// cleared slot receives a filler mapping instead of a hole.
    pub gapless: bool,
    /// Physical base backing filler mappings in gapless mode.
    pub filler_phys: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window_base: DEFAULT_WINDOW_BASE,
            window_size: DEFAULT_WINDOW_SIZE,
            gapless: false,
            filler_phys: 0,
        }
    }
}

impl WindowConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.window_base % TileSize::M512.bytes() != 0 {
            return Err(ConfigError::MisalignedWindow);
        }
        if self.window_size == 0
            || self.window_size % TileSize::M16.bytes() != 0
            || self.window_base.checked_add(self.window_size).is_none()
        {
            return Err(ConfigError::BadWindowSize);
        }
        Ok(())
    }

    fn clear_strategy(&self) -> Result<Box<dyn ClearStrategy>, ConfigError> {
        if !self.gapless {
            return Ok(Box::new(DemandClear));
        }
        let stride = TileSize::from_bytes(self.window_size / NR_SLOTS)
            .ok_or(ConfigError::UnsupportedStride)?;
        if self.filler_phys % stride.bytes() != 0 {
            return Err(ConfigError::MisalignedFiller);
        }
        Ok(Box::new(GaplessClear {
            window_base: self.window_base,
            stride,
            filler_ppn: self.filler_phys,
        }))
    }

    fn window_top(&self) -> usize {
        self.window_base + self.window_size
    }
}

/// Errors detected while constructing a [`WindowTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Window base is not aligned to the largest tile size.
    MisalignedWindow,
    /// Window size is zero, not tile-granular, or wraps the address space.
    BadWindowSize,
    /// Gapless mode needs `window_size / NR_SLOTS` to be a supported tile.
    UnsupportedStride,
    /// Gapless filler base is not aligned to the slot stride.
    MisalignedFiller,
}

/// One forced mapping installed by [`WindowTable::bootstrap`].
#[derive(Copy, Clone, Debug)]
pub struct BootRegion {
    pub phys: PhysAddr,
    pub size: usize,
    pub flags: MemFlags,
    /// Fixed virtual address; `None` lets the placement search decide.
    pub virt: Option<VirtAddr>,
}

/// Diagnostic snapshot of one live mapping.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MappingInfo {
    pub phys: PhysAddr,
    pub virt: VirtAddr,
    pub size: usize,
    pub flags: MemFlags,
    pub ref_count: usize,
}

/// Slot usage counters.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SlotStats {
    pub total: usize,
    pub free: usize,
}

struct WindowState {
    pool: SlotPool,
    registry: Registry,
    power: PowerState,
}

impl WindowState {
    const fn new() -> Self {
        Self { pool: SlotPool::new(), registry: Registry::new(), power: PowerState::Active }
    }

    /// Plans, places and records one mapping; hardware programming is the
    /// caller's job. Rolls back all slot allocations on failure and
    /// retries the plan with the maximum tile capped one tier lower when
    /// the pool runs dry mid-plan.
    fn create_mapping(
        &mut self,
        config: &WindowConfig,
        phys: usize,
        size: usize,
        flags: MemFlags,
        fixed_virt: Option<usize>,
        preferred_slot: Option<usize>,
    ) -> Result<(usize, usize), MapError> {
        let mut tier = TileSize::ALL.len() - 1;
        loop {
            let plan = plan::plan(phys, size, tier)?;

            let virt_base = match fixed_virt {
                Some(forced) => {
                    // A forced address that misses the computed alignment
                    // is a planning bug, not a resource condition.
                    if forced % plan.align != phys % plan.align {
                        panic!(
                            "forced virt {:#x} breaks alignment {:#x} for phys {:#x}",
                            forced, plan.align, phys
                        );
                    }
                    let base = match forced.checked_sub(phys - plan.base()) {
                        Some(base) => base,
                        None => panic!("forced virt {:#x} below mapped span start", forced),
                    };
                    if self.registry.overlaps(base, base + plan.span()) {
                        panic!("forced virt {:#x} overlaps a live mapping", forced);
                    }
                    base
                }
                None => self.registry.place(
                    plan.align,
                    plan.offset,
                    plan.span(),
                    config.window_base,
                    config.window_top(),
                )?,
            };

            let mut slots = Vec::with_capacity(plan.tiles.len());
            let mut starved = false;
            for tile_nr in 0..plan.tiles.len() {
                match self.pool.allocate(preferred_slot.map(|first| first + tile_nr)) {
                    Ok(slot) => slots.push(slot),
                    Err(MapError::OutOfEntries) => {
                        starved = true;
                        break;
                    }
                    Err(err) => return Err(err),
                }
            }
            if starved {
                for slot in slots {
                    self.pool.free(slot);
                }
                if tier == 0 {
                    return Err(MapError::OutOfEntries);
                }
                tier -= 1;
                continue;
            }

            for (slot, tile) in slots.iter().zip(plan.tiles.iter()) {
                self.pool.set_entry(
                    *slot,
                    SlotEntry {
                        index: *slot,
                        vpn: virt_base + (tile.base - plan.base()),
                        ppn: tile.base,
                        size: tile.size,
                    },
                );
            }

            let virt = virt_base + (phys - plan.base());
            let index = self.registry.insert(Mapping {
                phys_base: plan.base(),
                virt_base,
                total_size: plan.span(),
                flags,
                ref_count: 1,
                slots,
            });
            return Ok((virt, index));
        }
    }
}

/// The dynamic physical-to-virtual window mapper.
///
/// Owns the hardware handle and all software state; every operation is
/// synchronous and callable from any thread or interrupt context. The
/// registry survives suspend; [`WindowTable::on_power_resume`] rebuilds
/// the hardware table from it.
pub struct WindowTable<H: Tlb> {
    hw: H,
    config: WindowConfig,
    clear: Box<dyn ClearStrategy>,
    state: RwLock<WindowState>,
}

impl<H: Tlb> WindowTable<H> {
    pub fn new(hw: H, config: WindowConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let clear = config.clear_strategy()?;
        log_info!(
            target: "win",
            "window {:#x}..{:#x}, {} slots{}",
            config.window_base,
            config.window_top(),
            NR_SLOTS,
            if config.gapless { ", gapless" } else { "" }
        );
        Ok(Self { hw, config, clear, state: RwLock::new(WindowState::new()) })
    }

    /// Borrow of the hardware handle, e.g. for platform quirks at init.
    pub fn hw(&self) -> &H {
        &self.hw
    }

    /// Maps `[phys, phys + size)` somewhere into the window and returns
    /// the virtual address corresponding to `phys`. Requests fully covered
    /// by a live mapping with equal attributes share it.
    pub fn remap(&self, phys: PhysAddr, size: usize, flags: MemFlags) -> Result<VirtAddr, MapError> {
        let mut state = self.state.write();
        if state.power == PowerState::Suspended {
            return Err(MapError::Suspended);
        }
        if size == 0 {
            return Err(MapError::ZeroSize);
        }

        if let Some(virt) = state.registry.share_hit(phys.raw(), size, flags) {
            log_debug!(target: "win", "remap {}+{:#x} shares {:#x}", phys, size, virt);
            return Ok(VirtAddr::from_raw(virt));
        }

        let (virt, index) = state.create_mapping(&self.config, phys.raw(), size, flags, None, None)?;

        let state = &*state;
        let mapping = state.registry.get(index);
        commit::commit_entries(
            &self.hw,
            mapping.slots.iter().filter_map(|slot| state.pool.get(*slot)),
            mapping.flags,
        );
        debug_assert!(state.registry.is_disjoint());

        log_debug!(
            target: "win",
            "remap {}+{:#x} -> {:#x} ({} slots)",
            phys,
            size,
            virt,
            mapping.slots.len()
        );
        Ok(VirtAddr::from_raw(virt))
    }

    /// Drops one reference to the mapping containing `virt`. The last
    /// reference withdraws the hardware slots and discards the mapping.
    /// Returns false when no live mapping covers the address.
    pub fn unmap(&self, virt: VirtAddr) -> bool {
        let mut state = self.state.write();
        let Some(index) = state.registry.find_virt(virt.raw()) else {
            return false;
        };

        let mapping = state.registry.get_mut(index);
        mapping.ref_count -= 1;
        if mapping.ref_count > 0 {
            log_debug!(target: "win", "unmap {} keeps {} refs", virt, mapping.ref_count);
            return true;
        }

        let dead = state.registry.remove(index);
        for slot in &dead.slots {
            state.pool.free(*slot);
        }
        // With the hardware state lost to suspend there is nothing to
        // withdraw; resume replays live mappings only.
        if state.power == PowerState::Active {
            commit::clear_slots(&self.hw, self.clear.as_ref(), &dead.slots);
            self.hw.flush_all();
        }
        debug_assert!(state.registry.is_disjoint());
        log_debug!(
            target: "win",
            "unmap {:#x}+{:#x} freed {} slots",
            dead.virt_base,
            dead.total_size,
            dead.slots.len()
        );
        true
    }

    /// Resolves a window address back to (physical address, attributes).
    pub fn translate(&self, virt: VirtAddr) -> Result<(PhysAddr, MemFlags), MapError> {
        let state = self.state.read();
        let index = state.registry.find_virt(virt.raw()).ok_or(MapError::NotMapped)?;
        let mapping = state.registry.get(index);
        let phys = mapping.phys_base + (virt.raw() - mapping.virt_base);
        Ok((PhysAddr::from_raw(phys), mapping.flags))
    }

    /// One-time installation of forced mappings (relocated code and data,
    /// bulk RAM) before general use. Regions with a fixed virtual address
    /// go through the fixed-address placement path; slots are claimed at
    /// preferred indices 0.. in layout order.
    pub fn bootstrap(&self, layout: &[BootRegion]) -> Result<(), MapError> {
        let mut state = self.state.write();
        if state.power == PowerState::Suspended {
            return Err(MapError::Suspended);
        }
        if !state.registry.is_empty() {
            return Err(MapError::AlreadyInitialized);
        }

        let mut next_slot = 0usize;
        for region in layout {
            let (virt, index) = state.create_mapping(
                &self.config,
                region.phys.raw(),
                region.size,
                region.flags,
                region.virt.map(VirtAddr::raw),
                Some(next_slot),
            )?;

            let mapping = state.registry.get(index);
            next_slot += mapping.slots.len();
            commit::commit_entries(
                &self.hw,
                mapping.slots.iter().filter_map(|slot| state.pool.get(*slot)),
                mapping.flags,
            );
            log_info!(
                target: "win",
                "bootstrap {}+{:#x} -> {:#x} ({} slots)",
                region.phys,
                region.size,
                virt,
                mapping.slots.len()
            );
        }
        self.hw.flush_all();
        Ok(())
    }

    /// Power-management callback: hardware contents are about to be lost.
    /// Software state is untouched; only the replay flag flips.
    pub fn on_power_suspend(&self) {
        let mut state = self.state.write();
        state.power = PowerState::Suspended;
        log_info!(target: "power", "suspended, registry retained");
    }

    /// Power-management callback after hardware state loss: replays every
    /// live mapping and invalidates the translation cache once.
    pub fn on_power_resume(&self) {
        let mut state = self.state.write();
        if state.power == PowerState::Active {
            log_warn!(target: "power", "resume without suspend, replaying anyway");
        }
        power::replay(&self.hw, &state.pool, &state.registry, self.clear.as_ref());
        state.power = PowerState::Active;
        if cfg!(debug_assertions) {
            let _ = power::consistency_check(&state.pool, &state.registry);
        }
        log_info!(target: "power", "resumed, hardware table rebuilt");
    }

    /// Snapshot of all live mappings in ascending virtual order.
    pub fn mappings(&self) -> Vec<MappingInfo> {
        let state = self.state.read();
        state
            .registry
            .iter()
            .map(|m| MappingInfo {
                phys: PhysAddr::from_raw(m.phys_base),
                virt: VirtAddr::from_raw(m.virt_base),
                size: m.total_size,
                flags: m.flags,
                ref_count: m.ref_count,
            })
            .collect()
    }

    /// Slot usage counters.
    pub fn stats(&self) -> SlotStats {
        let state = self.state.read();
        SlotStats { total: NR_SLOTS, free: state.pool.free_count() }
    }
}
