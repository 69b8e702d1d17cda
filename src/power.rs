// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Replay of the software registry into hardware after a state-losing
//! suspend. The registry is the sole durable source of truth; the
//! hardware table is rebuilt from it in ascending virtual order.

extern crate alloc;

use alloc::vec::Vec;

use crate::commit::{self, ClearStrategy};
use crate::hal::Tlb;
use crate::log_warn;
use crate::registry::Registry;
use crate::slots::SlotPool;
use crate::types::SlotIndex;

/// Whether the hardware table currently reflects the registry.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum PowerState {
    Active,
    Suspended,
}

/// Rebuilds the hardware table: free slots are scrubbed through the clear
/// strategy first (their post-resume contents are undefined, and the
/// gapless variant must get its filler back), then every live mapping is
/// recommitted in ascending virtual order, then the translation cache is
/// invalidated once.
pub(crate) fn replay(
    hw: &dyn Tlb,
    pool: &SlotPool,
    registry: &Registry,
    strategy: &dyn ClearStrategy,
) {
    let free: Vec<SlotIndex> = pool.free_slots().collect();
    commit::clear_slots(hw, strategy, &free);
    for mapping in registry.iter() {
        commit::commit_entries(
            hw,
            mapping.slots.iter().filter_map(|slot| pool.get(*slot)),
            mapping.flags,
        );
    }
    hw.flush_all();
}

/// Defensive cross-check of registry and pool, run on resume in debug
/// builds. Returns false and logs when an invariant does not hold.
pub(crate) fn consistency_check(pool: &SlotPool, registry: &Registry) -> bool {
    let mut ok = true;
    if !registry.is_disjoint() {
        log_warn!(target: "power", "resume check: virtual ranges overlap");
        ok = false;
    }
    for mapping in registry.iter() {
        if mapping.ref_count == 0 {
            log_warn!(target: "power", "resume check: dead mapping at {:#x}", mapping.virt_base);
            ok = false;
        }
        let mut entry_bytes = 0usize;
        for slot in &mapping.slots {
            match pool.get(*slot) {
                Some(entry) => entry_bytes += entry.size.bytes(),
                None => {
                    log_warn!(
                        target: "power",
                        "resume check: mapping {:#x} lost slot {}",
                        mapping.virt_base,
                        slot
                    );
                    ok = false;
                }
            }
        }
        if entry_bytes != mapping.total_size {
            log_warn!(
                target: "power",
                "resume check: mapping {:#x} entries cover {:#x} of {:#x}",
                mapping.virt_base,
                entry_bytes,
                mapping.total_size
            );
            ok = false;
        }
    }
    ok
}
