// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Dynamic physical-to-virtual mapper for a small fixed translation window.
//!
//! The hardware provides [`NR_SLOTS`] address-translation slots, each
//! mapping one self-aligned tile of 16/64/128/512 MiB. This crate tiles
//! arbitrary physical ranges onto those slots, first-fit places them in a
//! privileged virtual window, shares overlapping requests by reference
//! count, and commits register state through a [`Tlb`] implementation.
//! After a state-losing suspend it rebuilds the whole table from the
//! software registry, which is the sole durable truth.
//!
//! The embedder supplies the hardware access (`hal::Tlb`) and optionally a
//! log sink (`diag::log::set_sink`); [`hal::sim::SimWindow`] backs host
//! tests and bring-up.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod diag;
pub mod hal;
pub mod plan;
pub mod types;

mod commit;
mod power;
mod registry;
mod slots;
mod table;

pub use hal::{Tlb, NR_SLOTS};
pub use plan::TileSize;
pub use table::{
    BootRegion, ConfigError, MappingInfo, SlotStats, WindowConfig, WindowTable,
    DEFAULT_WINDOW_BASE, DEFAULT_WINDOW_SIZE,
};
pub use types::{MapError, MemFlags, PhysAddr, VirtAddr};
