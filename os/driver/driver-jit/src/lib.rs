//! # Copy-down Image Builder
//!
//! Assembles the resident image of the packet driver from a library of
//! precompiled modules, at boot, for the hardware that was just detected.
//!
//! ```text
//!  SystemFacts ─► Selector ─► ModuleSelection
//!                                   │
//!  HwValues, BuildConfig ─────► ImageBuilder ─► JitLayout
//!                                                  │  &mut
//!                    PatchEngine ─► Relocator ─► serialize_prefetch
//!                                                  │
//!                                              BuiltImage
//! ```
//!
//! * [`registry`] binds each catalog module to its blob.
//! * [`select`] picks the modules and checks the choice.
//! * [`layout`] copies the hot sections behind an image header.
//! * [`patch`] writes hardware values and CPU-specific code variants.
//! * [`reloc`] fixes near calls between modules.
//! * [`serialize`] flushes the prefetch queue.
//! * [`pipeline`] runs all of the above and reports the failing stage.
//!
//! The same registry, facts and configuration always produce the same bytes.
//! Nothing here touches global state; the registry is shared by reference and
//! the layout is lent to one stage at a time.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

pub mod config;
pub mod facts;
pub mod layout;
pub mod patch;
pub mod pipeline;
pub mod registry;
pub mod reloc;
pub mod select;
pub mod serialize;

#[cfg(test)]
mod testing;

pub use config::BuildConfig;
pub use facts::{ChipsetFlags, CpuFeatures, HwValues, RuntimeFlags, SystemFacts};
pub use layout::{ImageBuilder, JitLayout, JitLayoutEntry};
pub use patch::PatchEngine;
pub use pipeline::{BuildStats, BuiltImage, JitError, Stage, build_image};
pub use registry::{ModuleRegistry, ModuleRegistryEntry, ModuleSource};
pub use reloc::{Relocator, near_displacement, near_target};
pub use select::{ModuleSelection, Selector};
pub use serialize::serialize_prefetch;
