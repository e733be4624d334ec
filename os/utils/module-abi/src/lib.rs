//! # Copy-down Module ABI
//!
//! Binary contract shared by the module toolchain, the copy-down engine
//! (`driver-jit`) and the resident installer.
//!
//! Every precompiled module blob starts with a fixed 64-byte [`ModuleHeader`].
//! The header names two byte ranges inside the blob: the **hot** section that
//! is copied into the resident image and the **cold** section that is thrown
//! away after init. A table of 32-byte [`PatchEntry`] records describes every
//! self-modifying-code site inside the hot section.
//!
//! The engine emits a single flat image whose first 32 bytes are an
//! [`ImageHeader`]; the installer validates it and wires interrupt vectors to
//! the entry offsets it names.
//!
//! ```text
//!  module blob                          resident image
//! ┌──────────────────┐ 0x00            ┌──────────────────┐ 0x00
//! │ ModuleHeader     │                 │ ImageHeader      │
//! ├──────────────────┤ hot_start       ├──────────────────┤ 0x20
//! │ hot section      │ ──── copy ───►  │ module 0 (hot)   │
//! ├──────────────────┤ hot_end         ├──────────────────┤
//! │ cold section     │                 │ module 1 (hot)   │
//! ├──────────────────┤                 ├──────────────────┤
//! │ patch table      │                 │ …                │
//! └──────────────────┘                 └──────────────────┘
//! ```
//!
//! All multi-byte fields are **little-endian**. The records are declared
//! `#[repr(C, packed)]` with a compile-time size check; conversion to and
//! from bytes is done field by field so the host's endianness never leaks
//! into a blob or an image.

#![cfg_attr(not(any(test, doctest)), no_std)]

#[cfg(feature = "assemble")]
extern crate alloc;

#[cfg(feature = "assemble")]
pub mod assemble;
#[cfg(feature = "parse")]
pub mod blob;
pub mod catalog;
mod header;
mod image;
mod patch;
mod read;

pub use catalog::{Category, CpuTier, ModuleDescriptor, ModuleId, NicType};
pub use header::{CapFlags, ModuleHeader};
pub use image::{ENTRY_UNSET, EntrySlot, ImageHeader};
pub use patch::{
    CopyField, Imm8Field, Imm16Field, PatchDirective, PatchEntry, PatchType, VARIANT_LEN,
};

/// Tag at the start of every valid module blob.
pub const MODULE_SIGNATURE: [u8; 7] = *b"JITMOD1";

/// Version of the [`ModuleHeader`] layout.
pub const MODULE_HEADER_VERSION: u8 = 1;

/// Size of a [`ModuleHeader`] in bytes.
pub const MODULE_HEADER_SIZE: usize = 64;

/// Size of a [`PatchEntry`] in bytes.
pub const PATCH_ENTRY_SIZE: usize = 32;

/// Magic identifying a built resident image (`"JTSR"` in little-endian).
pub const IMAGE_MAGIC: u32 = u32::from_le_bytes(*b"JTSR");

/// Version of the [`ImageHeader`] layout.
pub const IMAGE_VERSION: u16 = 1;

/// Size of an [`ImageHeader`] in bytes.
pub const IMAGE_HEADER_SIZE: usize = 32;

/// Largest image a single real-mode segment can address.
pub const MAX_IMAGE_SIZE: usize = 64 * 1024;

/// Largest patch site; one CPU code variant.
pub const MAX_PATCH_SIZE: usize = 5;

/// Errors raised while decoding module blobs, patch entries and image headers.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum AbiError {
    #[error("the buffer is too short for the record ({len} bytes, need {need})")]
    TooShort { len: usize, need: usize },
    #[error("a record lies outside of the buffer")]
    OutOfBounds,
    #[error("the module signature does not match")]
    BadSignature,
    #[error("the header checksum does not match (stored {stored:#06x}, computed {computed:#06x})")]
    BadChecksum { stored: u16, computed: u16 },
    #[error("the image magic does not match ({0:#010x})")]
    BadMagic(u32),
    #[error("unsupported layout version {0}")]
    BadVersion(u16),
    #[error("unknown patch type {0:#04x}")]
    UnknownPatchType(u8),
    #[error("unknown {kind:?} tag {tag:#04x}")]
    UnknownPatchTag { kind: PatchType, tag: u8 },
}
