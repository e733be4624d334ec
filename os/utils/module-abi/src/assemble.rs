//! # Module Blob Assembly
//!
//! Writes module blobs in the layout the engine reads:
//!
//! ```text
//! ┌──────────────┬─────────────┬──────────────┬─────────────────┐
//! │ ModuleHeader │ hot section │ cold section │ patch table     │
//! │ 64 bytes     │             │              │ 32 bytes/entry  │
//! └──────────────┴─────────────┴──────────────┴─────────────────┘
//! ```

use crate::{
    AbiError, CapFlags, MODULE_HEADER_SIZE, ModuleHeader, ModuleId, PATCH_ENTRY_SIZE, PatchEntry,
};
use alloc::vec::Vec;

type HeaderMap = fn(ModuleHeader) -> ModuleHeader;

/// Builder for a single module blob.
pub struct ModuleBlobBuilder {
    module_id: u16,
    name: &'static str,
    cpu_requirements: u8,
    nic_type: u8,
    caps: CapFlags,
    hot: Vec<u8>,
    cold: Vec<u8>,
    patches: Vec<PatchEntry>,
    checksum: bool,
    map: Option<HeaderMap>,
}

impl ModuleBlobBuilder {
    /// Start a blob for a catalog module, with its catalog defaults.
    #[must_use]
    pub fn for_module(id: ModuleId) -> Self {
        let d = id.descriptor();
        Self {
            module_id: id.raw(),
            name: d.name,
            cpu_requirements: d.cpu.ordinal(),
            nic_type: d.nic.tag(),
            caps: d.caps,
            hot: Vec::new(),
            cold: Vec::new(),
            patches: Vec::new(),
            checksum: true,
            map: None,
        }
    }

    #[must_use]
    pub fn hot(mut self, bytes: &[u8]) -> Self {
        self.hot = bytes.to_vec();
        self
    }

    #[must_use]
    pub fn cold(mut self, bytes: &[u8]) -> Self {
        self.cold = bytes.to_vec();
        self
    }

    #[must_use]
    pub fn patch(mut self, entry: PatchEntry) -> Self {
        self.patches.push(entry);
        self
    }

    #[must_use]
    pub const fn cpu_requirements(mut self, ordinal: u8) -> Self {
        self.cpu_requirements = ordinal;
        self
    }

    #[must_use]
    pub const fn nic_type(mut self, tag: u8) -> Self {
        self.nic_type = tag;
        self
    }

    #[must_use]
    pub const fn cap_flags(mut self, caps: CapFlags) -> Self {
        self.caps = caps;
        self
    }

    /// Claim to be a different module in the header.
    #[must_use]
    pub const fn module_id(mut self, raw: u16) -> Self {
        self.module_id = raw;
        self
    }

    /// Leave the header checksum at zero.
    #[must_use]
    pub const fn without_checksum(mut self) -> Self {
        self.checksum = false;
        self
    }

    /// Rewrite the finished header before it is sealed, e.g. to produce
    /// deliberately broken blobs.
    #[must_use]
    pub const fn map_header(mut self, map: HeaderMap) -> Self {
        self.map = Some(map);
        self
    }

    /// Lay out the blob and seal its header.
    ///
    /// # Errors
    /// [`AbiError::OutOfBounds`] if the blob would not be addressable with
    /// 16-bit offsets.
    pub fn build(self) -> Result<Vec<u8>, AbiError> {
        let offset = |n: usize| u16::try_from(n).map_err(|_| AbiError::OutOfBounds);

        let hot_start = MODULE_HEADER_SIZE;
        let hot_end = hot_start + self.hot.len();
        let cold_end = hot_end + self.cold.len();
        let table = cold_end;
        let total = table + self.patches.len() * PATCH_ENTRY_SIZE;

        let mut header = ModuleHeader::new(self.module_id, self.name)
            .with_hot_range(offset(hot_start)?, offset(hot_end)?)
            .with_cold_range(offset(hot_end)?, offset(cold_end)?)
            .with_patch_table(offset(table)?, offset(self.patches.len())?)
            .with_sizes(offset(self.hot.len())?, offset(total)?)
            .with_cpu_requirements(self.cpu_requirements)
            .with_nic_type(self.nic_type)
            .with_cap_flags(self.caps);
        if let Some(map) = self.map {
            header = map(header);
        }
        if self.checksum {
            header = header.sealed();
        }

        let mut blob = Vec::with_capacity(total);
        blob.extend_from_slice(&header.to_bytes());
        blob.extend_from_slice(&self.hot);
        blob.extend_from_slice(&self.cold);
        for p in &self.patches {
            blob.extend_from_slice(&p.to_bytes());
        }
        Ok(blob)
    }
}

#[cfg(all(test, feature = "parse"))]
mod test {
    use super::*;
    use crate::blob::ModuleBlob;
    use crate::{CpuTier, Imm8Field};

    #[test]
    fn built_blob_parses_back() {
        let raw = ModuleBlobBuilder::for_module(ModuleId::Copy386)
            .hot(&[1, 2, 3, 4])
            .cold(&[9; 8])
            .patch(PatchEntry::imm8(2, Imm8Field::Irq))
            .build()
            .unwrap();
        let m = ModuleBlob::parse(&raw).unwrap();
        assert_eq!(m.header().validate(), Ok(()));
        assert_eq!(m.header().name(), Some("mod_copy_386"));
        assert_eq!(m.header().cpu_tier(), CpuTier::Cpu80386);
        assert_eq!(m.hot_section().unwrap(), &[1, 2, 3, 4]);
        assert_eq!(m.patch_count(), 1);
        assert_eq!(usize::from(m.header().module_size()), raw.len());
    }

    #[test]
    fn header_rewrites_happen_before_sealing() {
        let raw = ModuleBlobBuilder::for_module(ModuleId::Isr)
            .hot(&[0x90; 2])
            .map_header(|h| h.with_hot_range(0x40, 0x40))
            .build()
            .unwrap();
        let m = ModuleBlob::parse(&raw).unwrap();
        assert_eq!(m.header().validate(), Ok(()));
        assert_eq!(m.header().hot_size(), None);
    }
}
