#![allow(dead_code)]

use driver_jit::{HwValues, SystemFacts};
use module_abi::assemble::ModuleBlobBuilder;
use module_abi::{CpuTier, ModuleId, NicType, PatchEntry};
use std::collections::BTreeMap;

pub type Customize = fn(ModuleBlobBuilder) -> ModuleBlobBuilder;

/// Hot section size of every module that is not customized.
pub const HOT: usize = 16;

/// Offset of the I/O base patch every default module carries; clear of the
/// prefetch flush jump at offset 0.
pub const IO_SITE: u16 = 4;

/// A complete synthetic module library.
pub struct Catalog {
    custom: BTreeMap<ModuleId, Customize>,
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            custom: BTreeMap::new(),
        }
    }

    pub fn with(mut self, id: ModuleId, f: Customize) -> Self {
        self.custom.insert(id, f);
        self
    }

    /// Default module: `HOT` bytes of `0xCC` with one I/O base patch.
    pub fn default_module(b: ModuleBlobBuilder) -> ModuleBlobBuilder {
        b.hot(&[0xCC; HOT]).patch(PatchEntry::io(IO_SITE))
    }

    pub fn blobs(&self) -> BTreeMap<ModuleId, Vec<u8>> {
        ModuleId::iter()
            .map(|id| {
                let f = self.custom.get(&id).copied().unwrap_or(Self::default_module);
                (id, f(ModuleBlobBuilder::for_module(id)).build().unwrap())
            })
            .collect()
    }
}

pub fn facts(nic: NicType, tier: CpuTier) -> SystemFacts {
    SystemFacts {
        nic_type: Some(nic),
        cpu_tier: tier,
        ..SystemFacts::default()
    }
}

pub fn hw(nic: NicType, tier: CpuTier) -> HwValues {
    HwValues {
        io_base: 0x300,
        irq: 5,
        dma_channel: Some(1),
        mac: [0x00, 0x20, 0xAF, 0x01, 0x02, 0x03],
        nic_type: nic,
        cpu_tier: tier,
        ..HwValues::default()
    }
}
