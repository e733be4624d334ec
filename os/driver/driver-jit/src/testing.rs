//! Synthetic module catalogs for unit tests.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use module_abi::ModuleId;
use module_abi::assemble::ModuleBlobBuilder;

pub type Customize = fn(ModuleBlobBuilder) -> ModuleBlobBuilder;

/// Every catalog module with a small hot section and catalog defaults.
pub struct Catalog {
    custom: BTreeMap<ModuleId, Customize>,
}

impl Catalog {
    pub const DEFAULT_HOT_SIZE: u16 = 16;

    pub fn new() -> Self {
        Self {
            custom: BTreeMap::new(),
        }
    }

    /// Replace the default blob of `id`; `f` starts from a builder with
    /// catalog defaults and no hot bytes.
    pub fn with(mut self, id: ModuleId, f: Customize) -> Self {
        self.custom.insert(id, f);
        self
    }

    /// Default hot bytes of `id`: filled with the low byte of its id.
    pub fn hot_fill(id: ModuleId) -> u8 {
        id.raw().to_le_bytes()[0]
    }

    pub fn blobs(&self) -> BTreeMap<ModuleId, Vec<u8>> {
        ModuleId::iter()
            .map(|id| {
                let base = ModuleBlobBuilder::for_module(id);
                let builder = match self.custom.get(&id) {
                    Some(f) => f(base),
                    None => base.hot(&[Self::hot_fill(id); Self::DEFAULT_HOT_SIZE as usize]),
                };
                (id, builder.build().unwrap())
            })
            .collect()
    }
}
