//! # Module Registry
//!
//! Binds every catalog [`ModuleId`] to its compiled blob. The registry is
//! built once per boot and only read afterwards.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use log::debug;
use module_abi::blob::ModuleBlob;
use module_abi::{CapFlags, Category, CpuTier, ModuleHeader, ModuleId};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("no blob was provided for module {0}")]
    MissingModule(ModuleId),
    #[error("the blob of module {0} is shorter than a module header")]
    Truncated(ModuleId),
    #[error("the blob provided for module {id} claims to be module {found}")]
    IdMismatch { id: ModuleId, found: u16 },
    #[error("the header checksum of module {0} does not match")]
    BadChecksum(ModuleId),
    #[error("module {0} is not registered")]
    NotFound(ModuleId),
}

/// Where the registry gets its blobs from.
pub trait ModuleSource<'a> {
    fn blob(&self, id: ModuleId) -> Option<&'a [u8]>;
}

impl<'a> ModuleSource<'a> for BTreeMap<ModuleId, &'a [u8]> {
    fn blob(&self, id: ModuleId) -> Option<&'a [u8]> {
        self.get(&id).copied()
    }
}

impl<'a> ModuleSource<'a> for &'a BTreeMap<ModuleId, Vec<u8>> {
    fn blob(&self, id: ModuleId) -> Option<&'a [u8]> {
        let map: &'a BTreeMap<ModuleId, Vec<u8>> = *self;
        map.get(&id).map(Vec::as_slice)
    }
}

impl<'a> ModuleSource<'a> for &[(ModuleId, &'a [u8])] {
    fn blob(&self, id: ModuleId) -> Option<&'a [u8]> {
        self.iter().find(|(m, _)| *m == id).map(|(_, b)| *b)
    }
}

/// A registered module.
#[derive(Debug, Copy, Clone)]
pub struct ModuleRegistryEntry<'a> {
    id: ModuleId,
    blob: ModuleBlob<'a>,
    hot_size: Option<u16>,
}

impl<'a> ModuleRegistryEntry<'a> {
    #[must_use]
    pub const fn id(&self) -> ModuleId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.id.name()
    }

    #[must_use]
    pub fn category(&self) -> Category {
        self.id.category()
    }

    #[must_use]
    pub const fn header(&self) -> &ModuleHeader {
        self.blob.header()
    }

    #[must_use]
    pub const fn blob(&self) -> &ModuleBlob<'a> {
        &self.blob
    }

    #[must_use]
    pub const fn cap_flags(&self) -> CapFlags {
        self.blob.header().cap_flags()
    }

    #[must_use]
    pub const fn cpu_req(&self) -> CpuTier {
        self.blob.header().cpu_tier()
    }

    #[must_use]
    pub const fn nic_type(&self) -> u8 {
        self.blob.header().nic_type()
    }

    /// Size of the hot section, `None` when the header's range is empty.
    #[must_use]
    pub const fn hot_size(&self) -> Option<u16> {
        self.hot_size
    }
}

/// All catalog modules, in catalog order.
#[derive(Debug, Clone)]
pub struct ModuleRegistry<'a> {
    entries: Vec<ModuleRegistryEntry<'a>>,
}

impl<'a> ModuleRegistry<'a> {
    /// Register the blob of every catalog module.
    ///
    /// # Errors
    /// Any [`RegistryError`] but [`RegistryError::NotFound`]; the first
    /// failing module in catalog order is reported.
    pub fn init(source: impl ModuleSource<'a>) -> Result<Self, RegistryError> {
        let mut entries = Vec::with_capacity(ModuleId::COUNT);
        for id in ModuleId::iter() {
            let raw = source.blob(id).ok_or(RegistryError::MissingModule(id))?;
            let blob = ModuleBlob::parse(raw).map_err(|_| RegistryError::Truncated(id))?;
            let header = blob.header();

            let found = header.module_id();
            if found != id.raw() {
                return Err(RegistryError::IdMismatch { id, found });
            }
            header
                .verify_checksum()
                .map_err(|_| RegistryError::BadChecksum(id))?;

            let hot_size = header.hot_size();
            debug!(
                "registered {id}: {} bytes, hot size {hot_size:?}, cpu {}",
                raw.len(),
                header.cpu_tier()
            );
            entries.push(ModuleRegistryEntry { id, blob, hot_size });
        }
        Ok(Self { entries })
    }

    /// # Errors
    /// [`RegistryError::NotFound`] if `id` was not registered.
    pub fn get(&self, id: ModuleId) -> Result<&ModuleRegistryEntry<'a>, RegistryError> {
        self.entries
            .get(usize::from(id.raw()))
            .filter(|e| e.id == id)
            .ok_or(RegistryError::NotFound(id))
    }

    /// Entries in catalog order.
    pub fn iter(&self) -> impl Iterator<Item = &ModuleRegistryEntry<'a>> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::Catalog;

    #[test]
    fn registers_every_catalog_module() {
        let blobs = Catalog::new().blobs();
        let reg = ModuleRegistry::init(&blobs).unwrap();
        assert_eq!(reg.len(), ModuleId::COUNT);
        let isr = reg.get(ModuleId::Isr).unwrap();
        assert_eq!(isr.name(), "mod_isr");
        assert_eq!(isr.category(), Category::Core);
        assert!(isr.cap_flags().core());
        assert_eq!(isr.hot_size(), Some(Catalog::DEFAULT_HOT_SIZE));
    }

    #[test]
    fn missing_blob_fails_init() {
        let mut blobs = Catalog::new().blobs();
        blobs.remove(&ModuleId::CacheSnoop);
        assert_eq!(
            ModuleRegistry::init(&blobs).unwrap_err(),
            RegistryError::MissingModule(ModuleId::CacheSnoop)
        );
    }

    #[test]
    fn blob_for_another_module_is_rejected() {
        let mut blobs = Catalog::new().blobs();
        let pio = blobs[&ModuleId::Pio].clone();
        blobs.insert(ModuleId::DmaIsa, pio);
        assert_eq!(
            ModuleRegistry::init(&blobs).unwrap_err(),
            RegistryError::IdMismatch {
                id: ModuleId::DmaIsa,
                found: ModuleId::Pio.raw()
            }
        );
    }

    #[test]
    fn short_or_corrupt_blobs_are_rejected() {
        let mut blobs = Catalog::new().blobs();
        blobs.insert(ModuleId::Irq, vec![0u8; 10]);
        assert_eq!(
            ModuleRegistry::init(&blobs).unwrap_err(),
            RegistryError::Truncated(ModuleId::Irq)
        );

        let mut blobs = Catalog::new().blobs();
        if let Some(b) = blobs.get_mut(&ModuleId::Data) {
            b[0x08] ^= 0x01;
        }
        assert_eq!(
            ModuleRegistry::init(&blobs).unwrap_err(),
            RegistryError::BadChecksum(ModuleId::Data)
        );
    }

    #[test]
    fn slices_of_pairs_are_a_source() {
        let blobs = Catalog::new().blobs();
        let pairs: Vec<(ModuleId, &[u8])> =
            blobs.iter().map(|(id, b)| (*id, b.as_slice())).collect();
        let reg = ModuleRegistry::init(pairs.as_slice()).unwrap();
        assert!(reg.get(ModuleId::CoreTsrCrt).is_ok());
    }
}
