//! # Module Selector
//!
//! Picks the modules for the detected hardware in a fixed order, without
//! backtracking:
//!
//! 1. every core module, in registry order
//! 2. the runtime module of the detected NIC
//! 3. one DMA strategy, plus its assists
//! 4. one cache strategy
//! 5. the fastest bulk-copy module the CPU can run
//!
//! The result is then checked by [`Selector::validate`].

use crate::facts::SystemFacts;
use crate::registry::{ModuleRegistry, ModuleRegistryEntry, RegistryError};
use alloc::vec::Vec;
use log::{debug, info};
use module_abi::{CapFlags, Category, CpuTier, ModuleId, NicType};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum SelectError {
    #[error("no NIC module matches the detected hardware")]
    NoNicModule,
    #[error("module {id} needs a {required} CPU, detected {detected}")]
    IncompatibleModule {
        id: ModuleId,
        required: CpuTier,
        detected: CpuTier,
    },
    #[error("selection is for a {detected} CPU but the patch values name a {patched}")]
    CpuTierMismatch { detected: CpuTier, patched: CpuTier },
    #[error("expected exactly one {category:?} module, selected {count}")]
    IncompleteSelection { category: Category, count: usize },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// The modules chosen for this boot, in layout order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleSelection {
    modules: Vec<ModuleId>,
    hot_bytes: usize,
    caps: CapFlags,
}

impl ModuleSelection {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            modules: Vec::new(),
            hot_bytes: 0,
            caps: CapFlags::new(),
        }
    }

    /// Append `entry`; selecting a module twice is a no-op.
    ///
    /// Returns whether the module was added.
    pub fn add(&mut self, entry: &ModuleRegistryEntry<'_>) -> bool {
        if self.contains(entry.id()) {
            return false;
        }
        self.modules.push(entry.id());
        self.hot_bytes += usize::from(entry.hot_size().unwrap_or(0));
        self.caps = self.caps.union(entry.cap_flags());
        true
    }

    #[must_use]
    pub fn contains(&self, id: ModuleId) -> bool {
        self.modules.contains(&id)
    }

    /// Selected modules in layout order.
    #[must_use]
    pub fn modules(&self) -> &[ModuleId] {
        &self.modules
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Sum of the selected hot sections, without the image header.
    #[must_use]
    pub const fn hot_bytes(&self) -> usize {
        self.hot_bytes
    }

    /// Union of the selected modules' capability flags.
    #[must_use]
    pub const fn caps(&self) -> CapFlags {
        self.caps
    }
}

/// Chooses modules from a registry.
pub struct Selector<'r, 'a> {
    registry: &'r ModuleRegistry<'a>,
}

impl<'r, 'a> Selector<'r, 'a> {
    #[must_use]
    pub const fn new(registry: &'r ModuleRegistry<'a>) -> Self {
        Self { registry }
    }

    /// Select and validate the modules for `facts`.
    ///
    /// # Errors
    /// [`SelectError::NoNicModule`] if no NIC was detected, otherwise any
    /// error of [`Selector::validate`].
    pub fn select(&self, facts: &SystemFacts) -> Result<ModuleSelection, SelectError> {
        let mut sel = ModuleSelection::new();

        for entry in self.registry.iter() {
            if entry.cap_flags().core() {
                sel.add(entry);
            }
        }

        let nic = facts
            .nic_type
            .and_then(NicType::module)
            .ok_or(SelectError::NoNicModule)?;
        self.add(&mut sel, nic)?;

        for id in dma_modules(facts) {
            self.add(&mut sel, id)?;
        }
        self.add(&mut sel, cache_module(facts))?;
        if let Some(copy) = self.copy_module(facts.cpu_tier) {
            self.add(&mut sel, copy)?;
        }

        self.validate(&sel, facts.cpu_tier)?;
        info!(
            "selected {} modules, {} hot bytes, caps {:#06x}",
            sel.len(),
            sel.hot_bytes(),
            sel.caps().into_bits()
        );
        Ok(sel)
    }

    fn add(&self, sel: &mut ModuleSelection, id: ModuleId) -> Result<(), RegistryError> {
        let entry = self.registry.get(id)?;
        if sel.add(entry) {
            debug!("selected {id} ({:?})", entry.category());
        }
        Ok(())
    }

    /// The copy module with the highest CPU requirement `tier` can run.
    fn copy_module(&self, tier: CpuTier) -> Option<ModuleId> {
        let mut best: Option<&ModuleRegistryEntry<'_>> = None;
        for entry in self.registry.iter() {
            if entry.category() != Category::Copy || entry.cpu_req() > tier {
                continue;
            }
            if best.is_none_or(|b| entry.cpu_req() > b.cpu_req()) {
                best = Some(entry);
            }
        }
        best.map(ModuleRegistryEntry::id)
    }

    /// Check a selection against the detected CPU tier.
    ///
    /// Every module must run on `tier`, and each of the NIC, DMA, cache and
    /// copy categories must contribute exactly one module. Assist modules are
    /// not counted.
    ///
    /// # Errors
    /// [`SelectError::IncompatibleModule`], [`SelectError::IncompleteSelection`]
    /// or [`SelectError::Registry`] for a module the registry does not know.
    pub fn validate(&self, selection: &ModuleSelection, tier: CpuTier) -> Result<(), SelectError> {
        let mut counts = [0usize; Category::EXCLUSIVE.len()];
        for &id in selection.modules() {
            let entry = self.registry.get(id)?;
            let required = entry.cpu_req();
            if required > tier {
                return Err(SelectError::IncompatibleModule {
                    id,
                    required,
                    detected: tier,
                });
            }
            if let Some(slot) = Category::EXCLUSIVE
                .iter()
                .position(|c| *c == entry.category())
            {
                counts[slot] += 1;
            }
        }

        for (category, count) in Category::EXCLUSIVE.into_iter().zip(counts) {
            if count != 1 {
                return Err(SelectError::IncompleteSelection { category, count });
            }
        }
        Ok(())
    }
}

/// DMA strategy followed by its assists.
fn dma_modules(facts: &SystemFacts) -> Vec<ModuleId> {
    let chipset = facts.chipset;
    let nic = facts.nic_type;

    let mut out = Vec::with_capacity(3);
    let busmaster = if nic.is_some_and(NicType::uses_descriptor_rings) {
        out.push(ModuleId::DmaDescRing);
        true
    } else if nic == Some(NicType::Corkscrew)
        && facts.busmaster_enabled
        && chipset.dma_safe()
    {
        out.push(ModuleId::DmaBusmaster);
        true
    } else if chipset.isa_dma() {
        out.push(ModuleId::DmaIsa);
        false
    } else {
        out.push(ModuleId::Pio);
        return out;
    };

    if facts.bounce_buffers_needed {
        out.push(ModuleId::DmaBounce);
    }
    if busmaster && chipset.pci_present() && chipset.dma_safe() {
        out.push(ModuleId::CacheSnoop);
    }
    out
}

fn cache_module(facts: &SystemFacts) -> ModuleId {
    if facts.cpu_features.clflush() {
        ModuleId::CacheClflush
    } else if facts.cpu_tier >= CpuTier::Cpu80486 {
        ModuleId::CacheWbinvd
    } else {
        ModuleId::CacheNone
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::facts::{ChipsetFlags, CpuFeatures};
    use crate::testing::Catalog;

    fn facts(nic: NicType, tier: CpuTier) -> SystemFacts {
        SystemFacts {
            nic_type: Some(nic),
            cpu_tier: tier,
            ..SystemFacts::default()
        }
    }

    #[test]
    fn isa_nic_on_an_8086_gets_the_minimal_set() {
        let blobs = Catalog::new().blobs();
        let reg = ModuleRegistry::init(&blobs).unwrap();
        let sel = Selector::new(&reg)
            .select(&facts(NicType::Etherlink3, CpuTier::Cpu8086))
            .unwrap();
        let m = sel.modules();
        assert_eq!(m[0], ModuleId::Isr);
        assert_eq!(
            &m[m.len() - 4..],
            &[
                ModuleId::Nic3c509b,
                ModuleId::Pio,
                ModuleId::CacheNone,
                ModuleId::Copy8086
            ]
        );
        assert_eq!(sel.len(), 4 + 21 + 4);
    }

    #[test]
    fn corkscrew_with_safe_chipset_uses_busmaster_dma() {
        let blobs = Catalog::new().blobs();
        let reg = ModuleRegistry::init(&blobs).unwrap();
        let f = SystemFacts {
            chipset: ChipsetFlags::new().with_dma_safe(true).with_pci_present(true),
            busmaster_enabled: true,
            bounce_buffers_needed: true,
            ..facts(NicType::Corkscrew, CpuTier::Cpu80486)
        };
        let sel = Selector::new(&reg).select(&f).unwrap();
        assert!(sel.contains(ModuleId::DmaBusmaster));
        assert!(sel.contains(ModuleId::DmaBounce));
        assert!(sel.contains(ModuleId::CacheSnoop));
        assert!(sel.contains(ModuleId::Copy386));
    }

    #[test]
    fn corkscrew_without_busmaster_falls_back_to_isa_dma() {
        let blobs = Catalog::new().blobs();
        let reg = ModuleRegistry::init(&blobs).unwrap();
        let f = SystemFacts {
            chipset: ChipsetFlags::new().with_dma_safe(true).with_isa_dma(true),
            ..facts(NicType::Corkscrew, CpuTier::Cpu80286)
        };
        let sel = Selector::new(&reg).select(&f).unwrap();
        assert!(sel.contains(ModuleId::DmaIsa));
        assert!(!sel.contains(ModuleId::CacheSnoop));
        assert!(sel.contains(ModuleId::Copy286));
    }

    #[test]
    fn clflush_wins_over_wbinvd() {
        let blobs = Catalog::new().blobs();
        let reg = ModuleRegistry::init(&blobs).unwrap();
        let f = SystemFacts {
            cpu_features: CpuFeatures::new().with_cpuid(true).with_clflush(true),
            ..facts(NicType::Tornado, CpuTier::Pentium)
        };
        let sel = Selector::new(&reg).select(&f).unwrap();
        assert!(sel.contains(ModuleId::CacheClflush));
        assert!(!sel.contains(ModuleId::CacheWbinvd));
        assert!(sel.contains(ModuleId::DmaDescRing));
        assert!(sel.contains(ModuleId::CopyPentium));
    }

    #[test]
    fn ring_nic_on_a_safe_pci_chipset_gets_both_assists() {
        let blobs = Catalog::new().blobs();
        let reg = ModuleRegistry::init(&blobs).unwrap();
        let f = SystemFacts {
            chipset: ChipsetFlags::new().with_dma_safe(true).with_pci_present(true),
            bounce_buffers_needed: true,
            ..facts(NicType::Cyclone, CpuTier::Pentium)
        };
        let sel = Selector::new(&reg).select(&f).unwrap();
        let m = sel.modules();
        assert_eq!(
            &m[m.len() - 6..],
            &[
                ModuleId::NicCyclone,
                ModuleId::DmaDescRing,
                ModuleId::DmaBounce,
                ModuleId::CacheSnoop,
                ModuleId::CacheWbinvd,
                ModuleId::CopyPentium
            ]
        );
    }

    #[test]
    fn ring_nic_without_pci_snooping_gets_no_snoop_module() {
        let blobs = Catalog::new().blobs();
        let reg = ModuleRegistry::init(&blobs).unwrap();
        let f = SystemFacts {
            chipset: ChipsetFlags::new().with_pci_present(true),
            ..facts(NicType::Boomerang, CpuTier::Cpu80486)
        };
        let sel = Selector::new(&reg).select(&f).unwrap();
        assert!(sel.contains(ModuleId::DmaDescRing));
        assert!(!sel.contains(ModuleId::DmaBounce));
        assert!(!sel.contains(ModuleId::CacheSnoop));
    }

    #[test]
    fn a_486_without_clflush_uses_wbinvd() {
        let blobs = Catalog::new().blobs();
        let reg = ModuleRegistry::init(&blobs).unwrap();
        let sel = Selector::new(&reg)
            .select(&facts(NicType::Etherlink3, CpuTier::Cpu80486))
            .unwrap();
        assert!(sel.contains(ModuleId::CacheWbinvd));
        assert!(!sel.contains(ModuleId::CacheNone));
        assert!(!sel.contains(ModuleId::CacheClflush));
        assert!(sel.contains(ModuleId::Copy386));
    }

    #[test]
    fn vortex_without_isa_dma_falls_back_to_pio() {
        let blobs = Catalog::new().blobs();
        let reg = ModuleRegistry::init(&blobs).unwrap();
        let f = SystemFacts {
            chipset: ChipsetFlags::new().with_pci_present(true).with_dma_safe(true),
            bounce_buffers_needed: true,
            ..facts(NicType::Vortex, CpuTier::Cpu80386)
        };
        let sel = Selector::new(&reg).select(&f).unwrap();
        let m = sel.modules();
        assert_eq!(
            &m[m.len() - 4..],
            &[
                ModuleId::NicVortex,
                ModuleId::Pio,
                ModuleId::CacheNone,
                ModuleId::Copy386
            ]
        );
    }

    #[test]
    fn isa_dma_takes_a_bounce_module_but_never_snoops() {
        let blobs = Catalog::new().blobs();
        let reg = ModuleRegistry::init(&blobs).unwrap();
        let f = SystemFacts {
            chipset: ChipsetFlags::from_bits(0x07),
            bounce_buffers_needed: true,
            ..facts(NicType::Etherlink3, CpuTier::Cpu80486)
        };
        let sel = Selector::new(&reg).select(&f).unwrap();
        assert!(sel.contains(ModuleId::DmaIsa));
        assert!(sel.contains(ModuleId::DmaBounce));
        assert!(!sel.contains(ModuleId::CacheSnoop));
    }

    #[test]
    fn missing_nic_is_reported() {
        let blobs = Catalog::new().blobs();
        let reg = ModuleRegistry::init(&blobs).unwrap();
        let f = SystemFacts::default();
        assert_eq!(
            Selector::new(&reg).select(&f),
            Err(SelectError::NoNicModule)
        );
        let f = facts(NicType::Any, CpuTier::Pentium);
        assert_eq!(
            Selector::new(&reg).select(&f),
            Err(SelectError::NoNicModule)
        );
    }

    #[test]
    fn validate_rejects_two_cache_strategies() {
        let blobs = Catalog::new().blobs();
        let reg = ModuleRegistry::init(&blobs).unwrap();
        let selector = Selector::new(&reg);
        let mut sel = selector
            .select(&facts(NicType::Etherlink3, CpuTier::Cpu80486))
            .unwrap();
        assert!(sel.add(reg.get(ModuleId::CacheNone).unwrap()));
        assert!(!sel.add(reg.get(ModuleId::CacheNone).unwrap()));
        assert_eq!(
            selector.validate(&sel, CpuTier::Cpu80486),
            Err(SelectError::IncompleteSelection {
                category: Category::Cache,
                count: 2
            })
        );
    }
}
