//! # Module Catalog
//!
//! Numbering and default metadata of every module the toolchain can build.
//! The numeric [`ModuleId`] is part of the binary contract: it is stored in
//! each [`ModuleHeader`](crate::ModuleHeader) and encoded into `RELOC_NEAR`
//! patch entries to name the call target.

use crate::CapFlags;
use core::fmt;

/// Minimum CPU generation, as an ordinal (`0` = 8086 … `4` = Pentium).
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub enum CpuTier {
    #[default]
    Cpu8086 = 0,
    Cpu80286 = 1,
    Cpu80386 = 2,
    Cpu80486 = 3,
    /// Pentium or newer, CPUID-capable.
    Pentium = 4,
}

impl CpuTier {
    /// All tiers, oldest first.
    pub const ALL: [Self; 5] = [
        Self::Cpu8086,
        Self::Cpu80286,
        Self::Cpu80386,
        Self::Cpu80486,
        Self::Pentium,
    ];

    #[must_use]
    pub const fn from_ordinal(ordinal: u8) -> Option<Self> {
        match ordinal {
            0 => Some(Self::Cpu8086),
            1 => Some(Self::Cpu80286),
            2 => Some(Self::Cpu80386),
            3 => Some(Self::Cpu80486),
            4 => Some(Self::Pentium),
            _ => None,
        }
    }

    #[must_use]
    pub const fn ordinal(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cpu8086 => "8086",
            Self::Cpu80286 => "80286",
            Self::Cpu80386 => "80386",
            Self::Cpu80486 => "80486",
            Self::Pentium => "Pentium",
        }
    }
}

impl fmt::Display for CpuTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// NIC family tag as stored in [`ModuleHeader::nic_type`](crate::ModuleHeader::nic_type).
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub enum NicType {
    /// Module works with any NIC.
    #[default]
    Any = 0,
    /// 3C509B `EtherLink` III (ISA, programmed I/O).
    Etherlink3 = 1,
    /// 3C515-TX Corkscrew (ISA bus master).
    Corkscrew = 2,
    /// 3C59x Vortex (PCI, programmed I/O).
    Vortex = 3,
    /// 3C90x Boomerang (PCI, descriptor rings).
    Boomerang = 4,
    /// 3C90xB Cyclone (PCI, descriptor rings).
    Cyclone = 5,
    /// 3C90xC Tornado (PCI, descriptor rings).
    Tornado = 6,
}

impl NicType {
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Any),
            1 => Some(Self::Etherlink3),
            2 => Some(Self::Corkscrew),
            3 => Some(Self::Vortex),
            4 => Some(Self::Boomerang),
            5 => Some(Self::Cyclone),
            6 => Some(Self::Tornado),
            _ => None,
        }
    }

    #[must_use]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// PCI generations that move frames through descriptor rings.
    #[must_use]
    pub const fn uses_descriptor_rings(self) -> bool {
        matches!(self, Self::Boomerang | Self::Cyclone | Self::Tornado)
    }

    /// The runtime module driving this NIC family, if there is one.
    #[must_use]
    pub const fn module(self) -> Option<ModuleId> {
        match self {
            Self::Any => None,
            Self::Etherlink3 => Some(ModuleId::Nic3c509b),
            Self::Corkscrew => Some(ModuleId::Nic3c515),
            Self::Vortex => Some(ModuleId::NicVortex),
            Self::Boomerang => Some(ModuleId::NicBoomerang),
            Self::Cyclone => Some(ModuleId::NicCyclone),
            Self::Tornado => Some(ModuleId::NicTornado),
        }
    }
}

/// Selection category of a module.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Category {
    /// Always part of the image.
    Core,
    /// NIC runtime; exactly one per image.
    Nic,
    /// Frame transfer strategy; exactly one per image.
    Dma,
    /// Optional helper of the DMA strategy (bounce buffers).
    DmaAssist,
    /// Cache management strategy; exactly one per image.
    Cache,
    /// Optional helper of the cache strategy (PCI snooping).
    CacheAssist,
    /// Bulk copy routines; exactly one per image.
    Copy,
}

impl Category {
    /// Categories that must contribute exactly one module.
    pub const EXCLUSIVE: [Self; 4] = [Self::Nic, Self::Dma, Self::Cache, Self::Copy];
}

/// Identifier of a compiled module.
#[repr(u16)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ModuleId {
    Isr = 0,
    Irq = 1,
    PktBuf = 2,
    Data = 3,
    Nic3c509b = 4,
    Nic3c515 = 5,
    NicVortex = 6,
    NicBoomerang = 7,
    NicCyclone = 8,
    NicTornado = 9,
    Pio = 10,
    DmaIsa = 11,
    DmaBusmaster = 12,
    DmaDescRing = 13,
    DmaBounce = 14,
    CacheNone = 15,
    CacheWbinvd = 16,
    CacheClflush = 17,
    CacheSnoop = 18,
    Copy8086 = 19,
    Copy286 = 20,
    Copy386 = 21,
    CopyPentium = 22,
    CorePktApi = 23,
    CoreNicIrq = 24,
    CoreHwSmc = 25,
    CorePcmIsr = 26,
    CoreFlowRt = 27,
    CoreDirPio = 28,
    CorePktOps = 29,
    CorePktCopy = 30,
    CoreTsrCom = 31,
    CoreTsrWrap = 32,
    CorePciIo = 33,
    CorePciIsr = 34,
    CoreLinkAsm = 35,
    CoreHwPkt = 36,
    CoreHwCfg = 37,
    CoreHwCoord = 38,
    CoreHwInit = 39,
    CoreHwEep = 40,
    CoreHwDma = 41,
    CoreCacheOps = 42,
    CoreTsrCrt = 43,
}

impl ModuleId {
    /// Number of modules in the catalog.
    pub const COUNT: usize = 44;

    /// Look up an id by its raw on-blob value.
    #[must_use]
    pub fn from_raw(raw: u16) -> Option<Self> {
        CATALOG.get(usize::from(raw)).map(|d| d.id)
    }

    #[must_use]
    pub const fn raw(self) -> u16 {
        self as u16
    }

    #[must_use]
    pub fn descriptor(self) -> &'static ModuleDescriptor {
        &CATALOG[self as usize]
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        self.descriptor().name
    }

    #[must_use]
    pub fn category(self) -> Category {
        self.descriptor().category
    }

    /// Every catalog id in registry order.
    pub fn iter() -> impl ExactSizeIterator<Item = Self> + Clone {
        CATALOG.iter().map(|d| d.id)
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Static metadata of a catalog entry.
///
/// `cpu`, `nic` and `caps` are the values the toolchain writes into a fresh
/// module header; the engine always trusts the header it finds in the blob.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ModuleDescriptor {
    pub id: ModuleId,
    pub name: &'static str,
    pub category: Category,
    pub cpu: CpuTier,
    pub nic: NicType,
    pub caps: CapFlags,
}

const fn module(
    id: ModuleId,
    name: &'static str,
    category: Category,
    cpu: CpuTier,
    nic: NicType,
    caps: CapFlags,
) -> ModuleDescriptor {
    ModuleDescriptor {
        id,
        name,
        category,
        cpu,
        nic,
        caps,
    }
}

const NONE: CapFlags = CapFlags::new();
const CORE: CapFlags = CapFlags::new().with_core(true);
const PCI: CapFlags = CapFlags::new().with_pci_bus(true);
const RING_NIC: CapFlags = PCI.with_busmaster_dma(true).with_descriptor_rings(true);
const ISA_DMA: CapFlags = CapFlags::new().with_isa_dma(true);
const BUSMASTER: CapFlags = CapFlags::new().with_busmaster_dma(true);
const DESC_RING: CapFlags = BUSMASTER.with_descriptor_rings(true);
const BOUNCE: CapFlags = CapFlags::new().with_bounce_buffers(true);
const WBINVD: CapFlags = CapFlags::new().with_wbinvd(true);
const CLFLUSH: CapFlags = CapFlags::new().with_clflush(true);
const SNOOP: CapFlags = PCI.with_pci_snoop(true);

use Category as C;
use CpuTier as T;
use ModuleId as M;
use NicType as N;

/// The catalog, indexed by [`ModuleId`].
pub static CATALOG: [ModuleDescriptor; ModuleId::COUNT] = DESCRIPTORS;

const DESCRIPTORS: [ModuleDescriptor; ModuleId::COUNT] = [
    module(M::Isr, "mod_isr", C::Core, T::Cpu8086, N::Any, CORE),
    module(M::Irq, "mod_irq", C::Core, T::Cpu8086, N::Any, CORE),
    module(M::PktBuf, "mod_pktbuf", C::Core, T::Cpu8086, N::Any, CORE),
    module(M::Data, "mod_data", C::Core, T::Cpu8086, N::Any, CORE),
    module(M::Nic3c509b, "mod_3c509b_rt", C::Nic, T::Cpu8086, N::Etherlink3, NONE),
    module(M::Nic3c515, "mod_3c515_rt", C::Nic, T::Cpu8086, N::Corkscrew, PCI),
    module(M::NicVortex, "mod_vortex_rt", C::Nic, T::Cpu80386, N::Vortex, PCI),
    module(M::NicBoomerang, "mod_boom_rt", C::Nic, T::Cpu80486, N::Boomerang, RING_NIC),
    module(M::NicCyclone, "mod_cyclone_rt", C::Nic, T::Cpu80486, N::Cyclone, RING_NIC),
    module(M::NicTornado, "mod_tornado_rt", C::Nic, T::Cpu80486, N::Tornado, RING_NIC),
    module(M::Pio, "mod_pio", C::Dma, T::Cpu8086, N::Any, NONE),
    module(M::DmaIsa, "mod_dma_isa", C::Dma, T::Cpu8086, N::Any, ISA_DMA),
    module(M::DmaBusmaster, "mod_dma_busmaster", C::Dma, T::Cpu80386, N::Any, BUSMASTER),
    module(M::DmaDescRing, "mod_dma_descring", C::Dma, T::Cpu80486, N::Any, DESC_RING),
    module(M::DmaBounce, "mod_dma_bounce", C::DmaAssist, T::Cpu8086, N::Any, BOUNCE),
    module(M::CacheNone, "mod_cache_none", C::Cache, T::Cpu8086, N::Any, NONE),
    module(M::CacheWbinvd, "mod_cache_wbinvd", C::Cache, T::Cpu80486, N::Any, WBINVD),
    module(M::CacheClflush, "mod_cache_clflush", C::Cache, T::Pentium, N::Any, CLFLUSH),
    module(M::CacheSnoop, "mod_cache_snoop", C::CacheAssist, T::Cpu80486, N::Any, SNOOP),
    module(M::Copy8086, "mod_copy_8086", C::Copy, T::Cpu8086, N::Any, NONE),
    module(M::Copy286, "mod_copy_286", C::Copy, T::Cpu80286, N::Any, NONE),
    module(M::Copy386, "mod_copy_386", C::Copy, T::Cpu80386, N::Any, NONE),
    module(M::CopyPentium, "mod_copy_pent", C::Copy, T::Pentium, N::Any, NONE),
    module(M::CorePktApi, "core_pktapi", C::Core, T::Cpu8086, N::Any, CORE),
    module(M::CoreNicIrq, "core_nicirq", C::Core, T::Cpu8086, N::Any, CORE),
    module(M::CoreHwSmc, "core_hwsmc", C::Core, T::Cpu8086, N::Any, CORE),
    module(M::CorePcmIsr, "core_pcmisr", C::Core, T::Cpu8086, N::Any, CORE),
    module(M::CoreFlowRt, "core_flowrt", C::Core, T::Cpu8086, N::Any, CORE),
    module(M::CoreDirPio, "core_dirpio", C::Core, T::Cpu8086, N::Any, CORE),
    module(M::CorePktOps, "core_pktops", C::Core, T::Cpu8086, N::Any, CORE),
    module(M::CorePktCopy, "core_pktcopy", C::Core, T::Cpu8086, N::Any, CORE),
    module(M::CoreTsrCom, "core_tsrcom", C::Core, T::Cpu8086, N::Any, CORE),
    module(M::CoreTsrWrap, "core_tsrwrap", C::Core, T::Cpu8086, N::Any, CORE),
    module(M::CorePciIo, "core_pci_io", C::Core, T::Cpu8086, N::Any, CORE),
    module(M::CorePciIsr, "core_pciisr", C::Core, T::Cpu8086, N::Any, CORE),
    module(M::CoreLinkAsm, "core_linkasm", C::Core, T::Cpu8086, N::Any, CORE),
    module(M::CoreHwPkt, "core_hwpkt", C::Core, T::Cpu8086, N::Any, CORE),
    module(M::CoreHwCfg, "core_hwcfg", C::Core, T::Cpu8086, N::Any, CORE),
    module(M::CoreHwCoord, "core_hwcoord", C::Core, T::Cpu8086, N::Any, CORE),
    module(M::CoreHwInit, "core_hwinit", C::Core, T::Cpu8086, N::Any, CORE),
    module(M::CoreHwEep, "core_hweep", C::Core, T::Cpu8086, N::Any, CORE),
    module(M::CoreHwDma, "core_hwdma", C::Core, T::Cpu8086, N::Any, CORE),
    module(M::CoreCacheOps, "core_cacheops", C::Core, T::Cpu8086, N::Any, CORE),
    module(M::CoreTsrCrt, "core_tsr_crt", C::Core, T::Cpu8086, N::Any, CORE),
];

// Index == id, so `ModuleId::descriptor` can index directly.
const _: () = {
    let mut i = 0;
    while i < DESCRIPTORS.len() {
        assert!(DESCRIPTORS[i].id as usize == i);
        i += 1;
    }
};
