//! # Hardware Facts
//!
//! Snapshots produced by detection code outside this crate. The selector
//! reads [`SystemFacts`]; the image builder and the patch engine read
//! [`HwValues`]. Neither is modified once the pipeline starts.

use bitfield_struct::bitfield;
use module_abi::{CpuTier, NicType};

/// Runtime flags patched into `IMM16` sites tagged as runtime flags.
#[bitfield(u16)]
#[derive(PartialEq, Eq)]
pub struct RuntimeFlags {
    pub busmaster_capable: bool,
    pub vds_available: bool,
    pub write_back_cache: bool,
    #[bits(13)]
    __: u16,
}

/// Chipset capabilities as reported by chipset detection.
///
/// Bit positions follow the detection code's flag byte so a raw value can be
/// passed through unchanged.
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct ChipsetFlags {
    /// Bus-master DMA does not corrupt memory on this chipset.
    pub dma_safe: bool,
    /// An ISA DMA controller is available.
    pub isa_dma: bool,
    pub pci_present: bool,
    #[bits(3)]
    __res3_5: u8,
    /// The chipset runs the cache in write-back mode.
    pub write_back: bool,
    #[bits(1)]
    __res7: u8,
}

/// CPU feature bits relevant to module selection.
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct CpuFeatures {
    pub cpuid: bool,
    pub clflush: bool,
    #[bits(6)]
    __: u8,
}

/// Hardware values written into the image by the patch engine.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HwValues {
    pub io_base: u16,
    pub irq: u8,
    /// ISA DMA channel, if the NIC uses one.
    pub dma_channel: Option<u8>,
    pub mac: [u8; 6],
    pub nic_type: NicType,
    pub cpu_tier: CpuTier,
    pub flags: RuntimeFlags,
    pub cache_line_size: u8,
}

impl HwValues {
    /// Encoding of a missing DMA channel in `IMM8` sites.
    pub const NO_DMA_CHANNEL: u8 = 0xFF;

    /// The DMA channel as patched into the image.
    #[must_use]
    pub fn dma_channel_byte(&self) -> u8 {
        self.dma_channel.unwrap_or(Self::NO_DMA_CHANNEL)
    }
}

impl Default for HwValues {
    fn default() -> Self {
        Self {
            io_base: 0x300,
            irq: 10,
            dma_channel: None,
            mac: [0; 6],
            nic_type: NicType::Any,
            cpu_tier: CpuTier::Cpu8086,
            flags: RuntimeFlags::new(),
            cache_line_size: 16,
        }
    }
}

/// Capability and context snapshot consumed by the selector.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct SystemFacts {
    /// The detected NIC family, if detection found one.
    pub nic_type: Option<NicType>,
    pub chipset: ChipsetFlags,
    /// Bus mastering was tested and enabled for this NIC.
    pub busmaster_enabled: bool,
    /// Some buffers lie above the 16 MiB ISA DMA limit.
    pub bounce_buffers_needed: bool,
    pub vds_available: bool,
    pub cpu_tier: CpuTier,
    pub cpu_features: CpuFeatures,
}
