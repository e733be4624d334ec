//! # Module Header

use crate::read::{bytes, ensure_len, u8_at, u16_le};
use crate::{AbiError, CpuTier, MODULE_HEADER_SIZE, MODULE_HEADER_VERSION, MODULE_SIGNATURE};
use bitfield_struct::bitfield;

/// Capability requirements of a module (`ModuleHeader::cap_flags`).
///
/// Layout (LSB→MSB):
/// - bit 0: ISA DMA channel
/// - bit 1: bus-master DMA
/// - bit 2: `CLFLUSH` instruction
/// - bit 3: `WBINVD` instruction
/// - bit 4: PCI bus
/// - bit 5: bounce buffers
/// - bit 6: virtual DMA services (VDS)
/// - bit 7: extended memory (XMS)
/// - bit 8: descriptor rings
/// - bit 9: PCI snooping
/// - bit 10: core module, always included
/// - bits 11..15: reserved
#[bitfield(u16)]
#[derive(PartialEq, Eq)]
pub struct CapFlags {
    pub isa_dma: bool,
    pub busmaster_dma: bool,
    pub clflush: bool,
    pub wbinvd: bool,
    pub pci_bus: bool,
    pub bounce_buffers: bool,
    pub vds: bool,
    pub xms: bool,
    pub descriptor_rings: bool,
    pub pci_snoop: bool,
    pub core: bool,
    #[bits(5)]
    __: u8,
}

impl CapFlags {
    /// Bitwise union of both flag sets.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self::from_bits(self.into_bits() | other.into_bits())
    }

    /// Whether every flag set in `other` is also set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.into_bits() & other.into_bits() == other.into_bits()
    }
}

/// Fixed 64-byte header at the start of every module blob.
///
/// Fields are private; the record is packed, so every accessor returns by value.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ModuleHeader {
    signature: [u8; 7],
    header_version: u8,
    hot_start: u16,
    hot_end: u16,
    cold_start: u16,
    cold_end: u16,
    patch_table_offset: u16,
    patch_count: u16,
    required_memory: u16,
    module_size: u16,
    cpu_requirements: u8,
    nic_type: u8,
    cap_flags: CapFlags,
    module_id: u16,
    name: [u8; 12],
    header_checksum: u16,
    reserved: [u8; 20],
}

const _: () = assert!(size_of::<ModuleHeader>() == MODULE_HEADER_SIZE);

/// Byte offset of `header_checksum`; excluded from the checksum itself.
const CHECKSUM_OFFSET: usize = 0x2A;

impl ModuleHeader {
    /// Decode a header from the first 64 bytes of `buf`.
    ///
    /// Only the length is checked here; see [`ModuleHeader::validate`].
    ///
    /// # Errors
    /// [`AbiError::TooShort`] if `buf` is shorter than a header.
    pub fn parse(buf: &[u8]) -> Result<Self, AbiError> {
        ensure_len(buf, MODULE_HEADER_SIZE)?;
        Ok(Self {
            signature: bytes::<7>(buf, 0x00)?,
            header_version: u8_at(buf, 0x07)?,
            hot_start: u16_le(buf, 0x08)?,
            hot_end: u16_le(buf, 0x0A)?,
            cold_start: u16_le(buf, 0x0C)?,
            cold_end: u16_le(buf, 0x0E)?,
            patch_table_offset: u16_le(buf, 0x10)?,
            patch_count: u16_le(buf, 0x12)?,
            required_memory: u16_le(buf, 0x14)?,
            module_size: u16_le(buf, 0x16)?,
            cpu_requirements: u8_at(buf, 0x18)?,
            nic_type: u8_at(buf, 0x19)?,
            cap_flags: CapFlags::from_bits(u16_le(buf, 0x1A)?),
            module_id: u16_le(buf, 0x1C)?,
            name: bytes::<12>(buf, 0x1E)?,
            header_checksum: u16_le(buf, CHECKSUM_OFFSET)?,
            reserved: bytes::<20>(buf, 0x2C)?,
        })
    }

    /// Encode the header in its on-blob layout.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; MODULE_HEADER_SIZE] {
        let mut out = [0u8; MODULE_HEADER_SIZE];
        out[0x00..0x07].copy_from_slice(&{ self.signature });
        out[0x07] = self.header_version;
        out[0x08..0x0A].copy_from_slice(&{ self.hot_start }.to_le_bytes());
        out[0x0A..0x0C].copy_from_slice(&{ self.hot_end }.to_le_bytes());
        out[0x0C..0x0E].copy_from_slice(&{ self.cold_start }.to_le_bytes());
        out[0x0E..0x10].copy_from_slice(&{ self.cold_end }.to_le_bytes());
        out[0x10..0x12].copy_from_slice(&{ self.patch_table_offset }.to_le_bytes());
        out[0x12..0x14].copy_from_slice(&{ self.patch_count }.to_le_bytes());
        out[0x14..0x16].copy_from_slice(&{ self.required_memory }.to_le_bytes());
        out[0x16..0x18].copy_from_slice(&{ self.module_size }.to_le_bytes());
        out[0x18] = self.cpu_requirements;
        out[0x19] = self.nic_type;
        out[0x1A..0x1C].copy_from_slice(&{ self.cap_flags }.into_bits().to_le_bytes());
        out[0x1C..0x1E].copy_from_slice(&{ self.module_id }.to_le_bytes());
        out[0x1E..0x2A].copy_from_slice(&{ self.name });
        out[0x2A..0x2C].copy_from_slice(&{ self.header_checksum }.to_le_bytes());
        out[0x2C..0x40].copy_from_slice(&{ self.reserved });
        out
    }

    /// Check the signature, the header version and the checksum.
    ///
    /// # Errors
    /// [`AbiError::BadSignature`], [`AbiError::BadVersion`] or
    /// [`AbiError::BadChecksum`].
    pub fn validate(&self) -> Result<(), AbiError> {
        if !self.has_valid_signature() {
            return Err(AbiError::BadSignature);
        }
        if self.header_version != MODULE_HEADER_VERSION {
            return Err(AbiError::BadVersion(u16::from(self.header_version)));
        }
        self.verify_checksum()
    }

    #[must_use]
    pub fn has_valid_signature(&self) -> bool {
        self.signature == MODULE_SIGNATURE
    }

    /// A stored checksum of zero means the toolchain did not checksum the header.
    ///
    /// # Errors
    /// [`AbiError::BadChecksum`] if a non-zero checksum does not match.
    pub fn verify_checksum(&self) -> Result<(), AbiError> {
        let stored = self.header_checksum;
        if stored == 0 {
            return Ok(());
        }
        let computed = Self::checksum_of(&self.to_bytes());
        if stored != computed {
            return Err(AbiError::BadChecksum { stored, computed });
        }
        Ok(())
    }

    /// Two's complement of the byte sum of `raw`, skipping the checksum field.
    #[must_use]
    pub fn checksum_of(raw: &[u8; MODULE_HEADER_SIZE]) -> u16 {
        let sum = raw
            .iter()
            .enumerate()
            .filter(|(i, _)| !(CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2).contains(i))
            .fold(0u16, |acc, (_, b)| acc.wrapping_add(u16::from(*b)));
        (!sum).wrapping_add(1)
    }

    /// Size of the resident range, or `None` if `hot_end <= hot_start`.
    #[must_use]
    pub const fn hot_size(&self) -> Option<u16> {
        let (start, end) = (self.hot_start, self.hot_end);
        if end > start { Some(end - start) } else { None }
    }

    #[must_use]
    pub const fn signature(&self) -> [u8; 7] {
        self.signature
    }

    #[must_use]
    pub const fn header_version(&self) -> u8 {
        self.header_version
    }

    #[must_use]
    pub const fn hot_start(&self) -> u16 {
        self.hot_start
    }

    #[must_use]
    pub const fn hot_end(&self) -> u16 {
        self.hot_end
    }

    #[must_use]
    pub const fn cold_start(&self) -> u16 {
        self.cold_start
    }

    #[must_use]
    pub const fn cold_end(&self) -> u16 {
        self.cold_end
    }

    #[must_use]
    pub const fn patch_table_offset(&self) -> u16 {
        self.patch_table_offset
    }

    #[must_use]
    pub const fn patch_count(&self) -> u16 {
        self.patch_count
    }

    #[must_use]
    pub const fn required_memory(&self) -> u16 {
        self.required_memory
    }

    #[must_use]
    pub const fn module_size(&self) -> u16 {
        self.module_size
    }

    /// Raw CPU tier ordinal; see [`ModuleHeader::cpu_tier`].
    #[must_use]
    pub const fn cpu_requirements(&self) -> u8 {
        self.cpu_requirements
    }

    /// The CPU requirement as a tier; ordinals above the newest tier clamp to it.
    #[must_use]
    pub const fn cpu_tier(&self) -> CpuTier {
        match CpuTier::from_ordinal(self.cpu_requirements) {
            Some(tier) => tier,
            None => CpuTier::Pentium,
        }
    }

    #[must_use]
    pub const fn nic_type(&self) -> u8 {
        self.nic_type
    }

    #[must_use]
    pub const fn cap_flags(&self) -> CapFlags {
        self.cap_flags
    }

    #[must_use]
    pub const fn module_id(&self) -> u16 {
        self.module_id
    }

    /// Module name up to the first NUL, if it is valid UTF-8.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        let name = &self.name;
        let len = name.iter().position(|&b| b == 0).unwrap_or(name.len());
        core::str::from_utf8(&name[..len]).ok()
    }

    #[must_use]
    pub const fn header_checksum(&self) -> u16 {
        self.header_checksum
    }
}

#[cfg(feature = "assemble")]
impl ModuleHeader {
    /// A fresh, valid header; every range is empty.
    #[must_use]
    pub fn new(module_id: u16, name: &str) -> Self {
        let mut raw_name = [0u8; 12];
        let len = name.len().min(raw_name.len());
        raw_name[..len].copy_from_slice(&name.as_bytes()[..len]);
        Self {
            signature: MODULE_SIGNATURE,
            header_version: MODULE_HEADER_VERSION,
            hot_start: 0,
            hot_end: 0,
            cold_start: 0,
            cold_end: 0,
            patch_table_offset: 0,
            patch_count: 0,
            required_memory: 0,
            module_size: 0,
            cpu_requirements: 0,
            nic_type: 0,
            cap_flags: CapFlags::new(),
            module_id,
            name: raw_name,
            header_checksum: 0,
            reserved: [0; 20],
        }
    }

    #[must_use]
    pub const fn with_signature(mut self, signature: [u8; 7]) -> Self {
        self.signature = signature;
        self
    }

    #[must_use]
    pub const fn with_header_version(mut self, version: u8) -> Self {
        self.header_version = version;
        self
    }

    #[must_use]
    pub const fn with_hot_range(mut self, start: u16, end: u16) -> Self {
        self.hot_start = start;
        self.hot_end = end;
        self
    }

    #[must_use]
    pub const fn with_cold_range(mut self, start: u16, end: u16) -> Self {
        self.cold_start = start;
        self.cold_end = end;
        self
    }

    #[must_use]
    pub const fn with_patch_table(mut self, offset: u16, count: u16) -> Self {
        self.patch_table_offset = offset;
        self.patch_count = count;
        self
    }

    #[must_use]
    pub const fn with_sizes(mut self, required_memory: u16, module_size: u16) -> Self {
        self.required_memory = required_memory;
        self.module_size = module_size;
        self
    }

    #[must_use]
    pub const fn with_cpu_requirements(mut self, ordinal: u8) -> Self {
        self.cpu_requirements = ordinal;
        self
    }

    #[must_use]
    pub const fn with_nic_type(mut self, tag: u8) -> Self {
        self.nic_type = tag;
        self
    }

    #[must_use]
    pub const fn with_cap_flags(mut self, flags: CapFlags) -> Self {
        self.cap_flags = flags;
        self
    }

    /// Store the checksum of the current contents.
    #[must_use]
    pub fn sealed(mut self) -> Self {
        self.header_checksum = 0;
        self.header_checksum = Self::checksum_of(&self.to_bytes());
        self
    }
}
