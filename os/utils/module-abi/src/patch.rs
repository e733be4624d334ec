//! # Patch Table Entries
//!
//! Each [`PatchEntry`] names one self-modifying-code site inside a module's
//! hot section. Five 5-byte code variants are stored per entry, one per
//! [`CpuTier`](crate::CpuTier). Most patch types only need a handful of
//! parameter bytes; those are packed into the first (8086) variant and are
//! decoded into a [`PatchDirective`] before use.

use crate::read::{bytes, ensure_len, u8_at, u16_le};
use crate::{AbiError, CpuTier, PATCH_ENTRY_SIZE};

/// Length of one code variant.
pub const VARIANT_LEN: usize = 5;

/// Number of code variants per entry, one per CPU tier.
const VARIANT_COUNT: usize = CpuTier::ALL.len();

/// Raw patch type as stored in [`PatchEntry`].
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum PatchType {
    Copy = 1,
    Io = 2,
    Checksum = 3,
    Isr = 4,
    Branch = 5,
    DmaCheck = 6,
    CachePre = 7,
    CachePost = 8,
    BounceCopy = 9,
    Endian = 10,
    Imm16 = 11,
    Imm8 = 12,
    RelocNear = 13,
    Nop = 14,
}

impl TryFrom<u8> for PatchType {
    type Error = AbiError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Self::Copy,
            2 => Self::Io,
            3 => Self::Checksum,
            4 => Self::Isr,
            5 => Self::Branch,
            6 => Self::DmaCheck,
            7 => Self::CachePre,
            8 => Self::CachePost,
            9 => Self::BounceCopy,
            10 => Self::Endian,
            11 => Self::Imm16,
            12 => Self::Imm8,
            13 => Self::RelocNear,
            14 => Self::Nop,
            other => return Err(AbiError::UnknownPatchType(other)),
        })
    }
}

/// Hardware value written by an `IMM8` patch.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Imm8Field {
    Irq = 1,
    /// DMA channel, `0xFF` when the NIC has none.
    DmaChannel = 2,
    CacheLineSize = 3,
}

/// Hardware value written by an `IMM16` patch.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Imm16Field {
    IoBase = 1,
    NicType = 2,
    CpuTier = 3,
    RuntimeFlags = 4,
}

/// Source buffer of a `COPY` patch.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum CopyField {
    /// The 6-byte hardware (MAC) address.
    HwAddress = 1,
}

/// A decoded patch entry.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PatchDirective {
    /// 16-bit I/O base address.
    Io,
    Imm8(Imm8Field),
    Imm16(Imm16Field),
    /// `patch_size` bytes of `field` starting at byte `start`.
    Copy { field: CopyField, start: u8 },
    /// One code variant per CPU tier, oldest first.
    Branch([[u8; VARIANT_LEN]; VARIANT_COUNT]),
    /// Fill the site with `NOP`.
    Nop,
    /// Near call/jump operand into another module's hot section.
    RelocNear { target: u16, offset: u16 },
}

/// A 32-byte patch table record.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PatchEntry {
    patch_offset: u16,
    patch_type: u8,
    patch_size: u8,
    variants: [[u8; VARIANT_LEN]; VARIANT_COUNT],
    reserved: [u8; 3],
}

const _: () = assert!(size_of::<PatchEntry>() == PATCH_ENTRY_SIZE);

impl PatchEntry {
    /// Decode one entry from the first 32 bytes of `buf`.
    ///
    /// # Errors
    /// [`AbiError::TooShort`] if `buf` is shorter than an entry.
    pub fn parse(buf: &[u8]) -> Result<Self, AbiError> {
        ensure_len(buf, PATCH_ENTRY_SIZE)?;
        let mut variants = [[0u8; VARIANT_LEN]; VARIANT_COUNT];
        for (i, v) in variants.iter_mut().enumerate() {
            *v = bytes::<VARIANT_LEN>(buf, 4 + i * VARIANT_LEN)?;
        }
        Ok(Self {
            patch_offset: u16_le(buf, 0)?,
            patch_type: u8_at(buf, 2)?,
            patch_size: u8_at(buf, 3)?,
            variants,
            reserved: bytes::<3>(buf, 0x1D)?,
        })
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; PATCH_ENTRY_SIZE] {
        let mut out = [0u8; PATCH_ENTRY_SIZE];
        out[0..2].copy_from_slice(&{ self.patch_offset }.to_le_bytes());
        out[2] = self.patch_type;
        out[3] = self.patch_size;
        for (i, v) in { self.variants }.iter().enumerate() {
            let at = 4 + i * VARIANT_LEN;
            out[at..at + VARIANT_LEN].copy_from_slice(v);
        }
        out[0x1D..].copy_from_slice(&{ self.reserved });
        out
    }

    /// Offset of the patch site from the start of the module's hot section.
    #[must_use]
    pub const fn patch_offset(&self) -> u16 {
        self.patch_offset
    }

    /// Raw type byte; see [`PatchEntry::patch_type`].
    #[must_use]
    pub const fn raw_type(&self) -> u8 {
        self.patch_type
    }

    /// # Errors
    /// [`AbiError::UnknownPatchType`] for a type byte outside the table.
    pub fn patch_type(&self) -> Result<PatchType, AbiError> {
        PatchType::try_from(self.patch_type)
    }

    #[must_use]
    pub const fn patch_size(&self) -> u8 {
        self.patch_size
    }

    /// Code variant for `tier`.
    #[must_use]
    pub const fn variant(&self, tier: CpuTier) -> [u8; VARIANT_LEN] {
        self.variants[tier as usize]
    }

    /// The parameter bytes shared by the non-branch patch types.
    const fn tag(&self) -> [u8; VARIANT_LEN] {
        self.variants[0]
    }

    /// Decode the entry into what the engine has to do.
    ///
    /// Types the engine does not implement (checksum, ISR, DMA check,
    /// cache pre/post, bounce copy, endian swap) are reported as unknown.
    ///
    /// # Errors
    /// [`AbiError::UnknownPatchType`] or [`AbiError::UnknownPatchTag`].
    pub fn directive(&self) -> Result<PatchDirective, AbiError> {
        let kind = self.patch_type()?;
        let tag = self.tag();
        let unknown_tag = || AbiError::UnknownPatchTag { kind, tag: tag[0] };
        Ok(match kind {
            PatchType::Io => PatchDirective::Io,
            PatchType::Imm8 => PatchDirective::Imm8(match tag[0] {
                1 => Imm8Field::Irq,
                2 => Imm8Field::DmaChannel,
                3 => Imm8Field::CacheLineSize,
                _ => return Err(unknown_tag()),
            }),
            PatchType::Imm16 => PatchDirective::Imm16(match tag[0] {
                1 => Imm16Field::IoBase,
                2 => Imm16Field::NicType,
                3 => Imm16Field::CpuTier,
                4 => Imm16Field::RuntimeFlags,
                _ => return Err(unknown_tag()),
            }),
            PatchType::Copy => match tag[0] {
                1 => PatchDirective::Copy {
                    field: CopyField::HwAddress,
                    start: tag[1],
                },
                _ => return Err(unknown_tag()),
            },
            PatchType::Branch => PatchDirective::Branch(self.variants),
            PatchType::Nop => PatchDirective::Nop,
            PatchType::RelocNear => PatchDirective::RelocNear {
                target: u16::from_le_bytes([tag[0], tag[1]]),
                offset: u16::from_le_bytes([tag[2], tag[3]]),
            },
            PatchType::Checksum
            | PatchType::Isr
            | PatchType::DmaCheck
            | PatchType::CachePre
            | PatchType::CachePost
            | PatchType::BounceCopy
            | PatchType::Endian => return Err(AbiError::UnknownPatchType(self.patch_type)),
        })
    }
}

#[cfg(feature = "assemble")]
impl PatchEntry {
    /// A raw entry; the other constructors fill in the tag conventions.
    #[must_use]
    pub const fn new(
        patch_offset: u16,
        patch_type: u8,
        patch_size: u8,
        variants: [[u8; VARIANT_LEN]; VARIANT_COUNT],
    ) -> Self {
        Self {
            patch_offset,
            patch_type,
            patch_size,
            variants,
            reserved: [0; 3],
        }
    }

    const fn tagged(patch_offset: u16, kind: PatchType, size: u8, tag: [u8; VARIANT_LEN]) -> Self {
        let mut variants = [[0u8; VARIANT_LEN]; VARIANT_COUNT];
        variants[0] = tag;
        Self::new(patch_offset, kind as u8, size, variants)
    }

    #[must_use]
    pub const fn io(patch_offset: u16) -> Self {
        Self::tagged(patch_offset, PatchType::Io, 2, [0; VARIANT_LEN])
    }

    #[must_use]
    pub const fn imm8(patch_offset: u16, field: Imm8Field) -> Self {
        Self::tagged(patch_offset, PatchType::Imm8, 1, [field as u8, 0, 0, 0, 0])
    }

    #[must_use]
    pub const fn imm16(patch_offset: u16, field: Imm16Field) -> Self {
        Self::tagged(patch_offset, PatchType::Imm16, 2, [field as u8, 0, 0, 0, 0])
    }

    #[must_use]
    pub const fn copy_hw_address(patch_offset: u16, start: u8, len: u8) -> Self {
        Self::tagged(
            patch_offset,
            PatchType::Copy,
            len,
            [CopyField::HwAddress as u8, start, 0, 0, 0],
        )
    }

    #[must_use]
    pub const fn branch(
        patch_offset: u16,
        size: u8,
        variants: [[u8; VARIANT_LEN]; VARIANT_COUNT],
    ) -> Self {
        Self::new(patch_offset, PatchType::Branch as u8, size, variants)
    }

    #[must_use]
    pub const fn nop(patch_offset: u16, size: u8) -> Self {
        Self::tagged(patch_offset, PatchType::Nop, size, [0; VARIANT_LEN])
    }

    #[must_use]
    pub const fn reloc_near(patch_offset: u16, target: u16, offset: u16) -> Self {
        let t = target.to_le_bytes();
        let o = offset.to_le_bytes();
        Self::tagged(
            patch_offset,
            PatchType::RelocNear,
            2,
            [t[0], t[1], o[0], o[1], 0],
        )
    }
}
