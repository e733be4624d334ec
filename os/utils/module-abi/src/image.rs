//! # Resident Image Header

use crate::read::{bytes, ensure_len, u8_at, u16_le, u32_le};
use crate::{AbiError, IMAGE_HEADER_SIZE, IMAGE_MAGIC, IMAGE_VERSION, MAX_IMAGE_SIZE};

/// Value of an entry point that no selected module provides.
pub const ENTRY_UNSET: u16 = 0xFFFF;

/// Entry points the installer wires up.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum EntrySlot {
    /// Packet-driver API software interrupt handler.
    PacketApi,
    /// DOS idle hook.
    IdleHook,
    /// Hardware interrupt handler.
    HwIsr,
    /// Start of the data/BSS region.
    Data,
    /// Private stack.
    Stack,
    /// Uninstall hook.
    Uninstall,
}

impl EntrySlot {
    pub const ALL: [Self; 6] = [
        Self::PacketApi,
        Self::IdleHook,
        Self::HwIsr,
        Self::Data,
        Self::Stack,
        Self::Uninstall,
    ];

    const fn index(self) -> usize {
        match self {
            Self::PacketApi => 0,
            Self::IdleHook => 1,
            Self::HwIsr => 2,
            Self::Data => 3,
            Self::Stack => 4,
            Self::Uninstall => 5,
        }
    }
}

/// The 32-byte descriptor at offset 0 of every built image.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ImageHeader {
    magic: u32,
    version: u16,
    module_count: u16,
    image_size: u32,
    entries: [u16; 6],
    hw_irq: u8,
    api_interrupt: u8,
    reserved: [u8; 6],
}

const _: () = assert!(size_of::<ImageHeader>() == IMAGE_HEADER_SIZE);

impl ImageHeader {
    /// A header with every entry point unset.
    #[must_use]
    pub const fn new(module_count: u16, image_size: u32, hw_irq: u8, api_interrupt: u8) -> Self {
        Self {
            magic: IMAGE_MAGIC,
            version: IMAGE_VERSION,
            module_count,
            image_size,
            entries: [ENTRY_UNSET; 6],
            hw_irq,
            api_interrupt,
            reserved: [0; 6],
        }
    }

    #[must_use]
    pub const fn with_entry(mut self, slot: EntrySlot, offset: u16) -> Self {
        let mut entries = self.entries;
        entries[slot.index()] = offset;
        self.entries = entries;
        self
    }

    /// Decode and check a header the way the installer does: magic, version,
    /// and a size that covers the header, fits a segment and fits `image`.
    ///
    /// # Errors
    /// [`AbiError::TooShort`], [`AbiError::BadMagic`], [`AbiError::BadVersion`]
    /// or [`AbiError::OutOfBounds`].
    pub fn parse(image: &[u8]) -> Result<Self, AbiError> {
        ensure_len(image, IMAGE_HEADER_SIZE)?;
        let magic = u32_le(image, 0x00)?;
        if magic != IMAGE_MAGIC {
            return Err(AbiError::BadMagic(magic));
        }
        let version = u16_le(image, 0x04)?;
        if version != IMAGE_VERSION {
            return Err(AbiError::BadVersion(version));
        }
        let image_size = u32_le(image, 0x08)?;
        let size = usize::try_from(image_size).map_err(|_| AbiError::OutOfBounds)?;
        if size < IMAGE_HEADER_SIZE || size > MAX_IMAGE_SIZE || size > image.len() {
            return Err(AbiError::OutOfBounds);
        }

        let mut entries = [ENTRY_UNSET; 6];
        for (i, e) in entries.iter_mut().enumerate() {
            *e = u16_le(image, 0x0C + 2 * i)?;
        }
        Ok(Self {
            magic,
            version,
            module_count: u16_le(image, 0x06)?,
            image_size,
            entries,
            hw_irq: u8_at(image, 0x18)?,
            api_interrupt: u8_at(image, 0x19)?,
            reserved: bytes::<6>(image, 0x1A)?,
        })
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; IMAGE_HEADER_SIZE] {
        let mut out = [0u8; IMAGE_HEADER_SIZE];
        out[0x00..0x04].copy_from_slice(&{ self.magic }.to_le_bytes());
        out[0x04..0x06].copy_from_slice(&{ self.version }.to_le_bytes());
        out[0x06..0x08].copy_from_slice(&{ self.module_count }.to_le_bytes());
        out[0x08..0x0C].copy_from_slice(&{ self.image_size }.to_le_bytes());
        for (i, e) in { self.entries }.iter().enumerate() {
            let at = 0x0C + 2 * i;
            out[at..at + 2].copy_from_slice(&e.to_le_bytes());
        }
        out[0x18] = self.hw_irq;
        out[0x19] = self.api_interrupt;
        out[0x1A..].copy_from_slice(&{ self.reserved });
        out
    }

    #[must_use]
    pub const fn version(&self) -> u16 {
        self.version
    }

    #[must_use]
    pub const fn module_count(&self) -> u16 {
        self.module_count
    }

    #[must_use]
    pub const fn image_size(&self) -> u32 {
        self.image_size
    }

    /// Offset of `slot`, or `None` if no module provides it.
    #[must_use]
    pub const fn entry(&self, slot: EntrySlot) -> Option<u16> {
        let entries = self.entries;
        match entries[slot.index()] {
            ENTRY_UNSET => None,
            offset => Some(offset),
        }
    }

    #[must_use]
    pub const fn hw_irq(&self) -> u8 {
        self.hw_irq
    }

    #[must_use]
    pub const fn api_interrupt(&self) -> u8 {
        self.api_interrupt
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn image_with(header: ImageHeader, len: usize) -> Vec<u8> {
        let mut image = vec![0u8; len];
        image[..IMAGE_HEADER_SIZE].copy_from_slice(&header.to_bytes());
        image
    }

    #[test]
    fn header_layout_is_little_endian() {
        let h = ImageHeader::new(3, 0x40, 10, 0x60).with_entry(EntrySlot::HwIsr, 0x20);
        let raw = h.to_bytes();
        assert_eq!(&raw[0..4], b"JTSR");
        assert_eq!(&raw[4..6], &[1, 0]);
        assert_eq!(&raw[6..8], &[3, 0]);
        assert_eq!(&raw[8..12], &[0x40, 0, 0, 0]);
        assert_eq!(&raw[0x0C..0x0E], &[0xFF, 0xFF]);
        assert_eq!(&raw[0x10..0x12], &[0x20, 0x00]);
        assert_eq!(raw[0x18], 10);
        assert_eq!(raw[0x19], 0x60);
    }

    #[test]
    fn parse_accepts_what_was_written() {
        let h = ImageHeader::new(1, 0x30, 5, 0x61).with_entry(EntrySlot::Data, 0x28);
        let parsed = ImageHeader::parse(&image_with(h, 0x30)).unwrap();
        assert_eq!(parsed, h);
        assert_eq!(parsed.entry(EntrySlot::Data), Some(0x28));
        assert_eq!(parsed.entry(EntrySlot::PacketApi), None);
    }

    #[test]
    fn parse_rejects_foreign_or_truncated_images() {
        let h = ImageHeader::new(1, 0x30, 5, 0x60);
        let mut image = image_with(h, 0x30);
        assert_eq!(
            ImageHeader::parse(&image[..0x2F]),
            Err(AbiError::OutOfBounds)
        );
        image[0] = b'X';
        assert!(matches!(ImageHeader::parse(&image), Err(AbiError::BadMagic(_))));
        assert!(matches!(
            ImageHeader::parse(&[0u8; 4]),
            Err(AbiError::TooShort { .. })
        ));
    }
}
