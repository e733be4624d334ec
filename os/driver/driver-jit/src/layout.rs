//! # Image Builder
//!
//! Copies the hot section of every selected module into one flat buffer,
//! in selection order, behind a 32-byte [`ImageHeader`]:
//!
//! ```text
//! 0x00        0x20            dst[1]          dst[n-1]        size
//! ┌───────────┬───────────────┬───────────────┬─────┬─────────┐
//! │ header    │ hot(module 0) │ hot(module 1) │  …  │ hot(n-1)│
//! └───────────┴───────────────┴───────────────┴─────┴─────────┘
//! ```
//!
//! The buffer never exceeds one real-mode segment.

use crate::config::BuildConfig;
use crate::facts::HwValues;
use crate::registry::{ModuleRegistry, RegistryError};
use crate::select::ModuleSelection;
use alloc::vec;
use alloc::vec::Vec;
use log::{debug, info};
use module_abi::{
    AbiError, EntrySlot, IMAGE_HEADER_SIZE, ImageHeader, MAX_IMAGE_SIZE, ModuleId,
};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum BuildError {
    #[error("no modules were selected")]
    EmptySelection,
    #[error("module {0} has no valid module signature")]
    BadSignature(ModuleId),
    #[error("module {module} has header version {version}, expected 1")]
    BadHeaderVersion { module: ModuleId, version: u8 },
    #[error("module {0} has an empty hot section")]
    ZeroHotSize(ModuleId),
    #[error("the hot section of module {0} lies outside of its blob")]
    HotRangeOutOfBounds(ModuleId),
    #[error("the image would need {size} bytes, at most 65536 fit a segment")]
    ImageTooLarge { size: usize },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Where a module's hot section went.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct JitLayoutEntry {
    pub module: ModuleId,
    /// Offset of the hot section in the module blob.
    pub src_offset: u16,
    /// Size of the hot section.
    pub src_size: u16,
    /// Offset of the hot section in the image.
    pub dst_offset: u16,
}

impl JitLayoutEntry {
    /// One past the last image byte of this module.
    #[must_use]
    pub fn dst_end(&self) -> usize {
        usize::from(self.dst_offset) + usize::from(self.src_size)
    }
}

/// The image buffer and the placement of every module in it.
///
/// Later stages may rewrite bytes but never change the size or the entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JitLayout {
    image: Vec<u8>,
    header: ImageHeader,
    entries: Vec<JitLayoutEntry>,
}

impl Default for JitLayout {
    fn default() -> Self {
        Self {
            image: Vec::new(),
            header: ImageHeader::new(0, 0, 0, 0),
            entries: Vec::new(),
        }
    }
}

impl JitLayout {
    #[must_use]
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    /// The image bytes, for in-place patching.
    pub fn image_mut(&mut self) -> &mut [u8] {
        &mut self.image
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.image.len()
    }

    /// The header written at offset 0.
    #[must_use]
    pub const fn header(&self) -> &ImageHeader {
        &self.header
    }

    /// Layout entries in image order.
    #[must_use]
    pub fn entries(&self) -> &[JitLayoutEntry] {
        &self.entries
    }

    /// Placement of `module`, if it is part of the image.
    #[must_use]
    pub fn entry_for(&self, module: ModuleId) -> Option<&JitLayoutEntry> {
        self.entries.iter().find(|e| e.module == module)
    }

    #[must_use]
    pub fn into_parts(self) -> (Vec<u8>, ImageHeader, Vec<JitLayoutEntry>) {
        (self.image, self.header, self.entries)
    }
}

/// Module providing each entry point of the image header.
const ENTRY_SOURCES: [(EntrySlot, ModuleId); 6] = [
    (EntrySlot::PacketApi, ModuleId::CorePktApi),
    (EntrySlot::IdleHook, ModuleId::CoreTsrWrap),
    (EntrySlot::HwIsr, ModuleId::Isr),
    (EntrySlot::Data, ModuleId::Data),
    (EntrySlot::Stack, ModuleId::CoreTsrCrt),
    (EntrySlot::Uninstall, ModuleId::CoreTsrCom),
];

/// Lays out and copies the selected modules.
pub struct ImageBuilder<'r, 'a> {
    registry: &'r ModuleRegistry<'a>,
}

impl<'r, 'a> ImageBuilder<'r, 'a> {
    #[must_use]
    pub const fn new(registry: &'r ModuleRegistry<'a>) -> Self {
        Self { registry }
    }

    /// Build the image for `selection`.
    ///
    /// Every module is checked before the buffer is allocated.
    ///
    /// # Errors
    /// Any [`BuildError`].
    pub fn build(
        &self,
        selection: &ModuleSelection,
        hw: &HwValues,
        config: &BuildConfig,
    ) -> Result<JitLayout, BuildError> {
        if selection.is_empty() {
            return Err(BuildError::EmptySelection);
        }

        let mut entries = Vec::with_capacity(selection.len());
        let mut sources = Vec::with_capacity(selection.len());
        let mut size = IMAGE_HEADER_SIZE;
        for &module in selection.modules() {
            let entry = self.registry.get(module)?;
            let header = entry.header();
            header.validate().map_err(|e| match e {
                AbiError::BadVersion(_) => BuildError::BadHeaderVersion {
                    module,
                    version: header.header_version(),
                },
                AbiError::BadChecksum { .. } => RegistryError::BadChecksum(module).into(),
                _ => BuildError::BadSignature(module),
            })?;
            let src_size = entry.hot_size().ok_or(BuildError::ZeroHotSize(module))?;
            let hot = entry
                .blob()
                .hot_section()
                .map_err(|_| BuildError::HotRangeOutOfBounds(module))?;

            let end = size + usize::from(src_size);
            if end > MAX_IMAGE_SIZE {
                return Err(BuildError::ImageTooLarge { size: end });
            }
            let dst_offset =
                u16::try_from(size).map_err(|_| BuildError::ImageTooLarge { size: end })?;

            entries.push(JitLayoutEntry {
                module,
                src_offset: header.hot_start(),
                src_size,
                dst_offset,
            });
            sources.push(hot);
            size = end;
        }

        let mut image = vec![0u8; size];
        for (e, hot) in entries.iter().zip(sources) {
            image[usize::from(e.dst_offset)..e.dst_end()].copy_from_slice(hot);
            debug!(
                "placed {} at {:#06x}, {} bytes",
                e.module, e.dst_offset, e.src_size
            );
        }

        let header = image_header(&entries, size, hw, config)?;
        image[..IMAGE_HEADER_SIZE].copy_from_slice(&header.to_bytes());
        info!("laid out {} modules into {size} bytes", entries.len());
        Ok(JitLayout {
            image,
            header,
            entries,
        })
    }
}

/// Header for the laid-out `entries`; entry points of unselected modules stay unset.
fn image_header(
    entries: &[JitLayoutEntry],
    size: usize,
    hw: &HwValues,
    config: &BuildConfig,
) -> Result<ImageHeader, BuildError> {
    let too_large = || BuildError::ImageTooLarge { size };
    let count = u16::try_from(entries.len()).map_err(|_| too_large())?;
    let image_size = u32::try_from(size).map_err(|_| too_large())?;

    let mut header = ImageHeader::new(count, image_size, hw.irq, config.api_interrupt());
    for (slot, module) in ENTRY_SOURCES {
        if let Some(e) = entries.iter().find(|e| e.module == module) {
            header = header.with_entry(slot, e.dst_offset);
        }
    }
    Ok(header)
}
