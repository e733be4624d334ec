//! # Patch Engine
//!
//! Rewrites hardware-specific immediates and CPU-specific code variants in
//! the built image. Patching runs in two passes: every patch of every module
//! is decoded and bounds-checked first, then all of them are written. A
//! rejected patch therefore leaves the image untouched.
//!
//! `RELOC_NEAR` entries are left to the [relocator](crate::reloc).

use crate::facts::HwValues;
use crate::layout::{JitLayout, JitLayoutEntry};
use crate::registry::{ModuleRegistry, RegistryError};
use alloc::vec::Vec;
use log::{debug, error, info};
use module_abi::{
    AbiError, CopyField, Imm8Field, Imm16Field, MAX_PATCH_SIZE, ModuleId, PatchDirective,
    PatchEntry, PatchType,
};

/// Single-byte `NOP` used to blank out a site.
const NOP: u8 = 0x90;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum PatchError {
    #[error("patch {index} of module {module} lies outside of its module or the image")]
    PatchOutOfBounds { module: ModuleId, index: usize },
    #[error("patch {index} of module {module} is {size} bytes, needs at least {need}")]
    PatchTooSmall {
        module: ModuleId,
        index: usize,
        size: u8,
        need: u8,
    },
    #[error("patch {index} of module {module} has unsupported type {patch_type:#04x}")]
    UnknownPatchType {
        module: ModuleId,
        index: usize,
        patch_type: u8,
    },
    #[error("patch {index} of module {module} has unknown {kind:?} tag {tag:#04x}")]
    UnknownPatchTag {
        module: ModuleId,
        index: usize,
        kind: PatchType,
        tag: u8,
    },
    #[error("patch {index} of module {module} copies bytes {start}..{end} of the hardware address")]
    CopyOutOfRange {
        module: ModuleId,
        index: usize,
        start: usize,
        end: usize,
    },
    #[error("the patch table of module {module} is unreadable")]
    BadPatchTable {
        module: ModuleId,
        #[source]
        source: AbiError,
    },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// A validated write into the image.
#[derive(Debug, Copy, Clone)]
struct PlannedPatch {
    at: usize,
    len: usize,
    bytes: [u8; MAX_PATCH_SIZE],
}

impl PlannedPatch {
    fn apply(&self, image: &mut [u8]) {
        image[self.at..self.at + self.len].copy_from_slice(&self.bytes[..self.len]);
    }
}

/// Applies the SMC patches of every module in a layout.
pub struct PatchEngine<'r, 'a> {
    registry: &'r ModuleRegistry<'a>,
    hw: &'r HwValues,
}

impl<'r, 'a> PatchEngine<'r, 'a> {
    #[must_use]
    pub const fn new(registry: &'r ModuleRegistry<'a>, hw: &'r HwValues) -> Self {
        Self { registry, hw }
    }

    /// Patch `layout` in place.
    ///
    /// Returns the number of patches written, not counting relocations.
    ///
    /// # Errors
    /// Any [`PatchError`]; the image is unchanged in that case.
    pub fn apply(&self, layout: &mut JitLayout) -> Result<usize, PatchError> {
        let plan = self.plan(layout).inspect_err(|e| error!("patching failed: {e}"))?;
        let image = layout.image_mut();
        for p in &plan {
            p.apply(image);
        }
        info!("applied {} patches", plan.len());
        Ok(plan.len())
    }

    fn plan(&self, layout: &JitLayout) -> Result<Vec<PlannedPatch>, PatchError> {
        let mut plan = Vec::new();
        for le in layout.entries() {
            let entry = self.registry.get(le.module)?;
            for (index, patch) in entry.blob().patches().enumerate() {
                let patch = patch.map_err(|source| PatchError::BadPatchTable {
                    module: le.module,
                    source,
                })?;
                if let Some(p) = self.plan_one(layout, le, index, &patch)? {
                    debug!(
                        "{}: patch {index} type {} -> {:#06x}, {} bytes",
                        le.module,
                        patch.raw_type(),
                        p.at,
                        p.len
                    );
                    plan.push(p);
                }
            }
        }
        Ok(plan)
    }

    fn plan_one(
        &self,
        layout: &JitLayout,
        le: &JitLayoutEntry,
        index: usize,
        patch: &PatchEntry,
    ) -> Result<Option<PlannedPatch>, PatchError> {
        let module = le.module;
        let directive = patch.directive().map_err(|e| match e {
            AbiError::UnknownPatchTag { kind, tag } => PatchError::UnknownPatchTag {
                module,
                index,
                kind,
                tag,
            },
            _ => PatchError::UnknownPatchType {
                module,
                index,
                patch_type: patch.raw_type(),
            },
        })?;

        let size = patch.patch_size();
        let too_small = |need: u8| PatchError::PatchTooSmall {
            module,
            index,
            size,
            need,
        };
        if let PatchDirective::RelocNear { .. } = directive {
            return Ok(None);
        }

        // The whole declared site must lie inside the module, not just the
        // bytes this directive writes.
        let offset = usize::from(patch.patch_offset());
        let at = usize::from(le.dst_offset) + offset;
        let span = usize::from(size);
        if span > MAX_PATCH_SIZE
            || offset + span > usize::from(le.src_size)
            || at + span > layout.size()
        {
            return Err(PatchError::PatchOutOfBounds { module, index });
        }

        let mut bytes = [0u8; MAX_PATCH_SIZE];
        let len = match directive {
            PatchDirective::RelocNear { .. } => return Ok(None),
            PatchDirective::Io => {
                if size < 2 {
                    return Err(too_small(2));
                }
                bytes[..2].copy_from_slice(&self.hw.io_base.to_le_bytes());
                2
            }
            PatchDirective::Imm8(field) => {
                if size < 1 {
                    return Err(too_small(1));
                }
                bytes[0] = self.imm8(field);
                1
            }
            PatchDirective::Imm16(field) => {
                if size < 2 {
                    return Err(too_small(2));
                }
                bytes[..2].copy_from_slice(&self.imm16(field).to_le_bytes());
                2
            }
            PatchDirective::Copy {
                field: CopyField::HwAddress,
                start,
            } => {
                let len = usize::from(size);
                let start = usize::from(start);
                let src = self
                    .hw
                    .mac
                    .get(start..start + len)
                    .ok_or(PatchError::CopyOutOfRange {
                        module,
                        index,
                        start,
                        end: start + len,
                    })?;
                bytes[..len].copy_from_slice(src);
                len
            }
            PatchDirective::Branch(variants) => {
                let len = usize::from(size);
                let variant = variants[usize::from(self.hw.cpu_tier.ordinal())];
                bytes[..len].copy_from_slice(&variant[..len]);
                len
            }
            PatchDirective::Nop => {
                let len = usize::from(size);
                bytes[..len].fill(NOP);
                len
            }
        };

        Ok(Some(PlannedPatch { at, len, bytes }))
    }

    fn imm8(&self, field: Imm8Field) -> u8 {
        match field {
            Imm8Field::Irq => self.hw.irq,
            Imm8Field::DmaChannel => self.hw.dma_channel_byte(),
            Imm8Field::CacheLineSize => self.hw.cache_line_size,
        }
    }

    fn imm16(&self, field: Imm16Field) -> u16 {
        match field {
            Imm16Field::IoBase => self.hw.io_base,
            Imm16Field::NicType => u16::from(self.hw.nic_type.tag()),
            Imm16Field::CpuTier => u16::from(self.hw.cpu_tier.ordinal()),
            Imm16Field::RuntimeFlags => self.hw.flags.into_bits(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::BuildConfig;
    use crate::facts::RuntimeFlags;
    use crate::layout::ImageBuilder;
    use crate::select::ModuleSelection;
    use crate::testing::{Catalog, Customize};
    use module_abi::{CpuTier, NicType};

    fn hw() -> HwValues {
        HwValues {
            io_base: 0x300,
            irq: 5,
            dma_channel: Some(3),
            mac: [0x00, 0x60, 0x8C, 0x12, 0x34, 0x56],
            nic_type: NicType::Vortex,
            cpu_tier: CpuTier::Cpu80386,
            flags: RuntimeFlags::new().with_vds_available(true),
            ..HwValues::default()
        }
    }

    /// Lay out `mod_isr` alone, built by `f`.
    fn patch_isr(f: Customize) -> (JitLayout, Result<usize, PatchError>) {
        let blobs = Catalog::new().with(ModuleId::Isr, f).blobs();
        let reg = ModuleRegistry::init(&blobs).unwrap();
        let mut sel = ModuleSelection::new();
        sel.add(reg.get(ModuleId::Isr).unwrap());
        let hw = hw();
        let mut layout = ImageBuilder::new(&reg)
            .build(&sel, &hw, &BuildConfig::default())
            .unwrap();
        let result = PatchEngine::new(&reg, &hw).apply(&mut layout);
        (layout, result)
    }

    #[test]
    fn hardware_values_land_at_their_sites() {
        let (layout, result) = patch_isr(|b| {
            b.hot(&[0xCC; 16])
                .patch(PatchEntry::io(1))
                .patch(PatchEntry::imm8(3, Imm8Field::Irq))
                .patch(PatchEntry::imm8(4, Imm8Field::DmaChannel))
                .patch(PatchEntry::imm16(5, Imm16Field::RuntimeFlags))
                .patch(PatchEntry::copy_hw_address(8, 0, 4))
                .patch(PatchEntry::copy_hw_address(12, 4, 2))
                .patch(PatchEntry::reloc_near(14, 0, 0))
        });
        assert_eq!(result, Ok(6));
        let hot = &layout.image()[0x20..0x30];
        assert_eq!(&hot[1..3], &[0x00, 0x03]);
        assert_eq!(hot[3], 5);
        assert_eq!(hot[4], 3);
        assert_eq!(&hot[5..7], &[0x02, 0x00]);
        assert_eq!(&hot[8..14], &[0x00, 0x60, 0x8C, 0x12, 0x34, 0x56]);
        assert_eq!(&hot[14..16], &[0xCC, 0xCC]);
    }

    #[test]
    fn descriptive_fields_land_at_their_sites() {
        let (layout, result) = patch_isr(|b| {
            b.hot(&[0xCC; 16])
                .patch(PatchEntry::imm8(0, Imm8Field::CacheLineSize))
                .patch(PatchEntry::imm16(2, Imm16Field::NicType))
                .patch(PatchEntry::imm16(4, Imm16Field::CpuTier))
        });
        assert_eq!(result, Ok(3));
        let hot = &layout.image()[0x20..0x30];
        assert_eq!(hot[0], 16);
        assert_eq!(hot[1], 0xCC);
        assert_eq!(&hot[2..4], &[NicType::Vortex.tag(), 0x00]);
        assert_eq!(&hot[4..6], &[CpuTier::Cpu80386.ordinal(), 0x00]);
    }

    #[test]
    fn declared_site_must_fit_even_if_fewer_bytes_are_written() {
        let (layout, result) = patch_isr(|b| {
            b.hot(&[0xCC; 16])
                .patch(PatchEntry::new(14, PatchType::Io as u8, 5, [[0; 5]; 5]))
        });
        assert_eq!(
            result,
            Err(PatchError::PatchOutOfBounds {
                module: ModuleId::Isr,
                index: 0
            })
        );
        assert!(layout.image()[0x20..0x30].iter().all(|b| *b == 0xCC));

        let (layout, result) = patch_isr(|b| {
            b.hot(&[0xCC; 16])
                .patch(PatchEntry::new(11, PatchType::Io as u8, 5, [[0; 5]; 5]))
        });
        assert_eq!(result, Ok(1));
        assert_eq!(&layout.image()[0x2B..0x30], &[0x00, 0x03, 0xCC, 0xCC, 0xCC]);
    }

    #[test]
    fn branch_picks_the_variant_of_the_cpu() {
        let (layout, result) = patch_isr(|b| {
            let mut v = [[0u8; 5]; 5];
            for (i, variant) in v.iter_mut().enumerate() {
                *variant = [0xA0 + u8::try_from(i).unwrap(); 5];
            }
            b.hot(&[0xCC; 16])
                .patch(PatchEntry::branch(0, 3, v))
                .patch(PatchEntry::nop(4, 2))
        });
        assert_eq!(result, Ok(2));
        let hot = &layout.image()[0x20..0x30];
        assert_eq!(&hot[0..4], &[0xA2, 0xA2, 0xA2, 0xCC]);
        assert_eq!(&hot[4..7], &[0x90, 0x90, 0xCC]);
    }

    #[test]
    fn nothing_is_written_when_a_later_patch_fails() {
        let (layout, result) = patch_isr(|b| {
            b.hot(&[0xCC; 16])
                .patch(PatchEntry::io(0))
                .patch(PatchEntry::imm16(15, Imm16Field::IoBase))
        });
        assert_eq!(
            result,
            Err(PatchError::PatchOutOfBounds {
                module: ModuleId::Isr,
                index: 1
            })
        );
        assert!(layout.image()[0x20..0x30].iter().all(|b| *b == 0xCC));
    }

    #[test]
    fn malformed_entries_are_rejected() {
        let (_, result) = patch_isr(|b| {
            b.hot(&[0; 16])
                .patch(PatchEntry::new(0, PatchType::Io as u8, 1, [[0; 5]; 5]))
        });
        assert!(matches!(
            result,
            Err(PatchError::PatchTooSmall { size: 1, need: 2, .. })
        ));

        let (_, result) =
            patch_isr(|b| b.hot(&[0; 16]).patch(PatchEntry::copy_hw_address(0, 4, 3)));
        assert!(matches!(
            result,
            Err(PatchError::CopyOutOfRange { start: 4, end: 7, .. })
        ));

        let (_, result) = patch_isr(|b| {
            b.hot(&[0; 16])
                .patch(PatchEntry::new(0, PatchType::Checksum as u8, 2, [[0; 5]; 5]))
        });
        assert!(matches!(
            result,
            Err(PatchError::UnknownPatchType { patch_type: 3, .. })
        ));

        let (_, result) = patch_isr(|b| {
            let tags = [[7, 0, 0, 0, 0], [0; 5], [0; 5], [0; 5], [0; 5]];
            b.hot(&[0; 16])
                .patch(PatchEntry::new(0, PatchType::Imm16 as u8, 2, tags))
        });
        assert!(matches!(
            result,
            Err(PatchError::UnknownPatchTag { tag: 7, .. })
        ));

        let (_, result) = patch_isr(|b| {
            b.hot(&[0; 16])
                .patch(PatchEntry::new(0, PatchType::Nop as u8, 6, [[0; 5]; 5]))
        });
        assert!(matches!(result, Err(PatchError::PatchOutOfBounds { .. })));
    }
}
