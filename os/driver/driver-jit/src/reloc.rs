//! # Relocator
//!
//! Modules call into each other with near `CALL rel16` / `JMP rel16`
//! instructions. The displacement depends on where both modules were copied,
//! so each such operand carries a `RELOC_NEAR` patch entry naming the target
//! module and the offset inside its hot section. Once the layout is fixed the
//! operand becomes
//!
//! ```text
//! disp = T - (A + 2)
//! ```
//!
//! where `A` is the image offset of the 16-bit operand and `T` the image
//! offset of the target, in 16-bit two's complement.

use crate::layout::{JitLayout, JitLayoutEntry};
use crate::registry::{ModuleRegistry, RegistryError};
use alloc::vec::Vec;
use log::{debug, error, info};
use module_abi::{AbiError, ModuleId, PatchDirective, PatchEntry, PatchType};

/// Width of a near displacement operand.
const OPERAND_LEN: usize = 2;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum RelocError {
    #[error("{module} references module {target}, which is not part of the image")]
    RelocationToUnselectedModule { module: ModuleId, target: u16 },
    #[error("{module} references offset {offset:#06x} of {target}, past its hot section")]
    RelocationTargetOutOfRange {
        module: ModuleId,
        target: ModuleId,
        offset: u16,
    },
    #[error("relocation {index} of {module} lies outside of its module or the image")]
    RelocationSiteOutOfBounds { module: ModuleId, index: usize },
    #[error("the patch table of module {module} is unreadable")]
    BadPatchTable {
        module: ModuleId,
        #[source]
        source: AbiError,
    },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Displacement of a near jump whose operand sits at `site` and lands on `target`.
#[must_use]
pub const fn near_displacement(site: u16, target: u16) -> i16 {
    target.wrapping_sub(site.wrapping_add(2)).cast_signed()
}

/// Landing offset of a near jump with operand at `site` and displacement `disp`.
#[must_use]
pub const fn near_target(site: u16, disp: i16) -> u16 {
    site.wrapping_add(2).wrapping_add_signed(disp)
}

#[derive(Debug, Copy, Clone)]
struct PlannedReloc {
    at: usize,
    disp: i16,
}

/// Resolves inter-module near references in a layout.
pub struct Relocator<'r, 'a> {
    registry: &'r ModuleRegistry<'a>,
}

impl<'r, 'a> Relocator<'r, 'a> {
    #[must_use]
    pub const fn new(registry: &'r ModuleRegistry<'a>) -> Self {
        Self { registry }
    }

    /// Rewrite every `RELOC_NEAR` operand in `layout`.
    ///
    /// All relocations are checked before the first one is written.
    /// Returns the number of relocations written.
    ///
    /// # Errors
    /// Any [`RelocError`]; the image is unchanged in that case.
    pub fn apply(&self, layout: &mut JitLayout) -> Result<usize, RelocError> {
        let plan = self
            .plan(layout)
            .inspect_err(|e| error!("relocation failed: {e}"))?;
        let image = layout.image_mut();
        for r in &plan {
            image[r.at..r.at + OPERAND_LEN].copy_from_slice(&r.disp.to_le_bytes());
        }
        info!("applied {} relocations", plan.len());
        Ok(plan.len())
    }

    fn plan(&self, layout: &JitLayout) -> Result<Vec<PlannedReloc>, RelocError> {
        let mut plan = Vec::new();
        for le in layout.entries() {
            let entry = self.registry.get(le.module)?;
            for (index, patch) in entry.blob().patches().enumerate() {
                let patch = patch.map_err(|source| RelocError::BadPatchTable {
                    module: le.module,
                    source,
                })?;
                if patch.patch_type() != Ok(PatchType::RelocNear) {
                    continue;
                }
                plan.push(plan_one(layout, le, index, &patch)?);
            }
        }
        Ok(plan)
    }
}

fn plan_one(
    layout: &JitLayout,
    le: &JitLayoutEntry,
    index: usize,
    patch: &PatchEntry,
) -> Result<PlannedReloc, RelocError> {
    let module = le.module;
    let Ok(PatchDirective::RelocNear { target, offset }) = patch.directive() else {
        return Err(RelocError::RelocationSiteOutOfBounds { module, index });
    };

    let unselected = RelocError::RelocationToUnselectedModule { module, target };
    let target_id = ModuleId::from_raw(target).ok_or(unselected)?;
    let target_entry = layout.entry_for(target_id).ok_or(unselected)?;
    if offset >= target_entry.src_size {
        return Err(RelocError::RelocationTargetOutOfRange {
            module,
            target: target_id,
            offset,
        });
    }

    let patch_offset = usize::from(patch.patch_offset());
    let at = usize::from(le.dst_offset) + patch_offset;
    let out_of_bounds = RelocError::RelocationSiteOutOfBounds { module, index };
    if patch_offset + OPERAND_LEN > usize::from(le.src_size)
        || at + OPERAND_LEN > layout.size()
    {
        return Err(out_of_bounds);
    }

    let site = u16::try_from(at).map_err(|_| out_of_bounds)?;
    let dest = target_entry.dst_offset.wrapping_add(offset);
    let disp = near_displacement(site, dest);
    debug!(
        "{module}: operand at {site:#06x} -> {target_id}+{offset:#06x} = {dest:#06x}, disp {disp}"
    );
    Ok(PlannedReloc { at, disp })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::BuildConfig;
    use crate::facts::HwValues;
    use crate::layout::ImageBuilder;
    use crate::registry::ModuleRegistry;
    use crate::select::ModuleSelection;
    use crate::testing::Catalog;
    use module_abi::assemble::ModuleBlobBuilder;

    #[test]
    fn unreadable_patch_table_is_reported() {
        // One real entry, but the header claims two.
        fn truncated_table(b: ModuleBlobBuilder) -> ModuleBlobBuilder {
            b.hot(&[0xCC; 16])
                .patch(PatchEntry::reloc_near(0, ModuleId::Isr.raw(), 0))
                .map_header(|h| h.with_patch_table(h.patch_table_offset(), 2))
        }

        let blobs = Catalog::new().with(ModuleId::Irq, truncated_table).blobs();
        let reg = ModuleRegistry::init(&blobs).unwrap();
        let mut sel = ModuleSelection::new();
        sel.add(reg.get(ModuleId::Isr).unwrap());
        sel.add(reg.get(ModuleId::Irq).unwrap());
        let mut layout = ImageBuilder::new(&reg)
            .build(&sel, &HwValues::default(), &BuildConfig::default())
            .unwrap();
        let before = layout.image().to_vec();

        assert_eq!(
            Relocator::new(&reg).apply(&mut layout),
            Err(RelocError::BadPatchTable {
                module: ModuleId::Irq,
                source: AbiError::OutOfBounds,
            })
        );
        assert_eq!(layout.image(), before.as_slice());
    }

    #[test]
    fn displacement_is_relative_to_the_next_instruction() {
        assert_eq!(near_displacement(0x0100, 0x0200), 0x00FE);
        assert_eq!(near_displacement(0x0200, 0x0100), -0x0102);
        assert_eq!(near_displacement(0x0010, 0x0012), 0);
    }

    #[test]
    fn displacement_and_target_round_trip() {
        for site in [0x0000u16, 0x0020, 0x7FFF, 0xFFF0] {
            for target in [0x0000u16, 0x0022, 0x8000, 0xFFFF] {
                let disp = near_displacement(site, target);
                assert_eq!(near_target(site, disp), target);
            }
        }
    }
}
