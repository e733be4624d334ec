//! # Pipeline
//!
//! Runs Selector → Image Builder → Patch Engine → Relocator → Prefetch
//! Serializer and hands back the finished image.

use crate::config::BuildConfig;
use crate::facts::{HwValues, SystemFacts};
use crate::layout::{BuildError, ImageBuilder, JitLayoutEntry};
use crate::patch::{PatchEngine, PatchError};
use crate::registry::ModuleRegistry;
use crate::reloc::{RelocError, Relocator};
use crate::select::{ModuleSelection, SelectError, Selector};
use crate::serialize::{SerializeError, serialize_prefetch};
use alloc::vec::Vec;
use core::fmt;
use log::{error, info};
use module_abi::ImageHeader;

/// Pipeline stage, for error reports.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Stage {
    Select,
    Build,
    Patch,
    Relocate,
    Serialize,
}

impl Stage {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Build => "build",
            Self::Patch => "patch",
            Self::Relocate => "relocate",
            Self::Serialize => "serialize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum JitError {
    #[error("module selection failed: {0}")]
    Select(#[from] SelectError),
    #[error("image build failed: {0}")]
    Build(#[from] BuildError),
    #[error("patching failed: {0}")]
    Patch(#[from] PatchError),
    #[error("relocation failed: {0}")]
    Relocate(#[from] RelocError),
    #[error("prefetch serialization failed: {0}")]
    Serialize(#[from] SerializeError),
}

impl JitError {
    /// The stage that failed.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        match self {
            Self::Select(_) => Stage::Select,
            Self::Build(_) => Stage::Build,
            Self::Patch(_) => Stage::Patch,
            Self::Relocate(_) => Stage::Relocate,
            Self::Serialize(_) => Stage::Serialize,
        }
    }
}

/// Counters of a successful build.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct BuildStats {
    pub modules: usize,
    pub image_size: usize,
    pub patches: usize,
    pub relocations: usize,
}

/// A finished resident image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltImage {
    /// The image, starting with its [`ImageHeader`].
    pub image: Vec<u8>,
    pub header: ImageHeader,
    pub entries: Vec<JitLayoutEntry>,
    pub selection: ModuleSelection,
    pub stats: BuildStats,
}

/// Build the resident image for the given hardware.
///
/// # Errors
/// The first failing stage's error, wrapped in [`JitError`].
pub fn build_image(
    registry: &ModuleRegistry<'_>,
    facts: &SystemFacts,
    hw: &HwValues,
    config: &BuildConfig,
) -> Result<BuiltImage, JitError> {
    run(registry, facts, hw, config).inspect_err(|e| error!("{} stage failed: {e}", e.stage()))
}

fn run(
    registry: &ModuleRegistry<'_>,
    facts: &SystemFacts,
    hw: &HwValues,
    config: &BuildConfig,
) -> Result<BuiltImage, JitError> {
    info!(
        "building image: nic {:?}, cpu {}, io {:#06x}, irq {}",
        facts.nic_type, facts.cpu_tier, hw.io_base, hw.irq
    );

    // BRANCH variants are picked from `hw`; they must match the tier the
    // selection was validated against.
    if facts.cpu_tier != hw.cpu_tier {
        return Err(SelectError::CpuTierMismatch {
            detected: facts.cpu_tier,
            patched: hw.cpu_tier,
        }
        .into());
    }
    let selection = Selector::new(registry).select(facts)?;
    let mut layout = ImageBuilder::new(registry).build(&selection, hw, config)?;
    let patches = PatchEngine::new(registry, hw).apply(&mut layout)?;
    let relocations = Relocator::new(registry).apply(&mut layout)?;
    serialize_prefetch(&mut layout)?;

    let stats = BuildStats {
        modules: layout.entries().len(),
        image_size: layout.size(),
        patches,
        relocations,
    };
    let (image, header, entries) = layout.into_parts();

    info!(
        "image ready: {} modules, {} bytes, {} patches, {} relocations",
        stats.modules, stats.image_size, stats.patches, stats.relocations
    );
    Ok(BuiltImage {
        image,
        header,
        entries,
        selection,
        stats,
    })
}
