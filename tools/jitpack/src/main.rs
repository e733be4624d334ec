//! # jitpack
//!
//! Builds the resident image offline: loads `<module-dir>/<name>.mod` for
//! every catalog module, runs the pipeline for the hardware given on the
//! command line and writes the image to `<out-image>`.

mod args;
mod logger;

use crate::args::{ArgError, Options};
use crate::logger::StderrLogger;
use driver_jit::registry::RegistryError;
use driver_jit::{BuiltImage, JitError, ModuleRegistry, build_image};
use log::{debug, error, info};
use module_abi::ModuleId;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::{env, fs, io};

/// File extension of a module blob.
const MODULE_EXT: &str = "mod";

#[derive(Debug, thiserror::Error)]
enum PackError {
    #[error(transparent)]
    Args(#[from] ArgError),
    #[error("cannot read {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("cannot write {}: {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Jit(#[from] JitError),
}

fn main() -> ExitCode {
    if let Err(e) = StderrLogger::from_env().init() {
        eprintln!("failed to install logger: {e}");
    }

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), PackError> {
    let opts = Options::parse(env::args().skip(1))?;
    let blobs = load_modules(&opts.module_dir)?;
    let registry = ModuleRegistry::init(&blobs)?;
    let built = build_image(&registry, &opts.facts, &opts.hw, &opts.config)?;

    fs::write(&opts.out, &built.image).map_err(|source| PackError::Write {
        path: opts.out.clone(),
        source,
    })?;
    report(&built, &opts.out);
    Ok(())
}

/// Path of the blob of `id` inside `dir`.
fn module_path(dir: &Path, id: ModuleId) -> PathBuf {
    dir.join(id.name()).with_extension(MODULE_EXT)
}

/// Read the blob of every catalog module found in `dir`.
///
/// Missing files are left out; the registry names the first one.
fn load_modules(dir: &Path) -> Result<BTreeMap<ModuleId, Vec<u8>>, PackError> {
    let mut blobs = BTreeMap::new();
    for id in ModuleId::iter() {
        let path = module_path(dir, id);
        match fs::read(&path) {
            Ok(bytes) => {
                debug!("loaded {} ({} bytes)", path.display(), bytes.len());
                blobs.insert(id, bytes);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(PackError::Read { path, source }),
        }
    }
    Ok(blobs)
}

fn report(built: &BuiltImage, out: &Path) {
    for e in &built.entries {
        debug!(
            "{:#06x}..{:#06x} {}",
            e.dst_offset,
            e.dst_end(),
            e.module
        );
    }
    info!(
        "wrote {} ({} bytes, {} modules, {} patches, {} relocations)",
        out.display(),
        built.stats.image_size,
        built.stats.modules,
        built.stats.patches,
        built.stats.relocations
    );
}
