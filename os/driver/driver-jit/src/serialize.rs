//! # Prefetch Serializer
//!
//! The image was just written as data, but the CPU may already hold stale
//! bytes of it in its prefetch queue. A short jump at the head of the first
//! module flushes the queue before any patched code runs.

use crate::layout::JitLayout;
use log::debug;

/// `JMP SHORT $+2`.
pub const PREFETCH_FLUSH: [u8; 2] = [0xEB, 0x00];

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum SerializeError {
    #[error("the layout has no modules")]
    EmptyLayout,
    #[error("the first module is {size} bytes, too small for the flush jump")]
    SiteTooSmall { size: u16 },
}

/// Write [`PREFETCH_FLUSH`] at the start of the first module.
///
/// # Errors
/// [`SerializeError::EmptyLayout`] or [`SerializeError::SiteTooSmall`].
pub fn serialize_prefetch(layout: &mut JitLayout) -> Result<(), SerializeError> {
    let first = *layout.entries().first().ok_or(SerializeError::EmptyLayout)?;
    if usize::from(first.src_size) < PREFETCH_FLUSH.len() {
        return Err(SerializeError::SiteTooSmall {
            size: first.src_size,
        });
    }
    let at = usize::from(first.dst_offset);
    layout.image_mut()[at..at + PREFETCH_FLUSH.len()].copy_from_slice(&PREFETCH_FLUSH);
    debug!("prefetch flush at {at:#06x} ({})", first.module);
    Ok(())
}
