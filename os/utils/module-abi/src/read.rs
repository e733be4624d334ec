//! Little-endian field readers over unaligned byte buffers.

use crate::AbiError;

#[inline]
pub fn bytes<const N: usize>(buf: &[u8], off: usize) -> Result<[u8; N], AbiError> {
    let end = off.checked_add(N).ok_or(AbiError::OutOfBounds)?;
    let s = buf.get(off..end).ok_or(AbiError::OutOfBounds)?;
    let mut out = [0u8; N];
    out.copy_from_slice(s);
    Ok(out)
}

#[inline]
pub fn u8_at(buf: &[u8], off: usize) -> Result<u8, AbiError> {
    buf.get(off).copied().ok_or(AbiError::OutOfBounds)
}

#[inline]
pub fn u16_le(buf: &[u8], off: usize) -> Result<u16, AbiError> {
    Ok(u16::from_le_bytes(bytes::<2>(buf, off)?))
}

#[inline]
pub fn u32_le(buf: &[u8], off: usize) -> Result<u32, AbiError> {
    Ok(u32::from_le_bytes(bytes::<4>(buf, off)?))
}

/// Fails with [`AbiError::TooShort`] unless `buf` holds at least `need` bytes.
#[inline]
pub const fn ensure_len(buf: &[u8], need: usize) -> Result<(), AbiError> {
    if buf.len() < need {
        return Err(AbiError::TooShort {
            len: buf.len(),
            need,
        });
    }
    Ok(())
}
