use crate::{AbiError, ModuleHeader, PATCH_ENTRY_SIZE, PatchEntry};

/// Parsed view over an in-memory module blob.
///
/// Only the header length is checked up front; the hot range and the patch
/// table are bounds-checked when they are accessed.
#[derive(Debug, Copy, Clone)]
pub struct ModuleBlob<'a> {
    blob: &'a [u8],
    header: ModuleHeader,
}

/// Iterator over the patch table; yields a `Result` per entry.
pub struct Patches<'a> {
    b: &'a ModuleBlob<'a>,
    idx: usize,
}

impl<'a> ModuleBlob<'a> {
    /// # Errors
    /// [`AbiError::TooShort`] if `blob` cannot hold a [`ModuleHeader`].
    pub fn parse(blob: &'a [u8]) -> Result<Self, AbiError> {
        let header = ModuleHeader::parse(blob)?;
        Ok(Self { blob, header })
    }

    #[must_use]
    pub const fn header(&self) -> &ModuleHeader {
        &self.header
    }

    /// The whole blob, header included.
    #[must_use]
    pub const fn bytes(&self) -> &'a [u8] {
        self.blob
    }

    /// The bytes copied into the resident image.
    ///
    /// # Errors
    /// [`AbiError::OutOfBounds`] if the range is empty or leaves the blob.
    pub fn hot_section(&self) -> Result<&'a [u8], AbiError> {
        let start = usize::from(self.header.hot_start());
        let end = usize::from(self.header.hot_end());
        if end <= start {
            return Err(AbiError::OutOfBounds);
        }
        self.blob.get(start..end).ok_or(AbiError::OutOfBounds)
    }

    /// Whether the hot range is non-empty and ends inside the blob.
    #[must_use]
    pub fn hot_range_in_bounds(&self) -> bool {
        self.hot_section().is_ok()
    }

    /// Number of patch table entries.
    #[must_use]
    pub fn patch_count(&self) -> usize {
        usize::from(self.header.patch_count())
    }

    /// Fetch patch entry `i`.
    ///
    /// # Errors
    /// [`AbiError::OutOfBounds`] if `i` or the record lies outside the table or blob.
    pub fn patch(&self, i: usize) -> Result<PatchEntry, AbiError> {
        if i >= self.patch_count() {
            return Err(AbiError::OutOfBounds);
        }
        let off = usize::from(self.header.patch_table_offset())
            .checked_add(i * PATCH_ENTRY_SIZE)
            .ok_or(AbiError::OutOfBounds)?;
        let end = off
            .checked_add(PATCH_ENTRY_SIZE)
            .ok_or(AbiError::OutOfBounds)?;
        let raw = self.blob.get(off..end).ok_or(AbiError::OutOfBounds)?;
        PatchEntry::parse(raw)
    }

    /// Iterate the patch table in table order.
    #[must_use]
    pub const fn patches(&self) -> Patches<'_> {
        Patches { b: self, idx: 0 }
    }
}

impl Iterator for Patches<'_> {
    type Item = Result<PatchEntry, AbiError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.idx >= self.b.patch_count() {
            return None;
        }
        let i = self.idx;
        self.idx += 1;
        Some(self.b.patch(i))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let r = self.b.patch_count().saturating_sub(self.idx);
        (r, Some(r))
    }
}

impl ExactSizeIterator for Patches<'_> {}

impl core::iter::FusedIterator for Patches<'_> {}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{MODULE_HEADER_SIZE, MODULE_SIGNATURE, PatchDirective};

    /// Header + 4 hot bytes + one IO patch entry.
    fn blob() -> Vec<u8> {
        let mut b = vec![0u8; MODULE_HEADER_SIZE + 4 + PATCH_ENTRY_SIZE];
        b[..7].copy_from_slice(&MODULE_SIGNATURE);
        b[7] = 1;
        b[0x08..0x0A].copy_from_slice(&64u16.to_le_bytes());
        b[0x0A..0x0C].copy_from_slice(&68u16.to_le_bytes());
        b[0x10..0x12].copy_from_slice(&68u16.to_le_bytes());
        b[0x12..0x14].copy_from_slice(&1u16.to_le_bytes());
        b[64..68].copy_from_slice(&[0xBA, 0, 0, 0xEC]);
        b[68] = 1;
        b[70] = 2;
        b[71] = 2;
        b
    }

    #[test]
    fn exposes_hot_section_and_patches() {
        let raw = blob();
        let m = ModuleBlob::parse(&raw).unwrap();
        assert!(m.hot_range_in_bounds());
        assert_eq!(m.hot_section().unwrap(), &[0xBA, 0, 0, 0xEC]);

        let patches: Vec<_> = m.patches().collect::<Result<_, _>>().unwrap();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].patch_offset(), 1);
        assert_eq!(patches[0].directive(), Ok(PatchDirective::Io));
    }

    #[test]
    fn truncated_patch_table_is_reported_per_entry() {
        let mut raw = blob();
        raw[0x12..0x14].copy_from_slice(&2u16.to_le_bytes());
        let m = ModuleBlob::parse(&raw).unwrap();
        let mut it = m.patches();
        assert!(it.next().unwrap().is_ok());
        assert_eq!(it.next(), Some(Err(AbiError::OutOfBounds)));
        assert_eq!(it.next(), None);
    }

    #[test]
    fn hot_range_past_the_end_is_rejected() {
        let mut raw = blob();
        raw[0x0A..0x0C].copy_from_slice(&0x200u16.to_le_bytes());
        let m = ModuleBlob::parse(&raw).unwrap();
        assert!(!m.hot_range_in_bounds());
        assert_eq!(m.hot_section(), Err(AbiError::OutOfBounds));
    }
}
