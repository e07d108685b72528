use std::path::PathBuf;

use super::{FileError, MappedFile};

/// Length-prefixed byte strings addressed by their starting offset.
pub struct BlobFile {
    inner: MappedFile,
}

impl BlobFile {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, FileError> {
        Ok(Self {
            inner: MappedFile::open(path)?,
        })
    }

    pub fn len(&self) -> u64 {
        self.inner.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn append(&mut self, bytes: &[u8]) -> Result<u64, FileError> {
        let offset = self.inner.append(&(bytes.len() as u32).to_le_bytes())?;
        self.inner.append(bytes)?;
        Ok(offset as u64)
    }

    pub fn read(&self, offset: u64) -> Result<&[u8], FileError> {
        let offset = offset as usize;
        let prefix = self.inner.slice(offset, 4)?;
        let len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        self.inner.slice(offset + 4, len)
    }

    /// Walks every blob in append order.
    pub fn iter(&self) -> BlobIter<'_> {
        BlobIter {
            data: self.inner.as_slice(),
            cursor: 0,
        }
    }

    pub fn truncate(&mut self, offset: u64) {
        self.inner.truncate(offset as usize);
    }

    pub fn flush(&mut self) -> Result<(), FileError> {
        self.inner.flush()
    }
}

pub struct BlobIter<'a> {
    data: &'a [u8],
    cursor: usize,
}

impl<'a> Iterator for BlobIter<'a> {
    type Item = (u64, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let prefix = self.data.get(self.cursor..self.cursor + 4)?;
        let len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        let start = self.cursor + 4;
        let body = self.data.get(start..start + len)?;
        let offset = self.cursor as u64;
        self.cursor = start + len;
        Some((offset, body))
    }
}
