use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapMut, MmapOptions};

use super::FileError;

const MIN_GROWTH: usize = 64 * 1024;

/// Growable writable map over one file. The mapping may run past the logical
/// length; `flush` cuts the file back to the logical length.
pub struct MappedFile {
    path: PathBuf,
    file: File,
    map: Option<MmapMut>,
    len: usize,
    /// The on-disk length is always a multiple of this, even mid-growth.
    stride: usize,
}

impl MappedFile {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, FileError> {
        Self::open_with_stride(path, 1)
    }

    /// Opens a file whose every on-disk length, including the spare capacity
    /// left behind by a killed process, is a whole number of `stride` records.
    pub fn open_with_stride(path: impl Into<PathBuf>, stride: usize) -> Result<Self, FileError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let len = file.metadata()?.len() as usize;
        let mut mapped = Self {
            path,
            file,
            map: None,
            len,
            stride: stride.max(1),
        };
        mapped.remap(len)?;
        Ok(mapped)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        match &self.map {
            Some(map) => &map[..self.len],
            None => &[],
        }
    }

    pub fn slice(&self, offset: usize, len: usize) -> Result<&[u8], FileError> {
        let end = offset.checked_add(len).ok_or(FileError::OutOfRange {
            index: offset as u64,
            len: self.len as u64,
        })?;
        if end > self.len {
            return Err(FileError::OutOfRange {
                index: end as u64,
                len: self.len as u64,
            });
        }
        Ok(&self.as_slice()[offset..end])
    }

    pub fn slice_mut(&mut self, offset: usize, len: usize) -> Result<&mut [u8], FileError> {
        let end = offset.checked_add(len).unwrap_or(usize::MAX);
        if end > self.len {
            return Err(FileError::OutOfRange {
                index: end as u64,
                len: self.len as u64,
            });
        }
        match &mut self.map {
            Some(map) => Ok(&mut map[offset..end]),
            None => Err(FileError::OutOfRange {
                index: end as u64,
                len: 0,
            }),
        }
    }

    /// Appends and returns the offset the bytes landed at.
    pub fn append(&mut self, bytes: &[u8]) -> Result<usize, FileError> {
        let offset = self.len;
        let end = offset + bytes.len();
        self.reserve(end)?;
        if let Some(map) = &mut self.map {
            map[offset..end].copy_from_slice(bytes);
        }
        self.len = end;
        Ok(offset)
    }

    /// Grows the logical length by `count` zero bytes.
    pub fn extend_zeroed(&mut self, count: usize) -> Result<(), FileError> {
        let end = self.len + count;
        self.reserve(end)?;
        if let Some(map) = &mut self.map {
            map[self.len..end].fill(0);
        }
        self.len = end;
        Ok(())
    }

    pub fn truncate(&mut self, len: usize) {
        if len < self.len {
            self.len = len;
        }
    }

    pub fn flush(&mut self) -> Result<(), FileError> {
        if let Some(map) = &self.map {
            map.flush()?;
        }
        let capacity = self.map.as_ref().map_or(0, |map| map.len());
        if capacity != self.len || self.file.metadata()?.len() != self.len as u64 {
            self.map = None;
            self.file.set_len(self.len as u64)?;
            self.remap(self.len)?;
        }
        Ok(())
    }

    fn reserve(&mut self, needed: usize) -> Result<(), FileError> {
        let capacity = self.map.as_ref().map_or(0, |map| map.len());
        if needed <= capacity {
            return Ok(());
        }
        let new_capacity = needed
            .max(capacity * 2)
            .max(MIN_GROWTH)
            .next_multiple_of(self.stride);
        if let Some(map) = self.map.take() {
            map.flush()?;
        }
        self.file.set_len(new_capacity as u64)?;
        self.remap(new_capacity)
    }

    fn remap(&mut self, capacity: usize) -> Result<(), FileError> {
        self.map = if capacity == 0 {
            None
        } else {
            // SAFETY: the file is owned by this process for the run (data
            // directory lock) and is never resized while this map is alive.
            Some(unsafe { MmapOptions::new().len(capacity).map_mut(&self.file)? })
        };
        Ok(())
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            blockidx_log::log_warn!("failed to flush {}: {err}", self.path.display());
        }
    }
}

/// Read-only map for consumers that open files after the writer is done.
pub struct MappedReader {
    path: PathBuf,
    map: Option<Mmap>,
}

impl MappedReader {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, FileError> {
        let mut reader = Self {
            path: path.into(),
            map: None,
        };
        reader.reload()?;
        Ok(reader)
    }

    /// Re-maps the file to pick up growth since the last map.
    pub fn reload(&mut self) -> Result<(), FileError> {
        self.map = None;
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        if file.metadata()?.len() == 0 {
            return Ok(());
        }
        // SAFETY: readers only open files once the writer has exited.
        self.map = Some(unsafe { Mmap::map(&file)? });
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
